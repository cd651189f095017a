//! Request execution shared by every command transport.

use repeater_core::{Request, WireRequest, WireResponse};
use repeater_runners::{CommandError, CommandHub};
use tracing::warn;

/// Turns a wire request into a wire response through the [`CommandHub`].
pub struct RequestExecutor {
    hub: CommandHub,
}

impl RequestExecutor {
    pub fn new(hub: CommandHub) -> Self {
        Self { hub }
    }

    pub fn hub(&self) -> &CommandHub {
        &self.hub
    }

    /// A request that cannot be built is answered with an `EINVAL`
    /// failure.
    ///
    /// # Errors
    /// Returns [`CommandError::UnsupportedProtocol`] when no runner handles
    /// the request's protocol.
    pub async fn execute(&self, wire: WireRequest) -> Result<WireResponse, CommandError> {
        let protocol = wire.protocol;
        let request = match Request::try_from(wire) {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejecting malformed {} request: {}", protocol, e);
                return Ok(WireResponse::failed(protocol, "EINVAL", e.to_string()));
            }
        };

        let response = self.hub.send_request(request).await?;
        Ok(response.into())
    }
}
