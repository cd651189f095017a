//! Seam between the channel engine and the socket that carries it.

use crate::protocol::Link;
use async_trait::async_trait;
use repeater_core::ServerError;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub uri: Url,
    pub token: String,
    pub repeater_id: String,
    pub proxy_url: Option<Url>,
}

#[derive(Error, Debug, Clone)]
pub enum ConnectError {
    /// The service refused the session with a coded reason.
    #[error("Connection rejected: {0}")]
    Rejected(ServerError),

    #[error("Transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open one authenticated session.
    ///
    /// # Errors
    /// Returns [`ConnectError::Rejected`] when the service answers with an
    /// error payload, [`ConnectError::Transport`] for everything else.
    async fn open(&self, params: &ConnectParams) -> Result<Link, ConnectError>;
}
