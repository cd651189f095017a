use async_trait::async_trait;
use repeater_core::{Protocol, Request, Response};

/// Executes one request against its target.
///
/// Failures of the call itself are part of the returned [`Response`];
/// `run` never errors and never retries.
#[async_trait]
pub trait RequestRunner: Send + Sync {
    fn protocol(&self) -> Protocol;

    async fn run(&self, request: Request) -> Response;
}
