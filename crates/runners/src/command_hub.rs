use crate::runner::RequestRunner;
use repeater_core::{Protocol, Request, Response};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(Protocol),
}

/// Routes requests to the first registered runner for their protocol.
#[derive(Default, Clone)]
pub struct CommandHub {
    runners: Vec<Arc<dyn RequestRunner>>,
}

impl CommandHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, runner: Arc<dyn RequestRunner>) -> &mut Self {
        self.runners.push(runner);
        self
    }

    pub fn runner(&self, protocol: Protocol) -> Option<Arc<dyn RequestRunner>> {
        self.runners
            .iter()
            .find(|runner| runner.protocol() == protocol)
            .cloned()
    }

    pub fn count(&self) -> usize {
        self.runners.len()
    }

    /// # Errors
    /// Returns [`CommandError::UnsupportedProtocol`] when no runner was
    /// registered for the request's protocol.
    pub async fn send_request(&self, request: Request) -> Result<Response, CommandError> {
        let protocol = request.protocol();
        let runner = self
            .runner(protocol)
            .ok_or(CommandError::UnsupportedProtocol(protocol))?;

        debug!("Running {} request to {}", protocol, request.url());
        Ok(runner.run(request).await)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use repeater_core::{Headers, RequestOptions};

    struct Canned {
        protocol: Protocol,
        body: &'static str,
    }

    #[async_trait]
    impl RequestRunner for Canned {
        fn protocol(&self) -> Protocol {
            self.protocol
        }

        async fn run(&self, request: Request) -> Response {
            Response::completed(request.protocol(), Some(200), Headers::new(), Some(self.body.into()))
        }
    }

    fn request(protocol: Protocol) -> Request {
        Request::new(RequestOptions::new(protocol, "http://target.local/")).unwrap()
    }

    #[tokio::test]
    async fn test_first_matching_runner_wins() {
        let mut hub = CommandHub::new();
        hub.register(Arc::new(Canned { protocol: Protocol::Ws, body: "ws" }))
            .register(Arc::new(Canned { protocol: Protocol::Http, body: "first" }))
            .register(Arc::new(Canned { protocol: Protocol::Http, body: "second" }));

        let response = hub.send_request(request(Protocol::Http)).await.unwrap();
        assert_eq!(response.body(), Some("first"));
        assert_eq!(hub.count(), 3);
    }

    #[tokio::test]
    async fn test_missing_runner_is_an_error() {
        let mut hub = CommandHub::new();
        hub.register(Arc::new(Canned { protocol: Protocol::Http, body: "" }));

        let err = hub.send_request(request(Protocol::Ws)).await.unwrap_err();
        assert_eq!(err, CommandError::UnsupportedProtocol(Protocol::Ws));
    }
}
