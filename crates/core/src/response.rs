//! Terminal outcome of one executed request.

use crate::headers::Headers;
use crate::protocol::Protocol;

/// What happened to the call. A failed call is still a valid finding for
/// the scanner, so it is data rather than an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The target was reached and the exchange finished.
    Completed {
        status_code: Option<u16>,
        headers: Headers,
        body: Option<String>,
    },
    /// The call itself could not be completed.
    Failed { error_code: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub protocol: Protocol,
    pub outcome: Outcome,
    /// Charset the body was decoded with, when one applied.
    pub encoding: Option<String>,
}

impl Response {
    pub fn completed(
        protocol: Protocol,
        status_code: Option<u16>,
        headers: Headers,
        body: Option<String>,
    ) -> Self {
        Self {
            protocol,
            outcome: Outcome::Completed {
                status_code,
                headers,
                body,
            },
            encoding: None,
        }
    }

    pub fn failed(
        protocol: Protocol,
        error_code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            protocol,
            outcome: Outcome::Failed {
                error_code: error_code.into(),
                message: message.into(),
            },
            encoding: None,
        }
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn status_code(&self) -> Option<u16> {
        match &self.outcome {
            Outcome::Completed { status_code, .. } => *status_code,
            Outcome::Failed { .. } => None,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Completed { body, .. } => body.as_deref(),
            Outcome::Failed { .. } => None,
        }
    }

    pub fn headers(&self) -> Option<&Headers> {
        match &self.outcome {
            Outcome::Completed { headers, .. } => Some(headers),
            Outcome::Failed { .. } => None,
        }
    }

    pub fn error_code(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Failed { error_code, .. } => Some(error_code),
            Outcome::Completed { .. } => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Failed { message, .. } => Some(message),
            Outcome::Completed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, Outcome::Failed { .. })
    }
}
