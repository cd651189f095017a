//! Application-level errors pushed by the orchestration service.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorCode {
    RepeaterAlreadyStarted,
    RepeaterDeactivated,
    RepeaterNoLongerSupported,
    RepeaterNotPermitted,
    RepeaterUnauthorized,
    UnexpectedError,
    UnknownError,
    Other(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::RepeaterAlreadyStarted => "REPEATER_ALREADY_STARTED",
            ErrorCode::RepeaterDeactivated => "REPEATER_DEACTIVATED",
            ErrorCode::RepeaterNoLongerSupported => "REPEATER_NO_LONGER_SUPPORTED",
            ErrorCode::RepeaterNotPermitted => "REPEATER_NOT_PERMITTED",
            ErrorCode::RepeaterUnauthorized => "REPEATER_UNAUTHORIZED",
            ErrorCode::UnexpectedError => "UNEXPECTED_ERROR",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
            ErrorCode::Other(code) => code,
        }
    }
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        match code.as_str() {
            "REPEATER_ALREADY_STARTED" => ErrorCode::RepeaterAlreadyStarted,
            "REPEATER_DEACTIVATED" => ErrorCode::RepeaterDeactivated,
            "REPEATER_NO_LONGER_SUPPORTED" => ErrorCode::RepeaterNoLongerSupported,
            "REPEATER_NOT_PERMITTED" => ErrorCode::RepeaterNotPermitted,
            "REPEATER_UNAUTHORIZED" => ErrorCode::RepeaterUnauthorized,
            "UNEXPECTED_ERROR" => ErrorCode::UnexpectedError,
            "UNKNOWN_ERROR" => ErrorCode::UnknownError,
            _ => ErrorCode::Other(code),
        }
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        ErrorCode::from(code.to_string())
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        code.as_str().to_string()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error payload carried by `connect_error` frames and `error` events.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ServerError {
    pub code: ErrorCode,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl ServerError {
    pub fn new(code: impl Into<ErrorCode>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            remediation: None,
        }
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }
}
