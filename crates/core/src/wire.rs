//! Boundary shapes of the request-execution RPC (snake_case on the wire).

use crate::headers::Headers;
use crate::protocol::Protocol;
use crate::request::{Request, RequestError, RequestOptions};
use crate::response::{Outcome, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRequest {
    pub protocol: Protocol,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: Headers,
    /// Kept loose so that a non-string body can be rejected with a proper error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    /// KB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_content_size: Option<u64>,
    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl WireRequest {
    pub fn new(protocol: Protocol, url: impl Into<String>) -> Self {
        Self {
            protocol,
            url: url.into(),
            method: None,
            headers: Headers::new(),
            body: None,
            correlation_id_regex: None,
            encoding: None,
            max_content_size: None,
            timeout: None,
        }
    }
}

impl TryFrom<WireRequest> for Request {
    type Error = RequestError;

    fn try_from(wire: WireRequest) -> Result<Self, Self::Error> {
        let body = match wire.body {
            None | Some(Value::Null) => None,
            Some(Value::String(body)) => Some(body),
            Some(_) => return Err(RequestError::InvalidBody),
        };

        Request::new(RequestOptions {
            protocol: wire.protocol,
            url: wire.url,
            method: wire.method,
            headers: wire.headers,
            body,
            correlation_id_regex: wire.correlation_id_regex,
            encoding: wire.encoding,
            timeout: wire.timeout.map(Duration::from_millis),
            max_content_size: wire.max_content_size,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireResponse {
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

impl WireResponse {
    pub fn failed(protocol: Protocol, error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Response::failed(protocol, error_code, message).into()
    }
}

impl From<Response> for WireResponse {
    fn from(response: Response) -> Self {
        let Response {
            protocol,
            outcome,
            encoding,
        } = response;

        match outcome {
            Outcome::Completed {
                status_code,
                headers,
                body,
            } => Self {
                protocol,
                body,
                headers: Some(headers),
                status_code,
                error_code: None,
                message: None,
                encoding,
            },
            Outcome::Failed {
                error_code,
                message,
            } => Self {
                protocol,
                body: None,
                headers: None,
                status_code: None,
                error_code: Some(error_code),
                message: Some(message),
                encoding: None,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_request_converts_to_request() {
        let wire: WireRequest = serde_json::from_value(json!({
            "protocol": "http",
            "url": "http://intranet.local/login",
            "method": "post",
            "headers": {"Content-Type": "application/x-www-form-urlencoded"},
            "body": "user=admin",
            "timeout": 1500,
            "max_content_size": 4
        }))
        .unwrap();

        let request = Request::try_from(wire).unwrap();
        assert_eq!(request.method(), "POST");
        assert_eq!(request.body(), Some("user=admin"));
        assert_eq!(request.timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(request.max_content_size(), Some(4));
    }

    #[test]
    fn test_non_string_body_is_rejected() {
        let wire: WireRequest = serde_json::from_value(json!({
            "protocol": "http",
            "url": "http://intranet.local/",
            "body": {"nested": true}
        }))
        .unwrap();
        assert!(matches!(Request::try_from(wire), Err(RequestError::InvalidBody)));
    }

    #[test]
    fn test_failed_response_serializes_without_status() {
        let wire = WireResponse::failed(Protocol::Http, "ENOTFOUND", "getaddrinfo ENOTFOUND nowhere");
        let value = serde_json::to_value(&wire).unwrap();
        assert_eq!(
            value,
            json!({
                "protocol": "http",
                "error_code": "ENOTFOUND",
                "message": "getaddrinfo ENOTFOUND nowhere"
            })
        );
    }

    #[test]
    fn test_completed_response_uses_snake_case() {
        let headers: Headers = [("Server", "nginx")].into_iter().collect();
        let response = Response::completed(Protocol::Http, Some(200), headers, Some("ok".into()))
            .with_encoding("utf-8");
        let value = serde_json::to_value(WireResponse::from(response)).unwrap();
        assert_eq!(value["status_code"], 200);
        assert_eq!(value["headers"]["Server"], "nginx");
        assert_eq!(value["encoding"], "utf-8");
        assert!(value.get("error_code").is_none());
    }
}
