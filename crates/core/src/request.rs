//! Requests executed on behalf of the remote scanning service.

use crate::headers::Headers;
use crate::protocol::Protocol;
use regex::{Regex, RegexBuilder};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Body must be a string")]
    InvalidBody,

    #[error("Invalid correlation id pattern: {0}")]
    InvalidCorrelationPattern(#[from] regex::Error),
}

/// Construction input for [`Request`].
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub protocol: Protocol,
    pub url: String,
    pub method: Option<String>,
    pub headers: Headers,
    pub body: Option<String>,
    pub correlation_id_regex: Option<String>,
    pub encoding: Option<String>,
    pub timeout: Option<Duration>,
    pub max_content_size: Option<u64>,
}

impl RequestOptions {
    pub fn new(protocol: Protocol, url: impl Into<String>) -> Self {
        Self {
            protocol,
            url: url.into(),
            method: None,
            headers: Headers::new(),
            body: None,
            correlation_id_regex: None,
            encoding: None,
            timeout: None,
            max_content_size: None,
        }
    }
}

/// A validated request. Only the header set can change after construction,
/// through [`Request::set_headers`].
#[derive(Debug, Clone)]
pub struct Request {
    protocol: Protocol,
    url: Url,
    method: String,
    headers: Headers,
    body: Option<String>,
    correlation_id_regex: Option<Regex>,
    encoding: Option<String>,
    timeout: Option<Duration>,
    max_content_size: Option<u64>,
}

impl Request {
    /// Validate and build a request.
    ///
    /// # Errors
    /// Returns error if the URL is not absolute or the correlation pattern
    /// does not compile.
    pub fn new(options: RequestOptions) -> Result<Self, RequestError> {
        let url = Url::parse(&options.url).map_err(|e| RequestError::InvalidUrl {
            url: options.url.clone(),
            reason: e.to_string(),
        })?;
        if url.host_str().map_or(true, str::is_empty) {
            return Err(RequestError::InvalidUrl {
                url: options.url,
                reason: "missing host".to_string(),
            });
        }

        let method = options
            .method
            .map(|m| m.trim().to_ascii_uppercase())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "GET".to_string());

        let correlation_id_regex = options
            .correlation_id_regex
            .filter(|p| !p.is_empty())
            .map(|p| RegexBuilder::new(&p).case_insensitive(true).build())
            .transpose()?;

        Ok(Self {
            protocol: options.protocol,
            url,
            method,
            headers: options.headers,
            body: options.body,
            correlation_id_regex,
            encoding: options.encoding.filter(|e| !e.trim().is_empty()),
            timeout: options.timeout,
            max_content_size: options.max_content_size,
        })
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn correlation_id_regex(&self) -> Option<&Regex> {
        self.correlation_id_regex.as_ref()
    }

    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Per-request truncation budget in KB.
    pub fn max_content_size(&self) -> Option<u64> {
        self.max_content_size
    }

    /// Whether the target expects TLS.
    pub fn secure(&self) -> bool {
        matches!(self.url.scheme(), "https" | "wss")
    }

    /// Apply agent-wide default headers. Configured values win over
    /// same-named request headers.
    pub fn set_headers(&mut self, defaults: &Headers) {
        self.headers.merge(defaults);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn options(url: &str) -> RequestOptions {
        RequestOptions::new(Protocol::Http, url)
    }

    #[test]
    fn test_method_defaults_to_get() {
        let request = Request::new(options("https://example.com/")).unwrap();
        assert_eq!(request.method(), "GET");
        assert!(request.secure());
    }

    #[test]
    fn test_method_is_upper_cased() {
        let mut opts = options("http://example.com/");
        opts.method = Some("patch".to_string());
        let request = Request::new(opts).unwrap();
        assert_eq!(request.method(), "PATCH");
    }

    #[test]
    fn test_relative_url_is_rejected() {
        let result = Request::new(options("/api/v1/users"));
        assert!(matches!(result, Err(RequestError::InvalidUrl { .. })));
    }

    #[test]
    fn test_url_without_host_is_rejected() {
        let result = Request::new(options("mailto:someone@example.com"));
        assert!(matches!(result, Err(RequestError::InvalidUrl { .. })));
    }

    #[test]
    fn test_invalid_correlation_pattern_is_rejected() {
        let mut opts = options("ws://example.com/socket");
        opts.correlation_id_regex = Some("(unclosed".to_string());
        let result = Request::new(opts);
        assert!(matches!(result, Err(RequestError::InvalidCorrelationPattern(_))));
    }

    #[test]
    fn test_correlation_pattern_is_case_insensitive() {
        let mut opts = options("ws://example.com/socket");
        opts.correlation_id_regex = Some("\"ID\":\\s*42".to_string());
        let request = Request::new(opts).unwrap();
        assert!(request
            .correlation_id_regex()
            .unwrap()
            .is_match("{\"id\": 42}"));
    }

    #[test]
    fn test_set_headers_merges_defaults() {
        let mut opts = options("http://example.com/");
        opts.headers.append("Authorization", "Bearer scan");
        opts.headers.append("X-Test", "1");
        let mut request = Request::new(opts).unwrap();

        let defaults: Headers = [("authorization", "Bearer agent")].into_iter().collect();
        request.set_headers(&defaults);

        assert_eq!(request.headers().get("Authorization"), Some("Bearer agent"));
        assert_eq!(request.headers().get("x-test"), Some("1"));
    }
}
