//! WebSocket runner: send one frame, wait for the correlated answer.

use crate::http::connection::insecure_tls;
use crate::runner::RequestRunner;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use repeater_core::net::dial_host;
use repeater_core::{dial, io_error_code, DialError, Headers, Protocol, Request, Response};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_native_tls::native_tls;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request as Handshake;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Close code reported when the peer vanished without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;
const NO_STATUS_RECEIVED: u16 = 1005;
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Managed by the handshake itself; caller values would break it.
const STRIPPED_HEADERS: [&str; 2] = ["sec-websocket-version", "sec-websocket-key"];

#[derive(Debug, Clone)]
pub struct WsRunnerOptions {
    pub timeout: Duration,
    pub proxy_url: Option<Url>,
    pub headers: Headers,
}

impl Default for WsRunnerOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            proxy_url: None,
            headers: Headers::new(),
        }
    }
}

#[derive(Error, Debug)]
enum WsRunError {
    #[error(transparent)]
    Dial(#[from] DialError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("Unexpected server response: {0}")]
    UnexpectedResponse(u16),

    #[error("{0}")]
    Socket(WsError),

    #[error("Waiting frame has timed out")]
    Timeout,
}

impl WsRunError {
    fn error_code(&self) -> &'static str {
        match self {
            WsRunError::Dial(e) => e.error_code(),
            WsRunError::InvalidUrl(_) => "EINVAL",
            WsRunError::Tls(_) | WsRunError::UnexpectedResponse(_) => "EPROTO",
            WsRunError::Socket(WsError::Io(e)) => io_error_code(e),
            WsRunError::Socket(_) => "EPROTO",
            WsRunError::Timeout => "ETIMEDOUT",
        }
    }
}

impl From<WsError> for WsRunError {
    fn from(error: WsError) -> Self {
        match error {
            WsError::Http(response) => WsRunError::UnexpectedResponse(response.status().as_u16()),
            other => WsRunError::Socket(other),
        }
    }
}

enum Answer {
    Frame(String),
    Closed { code: u16, reason: String },
}

pub struct WsRunner {
    options: WsRunnerOptions,
}

impl WsRunner {
    pub fn new(options: WsRunnerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &WsRunnerOptions {
        &self.options
    }

    async fn exchange(&self, request: &Request, timeout: Duration) -> Result<Response, WsRunError> {
        let deadline = Instant::now() + timeout;
        let (mut ws, headers) = tokio::time::timeout_at(deadline, self.open(request))
            .await
            .map_err(|_| WsRunError::Timeout)??;

        let answer = tokio::time::timeout_at(deadline, converse(&mut ws, request)).await;
        let _ = tokio::time::timeout(CLOSE_GRACE, ws.close(None)).await;

        let response = match answer.map_err(|_| WsRunError::Timeout)?? {
            Answer::Frame(text) => Response::completed(Protocol::Ws, None, headers, Some(text)),
            Answer::Closed { code, reason } => {
                Response::completed(Protocol::Ws, Some(code), headers, Some(reason))
            }
        };
        Ok(response)
    }

    async fn open(
        &self,
        request: &Request,
    ) -> Result<(WebSocketStream<MaybeTlsStream<TcpStream>>, Headers), WsRunError> {
        let url = request.url();
        let handshake = handshake(request)?;
        let host = dial_host(url).ok_or_else(|| WsRunError::InvalidUrl(url.to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| WsRunError::InvalidUrl(url.to_string()))?;

        let stream = dial(&host, port, self.options.proxy_url.as_ref()).await?;
        let connector = if request.secure() {
            Some(tokio_tungstenite::Connector::NativeTls(insecure_tls()?))
        } else {
            None
        };

        let (ws, response) =
            tokio_tungstenite::client_async_tls_with_config(handshake, stream, None, connector).await?;
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        Ok((ws, headers))
    }
}

/// Upgrade request carrying the caller's headers. Names or values the
/// handshake client cannot represent are dropped.
fn handshake(request: &Request) -> Result<Handshake, WsRunError> {
    let mut url = request.url().clone();
    let scheme = if request.secure() { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|_| WsRunError::InvalidUrl(request.url().to_string()))?;

    let mut handshake = url.as_str().into_client_request()?;
    let mut replaced = HashSet::new();
    for (name, value) in request.headers().iter() {
        if STRIPPED_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        let (Ok(header), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) else {
            warn!("Dropping header {:?} the WebSocket client cannot send", name);
            continue;
        };

        let headers = handshake.headers_mut();
        if replaced.insert(header.clone()) {
            headers.insert(header, value);
        } else {
            headers.append(header, value);
        }
    }
    Ok(handshake)
}

async fn converse<S>(ws: &mut WebSocketStream<S>, request: &Request) -> Result<Answer, WsRunError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Some(body) = request.body() {
        ws.send(Message::Text(body.to_string())).await?;
    }

    let pattern = request.correlation_id_regex();
    while let Some(message) = ws.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => String::from_utf8_lossy(&data).into_owned(),
            Ok(Message::Close(frame)) => {
                return Ok(match frame {
                    Some(frame) => Answer::Closed {
                        code: frame.code.into(),
                        reason: frame.reason.into_owned(),
                    },
                    None => Answer::Closed {
                        code: NO_STATUS_RECEIVED,
                        reason: String::new(),
                    },
                })
            }
            Ok(_) => continue,
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => break,
            Err(e) => return Err(e.into()),
        };

        match pattern {
            Some(pattern) if !pattern.is_match(&text) => {
                debug!("Skipping uncorrelated frame");
            }
            _ => return Ok(Answer::Frame(text)),
        }
    }

    Ok(Answer::Closed {
        code: ABNORMAL_CLOSURE,
        reason: String::new(),
    })
}

#[async_trait]
impl RequestRunner for WsRunner {
    fn protocol(&self) -> Protocol {
        Protocol::Ws
    }

    async fn run(&self, request: Request) -> Response {
        let mut request = request;
        request.set_headers(&self.options.headers);
        let timeout = request.timeout().unwrap_or(self.options.timeout);

        debug!("WS {}", request.url());
        match self.exchange(&request, timeout).await {
            Ok(response) => response,
            Err(e) => {
                debug!("WebSocket call to {} failed: {}", request.url(), e);
                Response::failed(Protocol::Ws, e.error_code(), e.to_string())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use repeater_core::RequestOptions;

    fn request(headers: &[(&str, &str)]) -> Request {
        let mut options = RequestOptions::new(Protocol::Ws, "ws://target.local:9000/socket");
        options.headers = headers.iter().copied().collect();
        Request::new(options).unwrap()
    }

    #[test]
    fn test_handshake_strips_key_and_version() {
        let handshake = handshake(&request(&[
            ("Sec-WebSocket-Key", "attacker"),
            ("sec-websocket-version", "99"),
            ("X-Token", "abc"),
        ]))
        .unwrap();

        let headers = handshake.headers();
        assert_ne!(headers.get("sec-websocket-key").unwrap(), "attacker");
        assert_eq!(headers.get("sec-websocket-version").unwrap(), "13");
        assert_eq!(headers.get("x-token").unwrap(), "abc");
    }

    #[test]
    fn test_handshake_keeps_repeated_values_and_replaces_defaults() {
        let handshake = handshake(&request(&[
            ("Host", "spoofed.local"),
            ("X-Multi", "1"),
            ("X-Multi", "2"),
        ]))
        .unwrap();

        let headers = handshake.headers();
        assert_eq!(headers.get("host").unwrap(), "spoofed.local");
        assert_eq!(headers.get_all("x-multi").iter().count(), 2);
    }

    #[test]
    fn test_unrepresentable_header_is_dropped() {
        let handshake = handshake(&request(&[("Bad Name", "x"), ("X-Ok", "y")])).unwrap();
        assert_eq!(handshake.headers().get("x-ok").unwrap(), "y");
        assert!(handshake.headers().get("bad name").is_none());
    }
}
