//! [`Connector`] over a WebSocket carrying JSON envelopes.

use crate::connector::{ConnectError, ConnectParams, Connector};
use crate::protocol::{CloseCause, Envelope, Link, LinkEvent};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use repeater_core::net::dial_host;
use repeater_core::{dial, ServerError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

/// `http(s)` service URIs are accepted and mapped onto `ws(s)`.
pub fn session_url(uri: &Url, repeater_id: &str) -> Result<Url, ConnectError> {
    let mut url = uri.clone();
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ConnectError::Transport(format!(
                "Unsupported server URI scheme: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| ConnectError::Transport(format!("Cannot use {} as a WebSocket URI", uri)))?;
    url.query_pairs_mut().append_pair("id", repeater_id);
    Ok(url)
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, params: &ConnectParams) -> Result<Link, ConnectError> {
        let url = session_url(&params.uri, &params.repeater_id)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectError::Transport(e.to_string()))?;
        let auth = HeaderValue::from_str(&format!("Api-Key {}", params.token))
            .map_err(|e| ConnectError::Transport(format!("Invalid token: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        let host = dial_host(&url)
            .ok_or_else(|| ConnectError::Transport(format!("No host in {}", url)))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ConnectError::Transport(format!("No port in {}", url)))?;

        debug!("Opening control channel to {}:{}", host, port);
        let stream = dial(&host, port, params.proxy_url.as_ref())
            .await
            .map_err(|e| ConnectError::Transport(e.to_string()))?;

        let (mut ws, _) = tokio_tungstenite::client_async_tls(request, stream)
            .await
            .map_err(handshake_error)?;

        await_session(&mut ws).await?;
        Ok(spawn_pump(ws))
    }
}

fn handshake_error(error: WsError) -> ConnectError {
    if let WsError::Http(response) = &error {
        if let Some(body) = response.body() {
            if let Ok(server_error) = serde_json::from_slice::<ServerError>(body) {
                return ConnectError::Rejected(server_error);
            }
        }
        return ConnectError::Transport(format!(
            "Unexpected server response: {}",
            response.status().as_u16()
        ));
    }
    ConnectError::Transport(error.to_string())
}

/// The first frame after the upgrade settles the session.
async fn await_session<S>(ws: &mut WebSocketStream<S>) -> Result<(), ConnectError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = match ws.next().await {
        Some(Ok(Message::Text(text))) => text,
        Some(Ok(Message::Close(frame))) => {
            return Err(ConnectError::Transport(format!(
                "Closed during handshake: {}",
                frame.map(|f| f.reason.into_owned()).unwrap_or_default()
            )))
        }
        Some(Ok(other)) => {
            return Err(ConnectError::Transport(format!(
                "Unexpected handshake frame: {:?}",
                other
            )))
        }
        Some(Err(e)) => return Err(ConnectError::Transport(e.to_string())),
        None => {
            return Err(ConnectError::Transport(
                "Connection closed during handshake".into(),
            ))
        }
    };

    match serde_json::from_str::<Envelope>(&frame) {
        Ok(Envelope::Connected) => Ok(()),
        Ok(Envelope::ConnectError { error }) => {
            let _ = ws.close(None).await;
            Err(ConnectError::Rejected(error))
        }
        Ok(other) => Err(ConnectError::Transport(format!(
            "Unexpected handshake frame: {:?}",
            other
        ))),
        Err(e) => Err(ConnectError::Transport(format!(
            "Malformed handshake frame: {}",
            e
        ))),
    }
}

fn spawn_pump<S>(mut ws: WebSocketStream<S>) -> Link
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (outbound, mut out_rx) = mpsc::unbounded_channel::<Envelope>();
    let (in_tx, inbound) = mpsc::unbounded_channel::<LinkEvent>();

    tokio::spawn(async move {
        let cause = loop {
            tokio::select! {
                frame = out_rx.recv() => match frame {
                    Some(Envelope::Disconnect { reason }) => {
                        let _ = send(&mut ws, &Envelope::Disconnect { reason: reason.clone() }).await;
                        let _ = ws.close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: reason.unwrap_or_default().into(),
                        })).await;
                        return;
                    }
                    Some(envelope) => {
                        if let Err(e) = send(&mut ws, &envelope).await {
                            break CloseCause::Transport(e.to_string());
                        }
                    }
                    None => {
                        let _ = ws.close(None).await;
                        return;
                    }
                },
                message = ws.next() => match message {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<Envelope>(&text) {
                        Ok(Envelope::Disconnect { reason }) => break CloseCause::Server(reason),
                        Ok(envelope) => {
                            let _ = in_tx.send(LinkEvent::Message(envelope));
                        }
                        Err(e) => warn!("Dropping malformed frame: {}", e),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break CloseCause::Server(frame.map(|f| f.reason.into_owned()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break CloseCause::Transport(e.to_string()),
                    None => break CloseCause::Transport("connection reset".into()),
                },
            }
        };
        debug!("Control channel closed: {:?}", cause);
        let _ = in_tx.send(LinkEvent::Closed(cause));
    });

    Link { outbound, inbound }
}

async fn send<S>(ws: &mut WebSocketStream<S>, envelope: &Envelope) -> Result<(), WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let text = serde_json::to_string(envelope)
        .map_err(|e| WsError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    ws.send(Message::Text(text)).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_session_url_maps_scheme_and_adds_id() {
        let uri = Url::parse("https://repeater.example.com/workstations").unwrap();
        let url = session_url(&uri, "abc").unwrap();
        assert_eq!(url.as_str(), "wss://repeater.example.com/workstations?id=abc");
    }

    #[test]
    fn test_session_url_rejects_unknown_scheme() {
        let uri = Url::parse("ftp://repeater.example.com/").unwrap();
        assert!(session_url(&uri, "abc").is_err());
    }
}
