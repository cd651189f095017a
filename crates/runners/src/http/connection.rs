//! Sockets used by the HTTP runner, plain or TLS.

use super::error::HttpError;
use repeater_core::dial;
use repeater_core::net::dial_host;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_native_tls::native_tls;
use tokio_native_tls::TlsStream;
use url::Url;

/// Where a request goes. Also the key of the keep-alive pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

impl Target {
    pub fn from_url(url: &Url) -> Result<Self, HttpError> {
        let secure = match url.scheme() {
            "http" | "ws" => false,
            "https" | "wss" => true,
            other => return Err(HttpError::UnsupportedScheme(other.to_string())),
        };
        let host = dial_host(url).ok_or_else(|| HttpError::InvalidTarget(url.to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| HttpError::InvalidTarget(url.to_string()))?;
        Ok(Self { host, port, secure })
    }
}

/// Targets are probed, not trusted: certificates are never verified.
pub(crate) fn insecure_tls() -> Result<native_tls::TlsConnector, native_tls::Error> {
    native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
}

pub enum Connection {
    Plain(TcpStream),
    Tls(TlsStream<TcpStream>),
}

impl Connection {
    pub async fn open(target: &Target, proxy: Option<&Url>) -> Result<Self, HttpError> {
        let stream = dial(&target.host, target.port, proxy).await?;
        if !target.secure {
            return Ok(Connection::Plain(stream));
        }

        let connector = tokio_native_tls::TlsConnector::from(insecure_tls()?);
        let stream = connector.connect(&target.host, stream).await?;
        Ok(Connection::Tls(stream))
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Connection::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Connection::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Connection::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Connection::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Connection::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
