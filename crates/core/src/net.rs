//! TCP dialing, directly or through a SOCKS proxy.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_socks::tcp::{Socks4Stream, Socks5Stream};
use tokio_socks::IntoTargetAddr;
use tracing::debug;
use url::{Host, Url};

#[derive(Error, Debug)]
pub enum DialError {
    #[error("getaddrinfo ENOTFOUND {0}")]
    Resolve(String),

    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Unsupported proxy scheme: {0}")]
    UnsupportedProxy(String),
}

impl DialError {
    /// Node-style error code reported to the remote caller.
    pub fn error_code(&self) -> &'static str {
        match self {
            DialError::Resolve(_) => "ENOTFOUND",
            DialError::Io(e) => io_error_code(e),
            DialError::Proxy(_) => "ECONNREFUSED",
            DialError::UnsupportedProxy(_) => "EINVAL",
        }
    }
}

/// Map an I/O failure to the error code a Node-based caller expects.
pub fn io_error_code(error: &io::Error) -> &'static str {
    match error.kind() {
        io::ErrorKind::ConnectionRefused => "ECONNREFUSED",
        io::ErrorKind::ConnectionReset => "ECONNRESET",
        io::ErrorKind::ConnectionAborted => "ECONNABORTED",
        io::ErrorKind::TimedOut => "ETIMEDOUT",
        io::ErrorKind::BrokenPipe => "EPIPE",
        io::ErrorKind::AddrNotAvailable => "EADDRNOTAVAIL",
        io::ErrorKind::UnexpectedEof => "ECONNRESET",
        io::ErrorKind::InvalidData => "EPROTO",
        io::ErrorKind::InvalidInput => "EINVAL",
        _ => match error.raw_os_error() {
            Some(113) => "EHOSTUNREACH",
            Some(101) => "ENETUNREACH",
            _ => "EIO",
        },
    }
}

/// Host as it must be passed to a resolver: IPv6 literals without brackets.
pub fn dial_host(url: &Url) -> Option<String> {
    match url.host()? {
        Host::Domain(domain) => Some(domain.to_string()),
        Host::Ipv4(addr) => Some(addr.to_string()),
        Host::Ipv6(addr) => Some(addr.to_string()),
    }
}

/// Whether `proxy` uses a scheme [`dial`] can tunnel through.
pub fn is_supported_proxy(proxy: &Url) -> bool {
    matches!(proxy.scheme(), "socks" | "socks5" | "socks5h" | "socks4" | "socks4a")
}

/// Open a TCP connection to `host:port`, optionally through a SOCKS proxy.
///
/// # Errors
/// Returns error if the host cannot be resolved, the connection fails or
/// the proxy refuses the tunnel.
pub async fn dial(host: &str, port: u16, proxy: Option<&Url>) -> Result<TcpStream, DialError> {
    match proxy {
        None => {
            let addrs = resolve(host, port).await?;
            connect_any(&addrs).await
        }
        Some(proxy) => dial_via_proxy(host, port, proxy).await,
    }
}

async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, DialError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| DialError::Resolve(host.to_string()))?
        .collect();
    if addrs.is_empty() {
        return Err(DialError::Resolve(host.to_string()));
    }
    Ok(addrs)
}

async fn connect_any(addrs: &[SocketAddr]) -> Result<TcpStream, DialError> {
    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            }
            Err(e) => {
                debug!("Connect to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error
        .map(DialError::Io)
        .unwrap_or_else(|| DialError::Io(io::Error::from(io::ErrorKind::AddrNotAvailable))))
}

async fn dial_via_proxy(host: &str, port: u16, proxy: &Url) -> Result<TcpStream, DialError> {
    let proxy_host = dial_host(proxy).ok_or_else(|| DialError::Proxy("proxy URL has no host".into()))?;
    let proxy_port = proxy.port().unwrap_or(1080);
    let proxy_addr = (proxy_host.as_str(), proxy_port);
    let username = proxy.username();
    let password = proxy.password().unwrap_or("");

    debug!("Dialing {}:{} through {} proxy", host, port, proxy.scheme());

    let stream = match proxy.scheme() {
        // socks5h and plain socks hand the hostname to the proxy.
        "socks" | "socks5h" => socks5(proxy_addr, (host, port), username, password).await,
        "socks5" => {
            let target = resolve(host, port).await?[0];
            socks5(proxy_addr, target, username, password).await
        }
        "socks4a" => socks4(proxy_addr, (host, port), username).await,
        "socks4" => {
            let target = resolve(host, port).await?[0];
            socks4(proxy_addr, target, username).await
        }
        other => return Err(DialError::UnsupportedProxy(other.to_string())),
    };

    stream.map_err(|e| match e {
        tokio_socks::Error::Io(io) => DialError::Io(io),
        other => DialError::Proxy(other.to_string()),
    })
}

async fn socks5<'t>(
    proxy_addr: (&str, u16),
    target: impl IntoTargetAddr<'t>,
    username: &str,
    password: &str,
) -> Result<TcpStream, tokio_socks::Error> {
    let stream = if username.is_empty() {
        Socks5Stream::connect(proxy_addr, target).await?
    } else {
        Socks5Stream::connect_with_password(proxy_addr, target, username, password).await?
    };
    Ok(stream.into_inner())
}

async fn socks4<'t>(
    proxy_addr: (&str, u16),
    target: impl IntoTargetAddr<'t>,
    user_id: &str,
) -> Result<TcpStream, tokio_socks::Error> {
    let stream = if user_id.is_empty() {
        Socks4Stream::connect(proxy_addr, target).await?
    } else {
        Socks4Stream::connect_with_userid(proxy_addr, target, user_id).await?
    };
    Ok(stream.into_inner())
}
