//! HTTP(S) runner writing raw requests over its own sockets.

pub mod body;
pub mod codec;
pub mod connection;
pub mod error;
pub mod pool;

use crate::runner::RequestRunner;
use async_trait::async_trait;
use codec::{Framing, ResponseHead};
use connection::{Connection, Target};
use error::HttpError;
use pool::ConnectionPool;
use repeater_core::{Headers, Protocol, Request, Response};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;
use url::Url;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_CONTENT_LENGTH: i64 = 100;
pub const DEFAULT_MAX_SOCKETS: usize = 100;

#[derive(Debug, Clone)]
pub struct HttpRunnerOptions {
    pub timeout: Duration,
    /// KB; `-1` disables truncation.
    pub max_content_length: i64,
    pub whitelist_mimes: Vec<String>,
    pub proxy_url: Option<Url>,
    pub reuse_connection: bool,
    pub max_sockets: usize,
    /// Merged into every request.
    pub headers: Headers,
}

impl Default for HttpRunnerOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            whitelist_mimes: default_whitelist_mimes(),
            proxy_url: None,
            reuse_connection: false,
            max_sockets: DEFAULT_MAX_SOCKETS,
            headers: Headers::new(),
        }
    }
}

/// Textual content types returned whole by default.
pub fn default_whitelist_mimes() -> Vec<String> {
    [
        "text/",
        "application/json",
        "application/ld+json",
        "application/xml",
        "application/xhtml+xml",
        "application/javascript",
        "application/x-javascript",
        "application/ecmascript",
        "application/x-www-form-urlencoded",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

pub struct HttpRunner {
    options: HttpRunnerOptions,
    pool: Option<ConnectionPool>,
}

struct Exchange {
    head: ResponseHead,
    body: Option<Vec<u8>>,
}

impl HttpRunner {
    pub fn new(options: HttpRunnerOptions) -> Self {
        let pool = options
            .reuse_connection
            .then(|| ConnectionPool::new(options.max_sockets));
        Self { options, pool }
    }

    pub fn options(&self) -> &HttpRunnerOptions {
        &self.options
    }

    pub fn pool(&self) -> Option<&ConnectionPool> {
        self.pool.as_ref()
    }

    async fn exchange(&self, request: &Request) -> Result<Exchange, HttpError> {
        let target = Target::from_url(request.url())?;
        let proxy = self.options.proxy_url.as_ref();

        let Some(pool) = &self.pool else {
            let mut connection = Connection::open(&target, proxy).await?;
            let (exchange, _) = send(&mut connection, request, false).await?;
            return Ok(exchange);
        };

        let mut checkout = pool.checkout(&target, proxy).await?;
        let sent = send(&mut checkout.connection, request, true).await;
        let (exchange, reusable) = match sent {
            Ok(sent) => sent,
            // The peer closed an idle socket: nothing was answered, so the
            // request goes out once more on a new connection.
            Err(SendError::Unanswered(e)) if checkout.reused => {
                debug!(
                    "Idle connection to {}:{} went stale ({}), reconnecting",
                    target.host, target.port, e
                );
                drop(checkout);
                pool.discard_idle(&target);
                checkout = pool.checkout_fresh(&target, proxy).await?;
                send(&mut checkout.connection, request, true).await?
            }
            Err(e) => return Err(e.into()),
        };
        if reusable {
            pool.checkin(target, checkout);
        }
        Ok(exchange)
    }

    fn finish(&self, request: &Request, exchange: Exchange) -> Result<Response, HttpError> {
        let Exchange { head, body } = exchange;
        let Some(body) = body else {
            return Ok(Response::completed(
                Protocol::Http,
                Some(head.status),
                head.headers,
                None,
            ));
        };

        let content_type = head.headers.get("content-type");
        let body = body::decompress(head.headers.get("content-encoding"), body)
            .map_err(HttpError::Decompress)?;
        let budget = body::content_budget(
            request.max_content_size(),
            self.options.max_content_length,
            content_type,
            &self.options.whitelist_mimes,
        );
        let body = body::truncate(body, budget);
        let (text, encoding) = body::decode(&body, request.encoding(), content_type);

        Ok(Response::completed(Protocol::Http, Some(head.status), head.headers, Some(text))
            .with_encoding(encoding))
    }
}

/// Why an exchange failed, split on whether the target sent anything back.
enum SendError {
    /// Writing failed, or the socket closed before the first response byte.
    Unanswered(HttpError),
    Failed(HttpError),
}

impl From<HttpError> for SendError {
    fn from(e: HttpError) -> Self {
        SendError::Failed(e)
    }
}

impl From<SendError> for HttpError {
    fn from(e: SendError) -> Self {
        match e {
            SendError::Unanswered(e) | SendError::Failed(e) => e,
        }
    }
}

/// Write the request and read one response. The flag tells whether the
/// connection can carry another exchange.
async fn send(
    connection: &mut Connection,
    request: &Request,
    keep_alive: bool,
) -> Result<(Exchange, bool), SendError> {
    let unanswered = |e: io::Error| SendError::Unanswered(HttpError::Io(e));
    connection
        .write_all(&codec::encode_request(request, keep_alive))
        .await
        .map_err(unanswered)?;
    connection.flush().await.map_err(unanswered)?;

    let mut reader = BufReader::new(connection);
    if reader.fill_buf().await.map_err(unanswered)?.is_empty() {
        return Err(SendError::Unanswered(codec::hang_up()));
    }

    let head = codec::read_head(&mut reader).await?;
    let framing = codec::framing(request.method(), &head)?;
    let body = match framing {
        Framing::NoBody => None,
        framing => Some(codec::read_body(&mut reader, framing).await?),
    };

    let reusable = keep_alive
        && head.keep_alive()
        && head.status != 101
        && framing != Framing::UntilClose
        && reader.buffer().is_empty();
    Ok((Exchange { head, body }, reusable))
}

#[async_trait]
impl RequestRunner for HttpRunner {
    fn protocol(&self) -> Protocol {
        Protocol::Http
    }

    async fn run(&self, request: Request) -> Response {
        let mut request = request;
        request.set_headers(&self.options.headers);
        let timeout = request.timeout().unwrap_or(self.options.timeout);

        debug!("{} {}", request.method(), request.url());
        let outcome = tokio::time::timeout(timeout, self.exchange(&request))
            .await
            .map(|exchange| exchange.and_then(|exchange| self.finish(&request, exchange)));

        match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                debug!("Request to {} failed: {}", request.url(), e);
                Response::failed(Protocol::Http, e.error_code(), e.to_string())
            }
            Err(_) => {
                debug!("Request to {} timed out", request.url());
                Response::failed(
                    Protocol::Http,
                    "ETIMEDOUT",
                    format!("Timeout of {}ms exceeded", timeout.as_millis()),
                )
            }
        }
    }
}
