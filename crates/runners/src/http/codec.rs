//! Raw HTTP/1.1 framing.
//!
//! Requests are written byte for byte from the caller's headers; names and
//! values are not validated so malformed headers reach the target as sent.

use super::error::HttpError;
use repeater_core::{Headers, Request};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

const MAX_HEADERS: usize = 128;
const MAX_HEAD_BYTES: usize = 80 * 1024;

/// Serialize `request` as it goes on the wire. Host, Content-Length and
/// Connection are only added when the caller did not set them.
pub fn encode_request(request: &Request, keep_alive: bool) -> Vec<u8> {
    let url = request.url();
    let mut target = url.path().to_string();
    if target.is_empty() {
        target.push('/');
    }
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }

    let headers = request.headers();
    let body = request.body();
    let mut head = format!("{} {} HTTP/1.1\r\n", request.method(), target);

    if !headers.contains("host") {
        let host = url.host_str().unwrap_or_default();
        match url.port() {
            Some(port) => head.push_str(&format!("Host: {}:{}\r\n", host, port)),
            None => head.push_str(&format!("Host: {}\r\n", host)),
        }
    }
    for (name, value) in headers.iter() {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    if !headers.contains("content-length") && !headers.contains("transfer-encoding") {
        let length = body.map(str::len).unwrap_or(0);
        if length > 0 || expects_body(request.method()) {
            head.push_str(&format!("Content-Length: {}\r\n", length));
        }
    }
    if !headers.contains("connection") {
        head.push_str(if keep_alive {
            "Connection: keep-alive\r\n"
        } else {
            "Connection: close\r\n"
        });
    }
    head.push_str("\r\n");

    let mut raw = head.into_bytes();
    if let Some(body) = body {
        raw.extend_from_slice(body.as_bytes());
    }
    raw
}

fn expects_body(method: &str) -> bool {
    matches!(method, "POST" | "PUT" | "PATCH")
}

#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    pub minor_version: u8,
    /// Names lower-cased.
    pub headers: Headers,
}

impl ResponseHead {
    pub fn keep_alive(&self) -> bool {
        let connection = self
            .headers
            .get("connection")
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if self.minor_version == 0 {
            connection.contains("keep-alive")
        } else {
            !connection.contains("close")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    NoBody,
    Length(u64),
    Chunked,
    UntilClose,
}

/// HEAD, 1xx, 204 and 304 never carry a body.
pub fn framing(method: &str, head: &ResponseHead) -> Result<Framing, HttpError> {
    let status = head.status;
    if method.eq_ignore_ascii_case("HEAD") || (100..200).contains(&status) || status == 204 || status == 304 {
        return Ok(Framing::NoBody);
    }

    if let Some(encoding) = head.headers.get("transfer-encoding") {
        if encoding
            .rsplit(',')
            .next()
            .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"))
        {
            return Ok(Framing::Chunked);
        }
        return Ok(Framing::UntilClose);
    }

    match head.headers.get("content-length") {
        Some(length) => length
            .trim()
            .parse()
            .map(Framing::Length)
            .map_err(|_| HttpError::Parse(format!("Invalid content-length: {}", length))),
        None => Ok(Framing::UntilClose),
    }
}

/// Read the final response head, skipping interim 1xx responses other
/// than 101.
pub async fn read_head<R>(reader: &mut R) -> Result<ResponseHead, HttpError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let head = read_one_head(reader).await?;
        if (100..200).contains(&head.status) && head.status != 101 {
            continue;
        }
        return Ok(head);
    }
}

async fn read_one_head<R>(reader: &mut R) -> Result<ResponseHead, HttpError>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    loop {
        let read = reader.read_until(b'\n', &mut raw).await?;
        if read == 0 {
            return Err(hang_up());
        }
        if raw.len() > MAX_HEAD_BYTES {
            return Err(HttpError::Parse("Header overflow".into()));
        }

        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Response::new(&mut slots);
        match parsed.parse(&raw) {
            Ok(httparse::Status::Complete(_)) => {
                let headers = parsed
                    .headers
                    .iter()
                    .map(|header| {
                        (
                            header.name.to_ascii_lowercase(),
                            String::from_utf8_lossy(header.value).into_owned(),
                        )
                    })
                    .collect();
                return Ok(ResponseHead {
                    status: parsed.code.unwrap_or_default(),
                    minor_version: parsed.version.unwrap_or(1),
                    headers,
                });
            }
            Ok(httparse::Status::Partial) => continue,
            Err(e) => return Err(HttpError::Parse(e.to_string())),
        }
    }
}

/// Read the raw (still encoded) body.
pub async fn read_body<R>(reader: &mut R, framing: Framing) -> Result<Vec<u8>, HttpError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();
    match framing {
        Framing::NoBody => {}
        Framing::Length(length) => {
            let read = (&mut *reader).take(length).read_to_end(&mut body).await?;
            if (read as u64) < length {
                return Err(hang_up());
            }
        }
        Framing::Chunked => read_chunked(reader, &mut body).await?,
        Framing::UntilClose => {
            reader.read_to_end(&mut body).await?;
        }
    }
    Ok(body)
}

async fn read_chunked<R>(reader: &mut R, body: &mut Vec<u8>) -> Result<(), HttpError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let line = read_line(reader).await?;
        let size = line.split(';').next().unwrap_or_default().trim();
        let size = u64::from_str_radix(size, 16)
            .map_err(|_| HttpError::Parse(format!("Invalid chunk size: {:?}", size)))?;

        if size == 0 {
            // Trailers are read and dropped.
            while !read_line(reader).await?.is_empty() {}
            return Ok(());
        }

        let read = (&mut *reader).take(size).read_to_end(body).await?;
        if (read as u64) < size {
            return Err(hang_up());
        }
        if !read_line(reader).await?.is_empty() {
            return Err(HttpError::Parse("Missing chunk terminator".into()));
        }
    }
}

async fn read_line<R>(reader: &mut R) -> Result<String, HttpError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line).await? == 0 {
        return Err(hang_up());
    }
    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

pub(crate) fn hang_up() -> HttpError {
    HttpError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "socket hang up"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use repeater_core::{Protocol, RequestOptions};
    use tokio::io::BufReader;

    fn request(method: &str, url: &str, headers: &[(&str, &str)], body: Option<&str>) -> Request {
        let mut options = RequestOptions::new(Protocol::Http, url);
        options.method = Some(method.to_string());
        options.headers = headers.iter().copied().collect();
        options.body = body.map(str::to_string);
        Request::new(options).unwrap()
    }

    #[test]
    fn test_encode_adds_missing_framing_headers() {
        let raw = encode_request(
            &request("post", "http://target.local:8080/login?next=%2F", &[], Some("a=1")),
            false,
        );
        assert_eq!(
            String::from_utf8(raw).unwrap(),
            "POST /login?next=%2F HTTP/1.1\r\nHost: target.local:8080\r\nContent-Length: 3\r\nConnection: close\r\n\r\na=1"
        );
    }

    #[test]
    fn test_encode_writes_unvalidated_headers_verbatim() {
        let raw = encode_request(
            &request(
                "GET",
                "http://target.local/",
                &[("Host", "evil.local"), ("X-Bad Name", "v\u{7f}al"), ("Connection", "keep-alive")],
                None,
            ),
            false,
        );
        let text = String::from_utf8(raw).unwrap();
        assert!(text.starts_with("GET / HTTP/1.1\r\nHost: evil.local\r\nX-Bad Name: v\u{7f}al\r\n"));
        assert!(!text.contains("Connection: close"));
        assert!(!text.contains("Content-Length"));
    }

    #[tokio::test]
    async fn test_head_skips_continue_and_lowercases_names() {
        let raw: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nhello";
        let mut reader = BufReader::new(raw);

        let head = read_head(&mut reader).await.unwrap();
        assert_eq!(head.status, 200);
        assert_eq!(head.headers.get("content-type"), Some("text/plain"));
        assert!(head.headers.iter().all(|(name, _)| name == name.to_ascii_lowercase()));

        let framing = framing("GET", &head).unwrap();
        assert_eq!(framing, Framing::Length(5));
        assert_eq!(read_body(&mut reader, framing).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_chunked_body_with_extensions_and_trailers() {
        let raw: &[u8] = b"4;ext=1\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Trailer: yes\r\n\r\n";
        let mut reader = BufReader::new(raw);
        assert_eq!(read_body(&mut reader, Framing::Chunked).await.unwrap(), b"Wikipedia");
    }

    #[tokio::test]
    async fn test_short_body_is_a_hang_up() {
        let raw: &[u8] = b"abc";
        let mut reader = BufReader::new(raw);
        let err = read_body(&mut reader, Framing::Length(10)).await.unwrap_err();
        assert_eq!(err.error_code(), "ECONNRESET");
    }

    #[test]
    fn test_no_body_statuses() {
        let head = |status| ResponseHead {
            status,
            minor_version: 1,
            headers: [("content-length", "10")].into_iter().collect(),
        };
        assert_eq!(framing("GET", &head(204)).unwrap(), Framing::NoBody);
        assert_eq!(framing("GET", &head(304)).unwrap(), Framing::NoBody);
        assert_eq!(framing("HEAD", &head(200)).unwrap(), Framing::NoBody);
        assert_eq!(framing("GET", &head(200)).unwrap(), Framing::Length(10));
    }
}
