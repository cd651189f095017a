#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use flate2::write::GzEncoder;
use flate2::Compression;
use repeater_core::{Headers, Protocol, Request, RequestOptions};
use repeater_runners::http::connection::Target;
use repeater_runners::{HttpRunner, HttpRunnerOptions, RequestRunner};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Read one request (head plus content-length body) off the socket.
async fn read_request(stream: &mut TcpStream) -> Vec<u8> {
    let mut raw = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        if let Some(end) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&raw[..end]).to_ascii_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .map(|v| v.trim().parse::<usize>().unwrap())
                .unwrap_or(0);
            if raw.len() >= end + 4 + length {
                return raw;
            }
        }
        let read = stream.read(&mut buf).await.unwrap();
        if read == 0 {
            return raw;
        }
        raw.extend_from_slice(&buf[..read]);
    }
}

/// Serve one canned response and hand back the raw request.
async fn serve_once(response: Vec<u8>) -> (String, JoinHandle<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_request(&mut stream).await;
        stream.write_all(&response).await.unwrap();
        stream.shutdown().await.unwrap();
        request
    });
    (base, handle)
}

fn response(head: &str, body: &[u8]) -> Vec<u8> {
    let mut raw = format!("{}\r\nContent-Length: {}\r\n\r\n", head, body.len()).into_bytes();
    raw.extend_from_slice(body);
    raw
}

fn request(method: &str, url: &str) -> RequestOptions {
    let mut options = RequestOptions::new(Protocol::Http, url);
    options.method = Some(method.to_string());
    options
}

fn build(options: RequestOptions) -> Request {
    Request::new(options).unwrap()
}

fn runner(max_content_length: i64) -> HttpRunner {
    HttpRunner::new(HttpRunnerOptions {
        max_content_length,
        timeout: Duration::from_secs(5),
        ..HttpRunnerOptions::default()
    })
}

#[tokio::test]
async fn test_body_over_budget_is_cut_to_1024_bytes() {
    let (base, server) = serve_once(response(
        "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream",
        &[b'x'; 1025],
    ))
    .await;

    let result = runner(1).run(build(request("GET", &format!("{}/blob", base)))).await;
    server.await.unwrap();

    assert_eq!(result.status_code(), Some(200));
    assert_eq!(result.body().unwrap().len(), 1024);
}

#[tokio::test]
async fn test_allow_listed_body_is_returned_whole() {
    let (base, server) = serve_once(response(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8",
        &[b'x'; 1025],
    ))
    .await;

    let result = runner(1).run(build(request("GET", &format!("{}/page", base)))).await;
    server.await.unwrap();

    assert_eq!(result.body().unwrap().len(), 1025);
    assert_eq!(result.encoding.as_deref(), Some("utf-8"));
}

#[tokio::test]
async fn test_gzip_body_is_decompressed() {
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(b"{\"ok\":true}").unwrap();
    let (base, server) = serve_once(response(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Encoding: gzip",
        &gz.finish().unwrap(),
    ))
    .await;

    let result = runner(100).run(build(request("GET", &format!("{}/api", base)))).await;
    server.await.unwrap();

    assert_eq!(result.body(), Some("{\"ok\":true}"));
    assert_eq!(result.headers().unwrap().get("content-encoding"), Some("gzip"));
}

#[tokio::test]
async fn test_chunked_body_until_close() {
    let (base, server) = serve_once(
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n2\r\nde\r\n0\r\n\r\n".to_vec(),
    )
    .await;

    let result = runner(100).run(build(request("GET", &format!("{}/", base)))).await;
    server.await.unwrap();
    assert_eq!(result.body(), Some("abcde"));
}

#[tokio::test]
async fn test_head_response_does_not_wait_for_body() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await;
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n")
            .await
            .unwrap();
        // Keep the socket open: the client must not read a body.
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let mut options = request("HEAD", &format!("{}/", base));
    options.timeout = Some(Duration::from_millis(500));
    let result = runner(100).run(build(options)).await;

    assert_eq!(result.status_code(), Some(200));
    assert_eq!(result.body(), None);
    server.abort();
}

#[tokio::test]
async fn test_malformed_headers_reach_the_target_verbatim() {
    let (base, server) = serve_once(response("HTTP/1.1 204 No Content", b"")).await;

    let mut options = request("POST", &format!("{}/submit", base));
    options.headers = [("X-Injected", "a\tb"), ("Bad Header Name", "1")].into_iter().collect();
    options.body = Some("payload".into());
    let result = runner(100).run(build(options)).await;

    let raw = String::from_utf8(server.await.unwrap()).unwrap();
    assert_eq!(result.status_code(), Some(204));
    assert!(raw.starts_with("POST /submit HTTP/1.1\r\n"));
    assert!(raw.contains("\r\nX-Injected: a\tb\r\n"));
    assert!(raw.contains("\r\nBad Header Name: 1\r\n"));
    assert!(raw.contains("\r\nContent-Length: 7\r\n"));
    assert!(raw.ends_with("\r\n\r\npayload"));
}

#[tokio::test]
async fn test_default_headers_replace_request_values() {
    let (base, server) = serve_once(response("HTTP/1.1 200 OK", b"ok")).await;

    let runner = HttpRunner::new(HttpRunnerOptions {
        headers: [("User-Agent", "repeater/1.0")].into_iter().collect::<Headers>(),
        ..HttpRunnerOptions::default()
    });
    let mut options = request("GET", &format!("{}/", base));
    options.headers = [("user-agent", "scanner"), ("Accept", "*/*")].into_iter().collect();
    runner.run(build(options)).await;

    let raw = String::from_utf8(server.await.unwrap()).unwrap();
    assert!(raw.contains("\r\nUser-Agent: repeater/1.0\r\n"));
    assert!(!raw.contains("scanner"));
    assert!(raw.contains("\r\nAccept: */*\r\n"));
}

#[tokio::test]
async fn test_timeout_is_reported_as_etimedout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
    });

    let mut options = request("GET", &format!("{}/slow", base));
    options.timeout = Some(Duration::from_millis(100));
    let result = runner(100).run(build(options)).await;

    assert_eq!(result.protocol, Protocol::Http);
    assert_eq!(result.error_code(), Some("ETIMEDOUT"));
    assert_eq!(result.status_code(), None);
    server.abort();
}

#[tokio::test]
async fn test_unresolvable_host_is_a_failed_response() {
    let result = runner(100)
        .run(build(request("GET", "http://nowhere.invalid/")))
        .await;

    assert!(result.is_failed());
    assert_eq!(result.protocol, Protocol::Http);
    assert_eq!(result.error_code(), Some("ENOTFOUND"));
    assert_eq!(result.status_code(), None);
}

#[tokio::test]
async fn test_refused_connection_is_a_failed_response() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = runner(100)
        .run(build(request("GET", &format!("http://{}/", addr))))
        .await;
    assert_eq!(result.error_code(), Some("ECONNREFUSED"));
}

#[tokio::test]
async fn test_keep_alive_reuses_one_socket() {
    let (base, accepted, server) = keep_alive_server(None).await;

    let runner = HttpRunner::new(HttpRunnerOptions {
        reuse_connection: true,
        max_sockets: 4,
        ..HttpRunnerOptions::default()
    });
    for _ in 0..3 {
        let result = runner.run(build(request("GET", &format!("{}/", base)))).await;
        assert_eq!(result.body(), Some("ok"));
    }

    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    server.abort();
}

/// Keep-alive server answering "ok"; each socket is closed `linger` after
/// its first reply when set.
async fn keep_alive_server(linger: Option<Duration>) -> (String, Arc<AtomicUsize>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    let server = tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                loop {
                    let request = read_request(&mut stream).await;
                    if request.is_empty() {
                        return;
                    }
                    let reply = response("HTTP/1.1 200 OK\r\nConnection: keep-alive", b"ok");
                    if stream.write_all(&reply).await.is_err() {
                        return;
                    }
                    if let Some(linger) = linger {
                        tokio::time::sleep(linger).await;
                        return;
                    }
                }
            });
        }
    });
    (base, accepted, server)
}

#[tokio::test]
async fn test_idle_socket_closed_by_peer_is_replaced() {
    let (base, accepted, server) = keep_alive_server(Some(Duration::from_millis(50))).await;
    let runner = HttpRunner::new(HttpRunnerOptions {
        reuse_connection: true,
        ..HttpRunnerOptions::default()
    });

    let first = runner.run(build(request("GET", &format!("{}/", base)))).await;
    assert_eq!(first.body(), Some("ok"));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second = runner.run(build(request("GET", &format!("{}/", base)))).await;
    assert_eq!(second.error_code(), None);
    assert_eq!(second.body(), Some("ok"));
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
    server.abort();
}

#[tokio::test]
async fn test_idle_sockets_count_against_max_sockets() {
    let (first_base, _, first_server) = keep_alive_server(None).await;
    let (second_base, _, second_server) = keep_alive_server(None).await;
    let runner = HttpRunner::new(HttpRunnerOptions {
        reuse_connection: true,
        max_sockets: 1,
        ..HttpRunnerOptions::default()
    });
    let pool = runner.pool().unwrap();
    let first_url = url::Url::parse(&format!("{}/", first_base)).unwrap();
    let second_url = url::Url::parse(&format!("{}/", second_base)).unwrap();
    let first_target = Target::from_url(&first_url).unwrap();
    let second_target = Target::from_url(&second_url).unwrap();

    let result = runner.run(build(request("GET", first_url.as_str()))).await;
    assert_eq!(result.body(), Some("ok"));
    assert_eq!(pool.idle_count(&first_target), 1);

    let result = runner.run(build(request("GET", second_url.as_str()))).await;
    assert_eq!(result.body(), Some("ok"));
    assert_eq!(pool.idle_count(&first_target), 0);
    assert_eq!(pool.idle_count(&second_target), 1);
    assert_eq!(pool.total_idle(), 1);

    first_server.abort();
    second_server.abort();
}
