//! End-to-end relay tests: client -> entry node -> exit node -> stub origin,
//! all over loopback sockets.

use entry_node::{EntryConfig, EntryNode};
use exit_node::{ExitConfig, ExitNode};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tunnel::{KeyPair, Limits, PublicKey};

const DEADLINE: Duration = Duration::from_secs(10);

fn exit_keys() -> KeyPair {
    static KEYS: OnceLock<KeyPair> = OnceLock::new();
    KEYS.get_or_init(|| KeyPair::generate(1024).unwrap()).clone()
}

fn exit_config() -> ExitConfig {
    ExitConfig {
        listen: "127.0.0.1:0".to_string(),
        io_timeout_secs: 5,
        origin_timeout_secs: 3,
        ..ExitConfig::default()
    }
}

async fn start_exit(config: ExitConfig) -> SocketAddr {
    let node = ExitNode::new(config, exit_keys());
    let listener = node.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(node.serve(listener));
    addr
}

async fn start_entry(exit_addr: SocketAddr, exit_key: PublicKey) -> SocketAddr {
    let config = EntryConfig {
        listen: "127.0.0.1:0".to_string(),
        exit_addr: exit_addr.to_string(),
        io_timeout_secs: 5,
        ..EntryConfig::default()
    };
    let node = EntryNode::new(config, exit_key);
    let listener = node.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(node.serve(listener));
    addr
}

/// Entry and exit wired together with the exit's real public key.
async fn start_relay(config: ExitConfig) -> SocketAddr {
    let exit = start_exit(config).await;
    start_entry(exit, exit_keys().public().clone()).await
}

type Seen = Arc<Mutex<Vec<Vec<u8>>>>;

/// Origin that records each request (head plus `Content-Length` body) and
/// answers with `response`, then closes.
async fn start_origin(response: Vec<u8>) -> (SocketAddr, Seen) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen: Seen = Arc::default();
    let record = seen.clone();
    let response = Arc::new(response);
    tokio::spawn(async move {
        while let Ok((mut s, _)) = listener.accept().await {
            let record = record.clone();
            let response = response.clone();
            tokio::spawn(async move {
                let Some(request) = read_origin_request(&mut s).await else {
                    return;
                };
                record.lock().unwrap().push(request);
                let _ = s.write_all(&response).await;
            });
        }
    });
    (addr, seen)
}

async fn read_origin_request(s: &mut TcpStream) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(i) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break i + 4;
        }
        let n = s.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };
    let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
    let body_len = head
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < head_end + body_len {
        let n = s.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Some(buf)
}

/// One request, half-close, read until the relay closes the connection.
async fn exchange(entry: SocketAddr, request: &[u8]) -> Vec<u8> {
    tokio::time::timeout(DEADLINE, async {
        let mut c = TcpStream::connect(entry).await.unwrap();
        c.write_all(request).await.unwrap();
        c.shutdown().await.unwrap();
        let mut out = Vec::new();
        // A dropped connection may surface as a reset; callers check the bytes.
        let _ = c.read_to_end(&mut out).await;
        out
    })
    .await
    .expect("relay did not answer in time")
}

fn ok_response(body: &[u8]) -> Vec<u8> {
    let mut r = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\nX-Origin:  raw \r\n\r\n", body.len()).into_bytes();
    r.extend_from_slice(body);
    r
}

#[tokio::test]
async fn host_header_request_returns_origin_bytes_unmodified() {
    let response = ok_response(b"<html>origin</html>");
    let (origin, seen) = start_origin(response.clone()).await;
    let entry = start_relay(exit_config()).await;

    let request = format!("GET / HTTP/1.1\r\nHost: {}\r\n\r\n", origin);
    let got = exchange(entry, request.as_bytes()).await;
    assert_eq!(got, response);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(
        String::from_utf8_lossy(&seen[0]),
        format!("GET / HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n", origin)
    );
}

#[tokio::test]
async fn absolute_url_request_is_rewritten_to_origin_form() {
    let (origin, seen) = start_origin(ok_response(b"abs")).await;
    let entry = start_relay(exit_config()).await;

    let request = format!(
        "GET http://{}/search?q=relay HTTP/1.1\r\nProxy-Connection: keep-alive\r\nAccept: */*\r\n\r\n",
        origin
    );
    let got = exchange(entry, request.as_bytes()).await;
    assert_eq!(got, ok_response(b"abs"));
    assert_eq!(
        String::from_utf8_lossy(&seen.lock().unwrap()[0]),
        format!(
            "GET /search?q=relay HTTP/1.1\r\nAccept: */*\r\nHost: {}\r\nConnection: close\r\n\r\n",
            origin
        )
    );
}

#[tokio::test]
async fn request_body_sent_in_pieces_reaches_origin() {
    let (origin, seen) = start_origin(ok_response(b"created")).await;
    let entry = start_relay(exit_config()).await;

    let got = tokio::time::timeout(DEADLINE, async {
        let mut c = TcpStream::connect(entry).await.unwrap();
        let head = format!("POST /items HTTP/1.1\r\nHost: {}\r\nContent-Length: 11\r\n\r\n", origin);
        c.write_all(head.as_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        c.write_all(b"hello ").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        c.write_all(b"world").await.unwrap();
        c.shutdown().await.unwrap();
        let mut out = Vec::new();
        c.read_to_end(&mut out).await.unwrap();
        out
    })
    .await
    .unwrap();

    assert_eq!(got, ok_response(b"created"));
    assert!(seen.lock().unwrap()[0].ends_with(b"\r\n\r\nhello world"));
}

#[tokio::test]
async fn fallback_origin_serves_requests_without_a_host() {
    let (origin, seen) = start_origin(ok_response(b"fallback")).await;
    let entry = start_relay(ExitConfig {
        fallback_host: origin.ip().to_string(),
        fallback_port: origin.port(),
        ..exit_config()
    })
    .await;

    let got = exchange(entry, b"GET /fb HTTP/1.1\r\n\r\n").await;
    assert_eq!(got, ok_response(b"fallback"));
    assert_eq!(
        String::from_utf8_lossy(&seen.lock().unwrap()[0]),
        format!("GET /fb HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n", origin)
    );
}

#[tokio::test]
async fn unreachable_origin_yields_synthetic_error_response() {
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = closed.local_addr().unwrap();
    drop(closed);
    let entry = start_relay(exit_config()).await;

    let request = format!("GET / HTTP/1.1\r\nHost: {}\r\n\r\n", origin);
    let got = String::from_utf8(exchange(entry, request.as_bytes()).await).unwrap();
    assert!(got.starts_with("HTTP/1.1 502 Bad Gateway\r\n"), "{got}");
    assert!(got.contains("X-Relay-Error: connection_refused\r\n"));
    assert!(got.contains("Relay error: Connection refused"));
}

#[tokio::test]
async fn connect_requests_are_refused_not_dropped() {
    let entry = start_relay(exit_config()).await;
    let got = exchange(entry, b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n").await;
    assert!(got.starts_with(b"HTTP/1.1 501 Not Implemented\r\n"));
}

#[tokio::test]
async fn large_response_survives_framing() {
    let body: Vec<u8> = (0..(1usize << 20)).map(|i| (i % 251) as u8).collect();
    let response = ok_response(&body);
    let (origin, _seen) = start_origin(response.clone()).await;
    let entry = start_relay(exit_config()).await;

    let request = format!("GET /big HTTP/1.1\r\nHost: {}\r\n\r\n", origin);
    let got = exchange(entry, request.as_bytes()).await;
    assert_eq!(got.len(), response.len());
    assert!(got == response);
}

#[tokio::test]
async fn keep_alive_client_relays_sequential_requests() {
    let response = ok_response(b"again");
    let (origin, seen) = start_origin(response.clone()).await;
    let entry = start_relay(exit_config()).await;

    tokio::time::timeout(DEADLINE, async {
        let mut c = TcpStream::connect(entry).await.unwrap();
        for i in 0..3 {
            let request = format!("GET /{} HTTP/1.1\r\nHost: {}\r\n\r\n", i, origin);
            c.write_all(request.as_bytes()).await.unwrap();
            let mut got = vec![0u8; response.len()];
            c.read_exact(&mut got).await.unwrap();
            assert_eq!(got, response);
        }
    })
    .await
    .unwrap();
    assert_eq!(seen.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn concurrent_clients_are_independent() {
    let (origin, _seen) = start_origin(ok_response(b"parallel")).await;
    let entry = start_relay(exit_config()).await;

    let mut clients = Vec::new();
    for i in 0..8 {
        clients.push(tokio::spawn(async move {
            let request = format!("GET /{} HTTP/1.1\r\nHost: {}\r\n\r\n", i, origin);
            exchange(entry, request.as_bytes()).await
        }));
    }
    for c in clients {
        assert_eq!(c.await.unwrap(), ok_response(b"parallel"));
    }
}

#[tokio::test]
async fn oversized_frame_closes_only_that_session() {
    let response = ok_response(b"still here");
    let (origin, _seen) = start_origin(response.clone()).await;
    let exit = start_exit(ExitConfig {
        max_frame_len: 64 * 1024,
        ..exit_config()
    })
    .await;
    let entry = start_entry(exit, exit_keys().public().clone()).await;

    // A healthy session opened before the attack.
    let mut healthy = TcpStream::connect(entry).await.unwrap();
    let request = format!("GET / HTTP/1.1\r\nHost: {}\r\n\r\n", origin);
    healthy.write_all(request.as_bytes()).await.unwrap();
    let mut got = vec![0u8; response.len()];
    healthy.read_exact(&mut got).await.unwrap();
    assert_eq!(got, response);

    // Hand-rolled tunnel peer that announces a 16 MiB frame.
    let mut rogue = TcpStream::connect(exit).await.unwrap();
    let limits = Limits::default();
    let _key = tunnel::handshake::initiate(&mut rogue, exit_keys().public(), &limits)
        .await
        .unwrap();
    rogue.write_all(&(16u32 << 20).to_be_bytes()).await.unwrap();
    let mut rest = Vec::new();
    tokio::time::timeout(DEADLINE, rogue.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert!(rest.is_empty());

    // The open session and new sessions keep working.
    healthy.write_all(request.as_bytes()).await.unwrap();
    healthy.read_exact(&mut got).await.unwrap();
    assert_eq!(got, response);
    assert_eq!(exchange(entry, request.as_bytes()).await, response);
}

#[tokio::test]
async fn wrong_exit_key_drops_the_client_without_hurting_the_exit() {
    let response = ok_response(b"ok");
    let (origin, _seen) = start_origin(response.clone()).await;
    let exit = start_exit(exit_config()).await;

    // The entry node holds its own key instead of the exit's.
    let not_the_exit = KeyPair::generate(1024).unwrap();
    let misconfigured = start_entry(exit, not_the_exit.public().clone()).await;
    let request = format!("GET / HTTP/1.1\r\nHost: {}\r\n\r\n", origin);
    assert!(exchange(misconfigured, request.as_bytes()).await.is_empty());

    let entry = start_entry(exit, exit_keys().public().clone()).await;
    assert_eq!(exchange(entry, request.as_bytes()).await, response);
}
