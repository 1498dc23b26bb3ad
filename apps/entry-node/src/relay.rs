//! Entry relay loop for one client connection.
//!
//! ```text
//! CONNECTING -> HANDSHAKE -> RELAYING -> CLOSED
//! ```
//! RELAYING forwards one client request as one frame and writes back the one
//! response frame before reading the next request.

use crate::config::EntryConfig;
use crate::errors::{RelayError, Result};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;
use tunnel::{PublicKey, TunnelSession};

const READ_CHUNK: usize = 16 * 1024;

/// Connect to the exit node and relay `client` through it. Returns the
/// number of request/response pairs relayed.
pub async fn handle_client<C>(mut client: C, exit_key: &PublicKey, config: &EntryConfig) -> Result<u64>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    debug!(state = "CONNECTING", exit = %config.exit_addr, "entry relay");
    let limits = config.limits();
    let exit_stream = match tokio::time::timeout(limits.io_timeout, TcpStream::connect(&config.exit_addr)).await {
        Ok(Ok(s)) => s,
        Ok(Err(source)) => {
            close_client(&mut client, limits.io_timeout).await;
            return Err(RelayError::Connect {
                addr: config.exit_addr.clone(),
                source,
            });
        }
        Err(_) => {
            close_client(&mut client, limits.io_timeout).await;
            return Err(RelayError::ConnectTimeout {
                addr: config.exit_addr.clone(),
                after: limits.io_timeout,
            });
        }
    };
    let _ = exit_stream.set_nodelay(true);
    relay(client, exit_stream, exit_key, config).await
}

/// HANDSHAKE, RELAYING and CLOSED over an already connected exit stream.
/// Both streams are shut down on every return path.
pub async fn relay<C, S>(mut client: C, exit_stream: S, exit_key: &PublicKey, config: &EntryConfig) -> Result<u64>
where
    C: AsyncRead + AsyncWrite + Unpin,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let limits = config.limits();

    debug!(state = "HANDSHAKE", "entry relay");
    let mut session = match TunnelSession::connect(exit_stream, exit_key, limits).await {
        Ok(s) => s,
        Err(e) => {
            close_client(&mut client, limits.io_timeout).await;
            return Err(e.into());
        }
    };

    debug!(state = "RELAYING", "entry relay");
    let result = pump(&mut client, &mut session, config).await;

    debug!(state = "CLOSED", "entry relay");
    session.shutdown().await;
    close_client(&mut client, limits.io_timeout).await;
    result
}

async fn pump<C, S>(client: &mut C, session: &mut TunnelSession<S>, config: &EntryConfig) -> Result<u64>
where
    C: AsyncRead + AsyncWrite + Unpin,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let io_timeout = config.limits().io_timeout;
    let mut relayed = 0u64;
    loop {
        let request = match read_request(client, config.request_limit(), io_timeout).await? {
            Some(r) => r,
            None => return Ok(relayed),
        };
        debug!(bytes = request.len(), "client request");
        session.send(&request).await?;
        let response = session.receive().await?;
        debug!(bytes = response.len(), "exit response");

        tokio::time::timeout(io_timeout, async {
            client.write_all(&response).await?;
            client.flush().await
        })
        .await
        .map_err(|_| RelayError::ClientTimeout(io_timeout))?
        .map_err(RelayError::Client)?;
        relayed += 1;
    }
}

async fn close_client<C: AsyncWrite + Unpin>(client: &mut C, limit: Duration) {
    let _ = tokio::time::timeout(limit, client.shutdown()).await;
}

/// Read one client request. Keeps reading while the bytes are an incomplete
/// HTTP request; anything that is not HTTP goes out as soon as it arrives.
/// `None` means the client closed before sending anything.
pub async fn read_request<R>(reader: &mut R, max_bytes: usize, idle: Duration) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = match tokio::time::timeout(idle, reader.read(&mut chunk)).await {
            Ok(r) => r.map_err(RelayError::Client)?,
            Err(_) if buf.is_empty() => return Err(RelayError::ClientTimeout(idle)),
            Err(_) => {
                debug!(bytes = buf.len(), "client stalled mid-request, forwarding what arrived");
                return Ok(Some(buf));
            }
        };
        if n == 0 {
            return Ok((!buf.is_empty()).then_some(buf));
        }
        if buf.len() + n > max_bytes {
            return Err(RelayError::RequestTooLarge { limit: max_bytes });
        }
        buf.extend_from_slice(&chunk[..n]);
        if request_complete(&buf) {
            return Ok(Some(buf));
        }
    }
}

/// True once `buf` holds a whole request: the head and, when declared, the
/// full `Content-Length` body or the terminating chunk. Bytes that are not
/// HTTP count as complete.
pub fn request_complete(buf: &[u8]) -> bool {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut headers);
    let head_len = match req.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return false,
        Err(_) => return true,
    };
    let body = &buf[head_len..];

    let chunked = req.headers.iter().any(|h| {
        h.name.eq_ignore_ascii_case("transfer-encoding")
            && String::from_utf8_lossy(h.value).to_ascii_lowercase().contains("chunked")
    });
    if chunked {
        return chunked_body_complete(body);
    }

    let content_length = req
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("content-length"))
        .and_then(|h| std::str::from_utf8(h.value).ok())
        .and_then(|v| v.trim().parse::<usize>().ok());
    match content_length {
        Some(len) => body.len() >= len,
        None => true,
    }
}

/// Walk chunk-size lines up to the zero-size chunk and the blank line that
/// ends its trailers. A malformed size line counts as complete, like any
/// other bytes that are not HTTP.
fn chunked_body_complete(mut body: &[u8]) -> bool {
    loop {
        let (consumed, size) = match httparse::parse_chunk_size(body) {
            Ok(httparse::Status::Complete(parsed)) => parsed,
            Ok(httparse::Status::Partial) => return false,
            Err(_) => return true,
        };
        body = &body[consumed..];
        if size == 0 {
            return trailers_complete(body);
        }
        let Some(skip) = usize::try_from(size).ok().and_then(|n| n.checked_add(2)) else {
            return true;
        };
        if body.len() < skip {
            return false;
        }
        body = &body[skip..];
    }
}

fn trailers_complete(mut rest: &[u8]) -> bool {
    while let Some(end) = rest.windows(2).position(|w| w == b"\r\n") {
        if end == 0 {
            return true;
        }
        rest = &rest[end + 2..];
    }
    false
}
