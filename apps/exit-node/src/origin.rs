//! Plain HTTP/1.x exchange with the origin server.

use crate::errors::{OriginError, Result};
use crate::target::HttpTarget;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tracing::debug;

const HOP_BY_HOP: [&str; 3] = ["connection", "proxy-connection", "keep-alive"];

#[derive(Debug, Clone, Copy)]
pub struct OriginOptions {
    /// Covers resolution, connect, write and the full response read.
    pub timeout: Duration,
    pub max_response_bytes: usize,
}

/// Rewrite `request` for the origin: origin-form request line, a `Host`
/// header, `Connection: close` in place of hop-by-hop headers. Other header
/// lines and the body are copied through untouched.
pub fn build_origin_request(target: &HttpTarget, request: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(request.len() + 64);
    let head_len = match target.head_len {
        Some(n) => n,
        None => {
            out.extend_from_slice(
                format!(
                    "{} {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
                    target.method,
                    target.path,
                    target.authority()
                )
                .as_bytes(),
            );
            return out;
        }
    };

    out.extend_from_slice(
        format!("{} {} HTTP/1.{}\r\n", target.method, target.path, target.version).as_bytes(),
    );
    let mut saw_host = false;
    for line in request[..head_len].split(|&b| b == b'\n').skip(1) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        let name = line
            .iter()
            .position(|&b| b == b':')
            .map(|i| String::from_utf8_lossy(&line[..i]).trim().to_ascii_lowercase())
            .unwrap_or_default();
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        if name == "host" {
            saw_host = true;
        }
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }
    if !saw_host {
        out.extend_from_slice(format!("Host: {}\r\n", target.authority()).as_bytes());
    }
    out.extend_from_slice(b"Connection: close\r\n\r\n");
    out.extend_from_slice(&request[head_len..]);
    out
}

/// Send `request` to the target origin and return its raw response bytes.
pub async fn fetch(target: &HttpTarget, request: &[u8], opts: &OriginOptions) -> Result<Vec<u8>> {
    let outbound = build_origin_request(target, request);
    tokio::time::timeout(opts.timeout, exchange(target, &outbound, opts.max_response_bytes))
        .await
        .map_err(|_| OriginError::Timeout { after: opts.timeout })?
}

async fn exchange(target: &HttpTarget, outbound: &[u8], max_response_bytes: usize) -> Result<Vec<u8>> {
    let mut stream = connect(&target.host, target.port).await?;
    stream.write_all(outbound).await?;
    stream.flush().await?;

    let mut response = Vec::new();
    (&mut stream)
        .take(max_response_bytes as u64 + 1)
        .read_to_end(&mut response)
        .await?;
    if response.len() > max_response_bytes {
        return Err(OriginError::ResponseTooLarge {
            limit: max_response_bytes,
        });
    }
    if response.is_empty() {
        return Err(OriginError::EmptyResponse);
    }
    debug!(bytes = response.len(), "origin response read");
    Ok(response)
}

async fn connect(host: &str, port: u16) -> Result<TcpStream> {
    let addrs: Vec<_> = lookup_host((host, port))
        .await
        .map_err(|source| OriginError::DnsResolutionFailed {
            host: host.to_string(),
            source,
        })?
        .collect();
    if addrs.is_empty() {
        return Err(OriginError::DnsResolutionFailed {
            host: host.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses"),
        });
    }

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                debug!(%addr, "origin connected");
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(OriginError::ConnectionRefused {
        host: host.to_string(),
        port,
        source: last_err.unwrap_or_else(|| io::ErrorKind::ConnectionRefused.into()),
    })
}
