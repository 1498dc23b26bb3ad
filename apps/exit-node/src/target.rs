//! Works out which origin a decrypted request is meant for.
//!
//! Three sources, in order of preference:
//! ```text
//! GET http://host:port/path HTTP/1.1      -> AbsoluteUrl
//! GET /path HTTP/1.1\r\nHost: host:port   -> HostHeader
//! anything else with a request line       -> Fallback (configured origin)
//! ```

use crate::errors::{OriginError, Result};
use std::fmt;
use url::{Position, Url};

const MAX_HEADERS: usize = 64;
const DEFAULT_HTTP_PORT: u16 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSource {
    AbsoluteUrl,
    HostHeader,
    /// Degraded request routed to the configured fallback origin.
    Fallback,
}

impl TargetSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetSource::AbsoluteUrl => "absolute_url",
            TargetSource::HostHeader => "host_header",
            TargetSource::Fallback => "fallback",
        }
    }
}

impl fmt::Display for TargetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTarget {
    pub method: String,
    /// Second token of the request line, as received.
    pub raw_target: String,
    /// Bare host; IPv6 literals carry no brackets.
    pub host: String,
    pub port: u16,
    /// Origin-form path including any query.
    pub path: String,
    /// Minor HTTP version of a well-formed head.
    pub version: u8,
    /// Length of the request head when it parsed completely.
    pub head_len: Option<usize>,
    pub source: TargetSource,
}

impl HttpTarget {
    /// `host[:port]` suitable for a `Host` header.
    pub fn authority(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == DEFAULT_HTTP_PORT {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

/// Resolve the origin for `request`. Fails only for requests the relay
/// refuses outright (no request line, `CONNECT`, non-`http` schemes).
pub fn resolve_target(request: &[u8], fallback_host: &str, fallback_port: u16) -> Result<HttpTarget> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let (method, raw_target, version, head_len, host_header) = match req.parse(request) {
        Ok(httparse::Status::Complete(n)) => {
            let host = req
                .headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case("host"))
                .map(|h| String::from_utf8_lossy(h.value).trim().to_string())
                .filter(|h| !h.is_empty());
            (
                req.method.unwrap_or_default().to_string(),
                req.path.unwrap_or_default().to_string(),
                req.version.unwrap_or(1),
                Some(n),
                host,
            )
        }
        // Partial or malformed head: fall back to whitespace-splitting the first line.
        _ => {
            let (method, target) = split_request_line(request)?;
            (method, target, 1, None, None)
        }
    };

    if method.eq_ignore_ascii_case("CONNECT") {
        return Err(OriginError::Unsupported("CONNECT tunnelling".to_string()));
    }

    if raw_target.contains("://") {
        let url = Url::parse(&raw_target)
            .map_err(|e| OriginError::InvalidRequest(format!("Bad URL '{}': {}", raw_target, e)))?;
        if url.scheme() != "http" {
            return Err(OriginError::Unsupported(format!("scheme '{}'", url.scheme())));
        }
        let host = url
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| OriginError::InvalidRequest(format!("No host in '{}'", raw_target)))?;
        let port = url.port().unwrap_or(DEFAULT_HTTP_PORT);
        let path = url[Position::BeforePath..Position::AfterQuery].to_string();
        return Ok(HttpTarget {
            method,
            raw_target,
            host,
            port,
            path,
            version,
            head_len,
            source: TargetSource::AbsoluteUrl,
        });
    }

    let path = origin_form(&raw_target);
    if let Some(host_value) = host_header {
        let (host, port) = split_host_port(&host_value, DEFAULT_HTTP_PORT)?;
        return Ok(HttpTarget {
            method,
            raw_target,
            host,
            port,
            path,
            version,
            head_len,
            source: TargetSource::HostHeader,
        });
    }

    Ok(HttpTarget {
        method,
        raw_target,
        host: fallback_host.to_string(),
        port: fallback_port,
        path,
        version,
        head_len,
        source: TargetSource::Fallback,
    })
}

fn split_request_line(request: &[u8]) -> Result<(String, String)> {
    let end = request
        .iter()
        .position(|&b| b == b'\n')
        .unwrap_or(request.len());
    let line = String::from_utf8_lossy(&request[..end]);
    let mut tokens = line.split_whitespace();
    let method = tokens
        .next()
        .ok_or_else(|| OriginError::InvalidRequest("Empty request line".to_string()))?;
    let target = tokens.next().unwrap_or("/");
    Ok((method.to_string(), target.to_string()))
}

fn origin_form(target: &str) -> String {
    if target.starts_with('/') {
        target.to_string()
    } else {
        format!("/{}", target)
    }
}

/// Split `host[:port]`, accepting bracketed IPv6 literals.
pub fn split_host_port(value: &str, default_port: u16) -> Result<(String, u16)> {
    let value = value.trim();
    let (host, port) = if let Some(rest) = value.strip_prefix('[') {
        let close = rest
            .find(']')
            .ok_or_else(|| OriginError::InvalidRequest(format!("Unclosed IPv6 literal '{}'", value)))?;
        let port = rest[close + 1..].strip_prefix(':');
        (&rest[..close], port)
    } else {
        match value.rsplit_once(':') {
            Some((h, p)) if !h.contains(':') => (h, Some(p)),
            _ => (value, None),
        }
    };

    if host.is_empty() {
        return Err(OriginError::InvalidRequest("Empty hostname".to_string()));
    }
    let port = match port {
        Some(p) => p
            .parse::<u16>()
            .map_err(|_| OriginError::InvalidRequest(format!("Invalid port number: '{}'", p)))?,
        None => default_port,
    };
    Ok((host.to_string(), port))
}
