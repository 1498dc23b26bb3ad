//! Origin-side failures. None of these end the tunnel session: each one is
//! turned into a synthetic HTTP response and sent back like any other payload.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OriginError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not supported by this relay: {0}")]
    Unsupported(String),

    #[error("DNS resolution failed for host '{host}': {source}")]
    DnsResolutionFailed {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection refused to {host}:{port}: {source}")]
    ConnectionRefused {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Origin timeout after {after:?}")]
    Timeout { after: Duration },

    #[error("Origin response exceeds {limit} bytes")]
    ResponseTooLarge { limit: usize },

    #[error("Origin closed the connection without a response")]
    EmptyResponse,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OriginError {
    /// Map to HTTP status line text
    pub fn http_status_code(&self) -> &'static str {
        match self {
            OriginError::InvalidRequest(_) => "400 Bad Request",
            OriginError::Unsupported(_) => "501 Not Implemented",
            OriginError::DnsResolutionFailed { .. } => "502 Bad Gateway",
            OriginError::ConnectionRefused { .. } => "502 Bad Gateway",
            OriginError::Timeout { .. } => "504 Gateway Timeout",
            OriginError::ResponseTooLarge { .. } => "502 Bad Gateway",
            OriginError::EmptyResponse => "502 Bad Gateway",
            OriginError::Io(_) => "502 Bad Gateway",
        }
    }

    /// Synthetic response sent through the tunnel in place of the origin's.
    pub fn to_http_response(&self) -> Vec<u8> {
        let status = self.http_status_code();
        let body = format!("Relay error: {}\r\n", self);
        let header = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nContent-Type: text/plain; charset=utf-8\r\nX-Relay-Error: {}\r\nConnection: close\r\n\r\n",
            status,
            body.len(),
            self.type_name()
        );
        format!("{}{}", header, body).into_bytes()
    }

    /// Get type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            OriginError::InvalidRequest(_) => "invalid_request",
            OriginError::Unsupported(_) => "unsupported",
            OriginError::DnsResolutionFailed { .. } => "dns_failed",
            OriginError::ConnectionRefused { .. } => "connection_refused",
            OriginError::Timeout { .. } => "timeout",
            OriginError::ResponseTooLarge { .. } => "response_too_large",
            OriginError::EmptyResponse => "empty_response",
            OriginError::Io(_) => "io_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, OriginError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_response_is_well_formed() {
        let err = OriginError::Timeout {
            after: Duration::from_secs(10),
        };
        let resp = String::from_utf8(err.to_http_response()).unwrap();
        let (head, body) = resp.split_once("\r\n\r\n").unwrap();
        assert!(head.starts_with("HTTP/1.1 504 Gateway Timeout\r\n"));
        assert!(head.contains("X-Relay-Error: timeout"));
        let declared: usize = head
            .lines()
            .find_map(|l| l.strip_prefix("Content-Length: "))
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(declared, body.len());
        assert!(body.contains("Origin timeout after 10s"));
    }

    #[test]
    fn status_mapping() {
        let refused = OriginError::ConnectionRefused {
            host: "h".into(),
            port: 80,
            source: std::io::ErrorKind::ConnectionRefused.into(),
        };
        assert_eq!(refused.http_status_code(), "502 Bad Gateway");
        assert_eq!(refused.type_name(), "connection_refused");
        assert_eq!(
            OriginError::Unsupported("CONNECT".into()).http_status_code(),
            "501 Not Implemented"
        );
    }
}
