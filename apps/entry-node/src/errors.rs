//! Entry relay failures. Every one of them ends the client connection; the
//! client sees a closed socket.

use std::time::Duration;
use thiserror::Error;
use tunnel::TunnelError;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Cannot reach exit node at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out connecting to exit node at {addr} after {after:?}")]
    ConnectTimeout { addr: String, after: Duration },

    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    #[error("Client IO error: {0}")]
    Client(#[source] std::io::Error),

    #[error("Client idle for {0:?}")]
    ClientTimeout(Duration),

    #[error("Client request exceeds {limit} bytes")]
    RequestTooLarge { limit: usize },
}

impl RelayError {
    /// Tampering, misconfigured keys or a confused peer, as opposed to a
    /// connection simply going away.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, RelayError::Tunnel(e) if e.is_protocol_violation())
    }

    /// Get type name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Connect { .. } => "exit_unreachable",
            RelayError::ConnectTimeout { .. } => "exit_timeout",
            RelayError::Tunnel(e) => e.kind(),
            RelayError::Client(_) => "client_io",
            RelayError::ClientTimeout(_) => "client_timeout",
            RelayError::RequestTooLarge { .. } => "request_too_large",
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
