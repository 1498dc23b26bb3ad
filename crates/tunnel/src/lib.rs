//! Encrypted entry<->exit tunnel.
//!
//! A session starts with the initiator sending a fresh 32-byte session key
//! under the responder's RSA-OAEP public key (`handshake`), after which both
//! sides exchange AES-256-GCM frames (`session`). Any handshake, framing or
//! authentication failure ends the session; nothing is retried under the
//! same key.

pub mod acceptor;
mod error;
pub mod handshake;
pub mod session;

use std::future::Future;
use std::time::Duration;

pub use core_crypto::rsa::{KeyPair, PublicKey};
pub use acceptor::serve_connections;
pub use error::{HandshakeError, TunnelError};
pub use handshake::{SessionKey, SESSION_KEY_LEN};
pub use session::{NonceSequence, Role, TunnelSession};

pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-session bounds shared by both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Upper bound on every single read or write.
    pub io_timeout: Duration,
    /// Largest accepted frame body (`Len` field).
    pub max_frame_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            io_timeout: DEFAULT_IO_TIMEOUT,
            max_frame_len: core_framing::DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl Limits {
    /// Largest plaintext that still fits in one frame.
    pub fn max_payload_len(&self) -> usize {
        self.max_frame_len.saturating_sub(core_framing::MIN_BODY_LEN)
    }
}

pub(crate) async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, TunnelError>
where
    F: Future<Output = Result<T, TunnelError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TunnelError::Timeout(limit))?
}
