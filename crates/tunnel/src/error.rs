use core_framing as framing;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandshakeError {
    /// OAEP decryption failed: the initiator did not use this node's public key.
    #[error("handshake key mismatch: session key was not encrypted to this node's public key")]
    KeyMismatch,

    #[error("session key must be {expected} bytes, got {got}")]
    BadKeyLength { expected: usize, got: usize },

    #[error("peer closed before sending the {expected}-byte session key ciphertext")]
    Truncated { expected: usize },

    #[error("encrypting session key: {0}")]
    Encrypt(core_crypto::Error),
}

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error("frame error: {0}")]
    Frame(framing::Error),

    #[error("frame failed authentication")]
    Authentication,

    #[error("unexpected nonce (expected counter {expected})")]
    NonceReplay { expected: u64 },

    #[error("nonce counter exhausted for this session")]
    NonceExhausted,

    #[error("transport: {0}")]
    Transport(#[from] std::io::Error),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("peer closed the tunnel")]
    Closed,
}

impl From<framing::Error> for TunnelError {
    fn from(e: framing::Error) -> Self {
        match e {
            framing::Error::Authentication => TunnelError::Authentication,
            framing::Error::Closed => TunnelError::Closed,
            framing::Error::Io(io) => TunnelError::Transport(io),
            other => TunnelError::Frame(other),
        }
    }
}

impl TunnelError {
    /// True for failures caused by a misbehaving or misconfigured peer rather
    /// than by the transport going away.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            TunnelError::Handshake(_)
                | TunnelError::Frame(_)
                | TunnelError::Authentication
                | TunnelError::NonceReplay { .. }
        )
    }

    /// Short stable label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TunnelError::Handshake(HandshakeError::KeyMismatch) => "handshake_key_mismatch",
            TunnelError::Handshake(_) => "handshake",
            TunnelError::Frame(_) => "frame",
            TunnelError::Authentication => "authentication",
            TunnelError::NonceReplay { .. } => "nonce_replay",
            TunnelError::NonceExhausted => "nonce_exhausted",
            TunnelError::Transport(_) => "transport",
            TunnelError::Timeout(_) => "timeout",
            TunnelError::Closed => "closed",
        }
    }
}
