//! Framed AES-GCM session over one byte stream.

use crate::{bounded, handshake, KeyPair, Limits, PublicKey, SessionKey, TunnelError};
use core_framing as framing;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::trace;

const ENTRY_TO_EXIT: [u8; 4] = *b"ENTR";
const EXIT_TO_ENTRY: [u8; 4] = *b"EXIT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Entry node: sent the session key.
    Initiator,
    /// Exit node: received the session key.
    Responder,
}

impl Role {
    fn tx_prefix(self) -> [u8; 4] {
        match self {
            Role::Initiator => ENTRY_TO_EXIT,
            Role::Responder => EXIT_TO_ENTRY,
        }
    }

    fn rx_prefix(self) -> [u8; 4] {
        match self {
            Role::Initiator => EXIT_TO_ENTRY,
            Role::Responder => ENTRY_TO_EXIT,
        }
    }
}

/// Nonces for one direction of one session: `[prefix(4) | counter(u64 BE)]`.
/// The prefix differs per direction, so both sides can count from zero under
/// the same key without ever producing the same nonce.
#[derive(Debug)]
pub struct NonceSequence {
    prefix: [u8; 4],
    next: u64,
}

impl NonceSequence {
    fn new(prefix: [u8; 4]) -> Self {
        Self { prefix, next: 0 }
    }

    pub fn outbound(role: Role) -> Self {
        Self::new(role.tx_prefix())
    }

    pub fn inbound(role: Role) -> Self {
        Self::new(role.rx_prefix())
    }

    fn nonce_at(&self, ctr: u64) -> [u8; 12] {
        let mut n = [0u8; 12];
        n[..4].copy_from_slice(&self.prefix);
        n[4..].copy_from_slice(&ctr.to_be_bytes());
        n
    }

    pub fn next_nonce(&mut self) -> Result<[u8; 12], TunnelError> {
        if self.next == u64::MAX {
            return Err(TunnelError::NonceExhausted);
        }
        let n = self.nonce_at(self.next);
        self.next += 1;
        Ok(n)
    }

    /// Accept `nonce` only if it is exactly the next one expected from the peer.
    fn admit(&mut self, nonce: &[u8; 12]) -> Result<(), TunnelError> {
        if self.next == u64::MAX {
            return Err(TunnelError::NonceExhausted);
        }
        if *nonce != self.nonce_at(self.next) {
            return Err(TunnelError::NonceReplay { expected: self.next });
        }
        self.next += 1;
        Ok(())
    }

    pub fn count(&self) -> u64 {
        self.next
    }
}

/// One encrypted session. Not shared between tasks; the owning relay loop
/// serializes `send`/`receive`.
pub struct TunnelSession<S> {
    stream: S,
    key: SessionKey,
    role: Role,
    tx: NonceSequence,
    rx: NonceSequence,
    limits: Limits,
}

impl<S> std::fmt::Debug for TunnelSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelSession")
            .field("role", &self.role)
            .field("sent", &self.tx.count())
            .field("received", &self.rx.count())
            .finish_non_exhaustive()
    }
}

impl<S> TunnelSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, key: SessionKey, role: Role, limits: Limits) -> Self {
        Self {
            stream,
            key,
            role,
            tx: NonceSequence::outbound(role),
            rx: NonceSequence::inbound(role),
            limits,
        }
    }

    /// Run the initiator handshake on `stream` and wrap it.
    pub async fn connect(mut stream: S, exit_key: &PublicKey, limits: Limits) -> Result<Self, TunnelError> {
        let key = handshake::initiate(&mut stream, exit_key, &limits).await?;
        Ok(Self::new(stream, key, Role::Initiator, limits))
    }

    /// Run the responder handshake on `stream` and wrap it.
    pub async fn accept(mut stream: S, key_pair: &KeyPair, limits: Limits) -> Result<Self, TunnelError> {
        let key = handshake::accept(&mut stream, key_pair, &limits).await?;
        Ok(Self::new(stream, key, Role::Responder, limits))
    }

    pub async fn send(&mut self, plaintext: &[u8]) -> Result<(), TunnelError> {
        let nonce = self.tx.next_nonce()?;
        let frame = framing::seal(self.key.as_bytes(), nonce, plaintext)?;
        if frame.body_len() > self.limits.max_frame_len {
            return Err(TunnelError::Frame(framing::Error::Oversized {
                len: frame.body_len(),
                max: self.limits.max_frame_len,
            }));
        }
        let stream = &mut self.stream;
        bounded(self.limits.io_timeout, async move {
            framing::write_frame(stream, &frame).await?;
            Ok(())
        })
        .await?;
        trace!(len = plaintext.len(), "frame sent");
        Ok(())
    }

    /// Receive one message. Every error is terminal for the session.
    pub async fn receive(&mut self) -> Result<Vec<u8>, TunnelError> {
        let max = self.limits.max_frame_len;
        let stream = &mut self.stream;
        let frame = bounded(self.limits.io_timeout, async move {
            Ok(framing::read_frame(stream, max).await?)
        })
        .await?;
        self.rx.admit(&frame.nonce)?;
        let plaintext = frame.open(self.key.as_bytes())?;
        trace!(len = plaintext.len(), "frame received");
        Ok(plaintext)
    }

    /// (frames sent, frames received)
    pub fn frame_counts(&self) -> (u64, u64) {
        (self.tx.count(), self.rx.count())
    }

    /// Flush and close the write half; errors are ignored since the
    /// session is ending either way.
    pub async fn shutdown(&mut self) {
        let _ = tokio::time::timeout(self.limits.io_timeout, self.stream.shutdown()).await;
    }
}
