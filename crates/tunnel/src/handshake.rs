//! Session key exchange: the first message on every entry->exit connection is
//! the RSA-OAEP(SHA-256) ciphertext of a fresh 32-byte key, sent raw.

use crate::{bounded, HandshakeError, KeyPair, Limits, PublicKey, TunnelError};
use rand::{rngs::OsRng, RngCore};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

pub const SESSION_KEY_LEN: usize = 32;

/// AES-256-GCM key for one connection. Wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    pub fn generate() -> Self {
        let mut key = SessionKey([0u8; SESSION_KEY_LEN]);
        OsRng.fill_bytes(&mut key.0);
        key
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, HandshakeError> {
        if bytes.len() != SESSION_KEY_LEN {
            return Err(HandshakeError::BadKeyLength {
                expected: SESSION_KEY_LEN,
                got: bytes.len(),
            });
        }
        let mut key = SessionKey([0u8; SESSION_KEY_LEN]);
        key.0.copy_from_slice(bytes);
        Ok(key)
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Entry side: generate a key, send it encrypted to the exit node's public key.
pub async fn initiate<S>(
    stream: &mut S,
    exit_key: &PublicKey,
    limits: &Limits,
) -> Result<SessionKey, TunnelError>
where
    S: AsyncWrite + Unpin,
{
    let key = SessionKey::generate();
    let ct = exit_key
        .encrypt(key.as_bytes())
        .map_err(HandshakeError::Encrypt)?;
    bounded(limits.io_timeout, async {
        stream.write_all(&ct).await?;
        stream.flush().await?;
        Ok(())
    })
    .await?;
    debug!(ciphertext_len = ct.len(), "session key sent");
    Ok(key)
}

/// Exit side: read exactly one modulus-sized ciphertext and recover the key.
pub async fn accept<S>(
    stream: &mut S,
    key_pair: &KeyPair,
    limits: &Limits,
) -> Result<SessionKey, TunnelError>
where
    S: AsyncRead + Unpin,
{
    let expected = key_pair.public().ciphertext_len();
    let mut ct = vec![0u8; expected];
    bounded(limits.io_timeout, async {
        stream.read_exact(&mut ct).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TunnelError::Handshake(HandshakeError::Truncated { expected })
            } else {
                TunnelError::Transport(e)
            }
        })?;
        Ok(())
    })
    .await?;
    let pt = Zeroizing::new(
        key_pair
            .decrypt(&ct)
            .map_err(|_| HandshakeError::KeyMismatch)?,
    );
    let key = SessionKey::from_slice(&pt)?;
    debug!("session key accepted");
    Ok(key)
}
