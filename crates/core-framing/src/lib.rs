//! Length-prefixed AEAD frames and their stream codec.
//!
//! Wire format:
//!   [Len(u32 BE) | Nonce(12) | Tag(16) | Ciphertext(Len - 28)]
//! `Len` counts every byte after the header. The 4-byte header is the AAD,
//! so a rewritten length fails authentication like any other tamper.

use bytes::{BufMut, Bytes, BytesMut};
use core_crypto as crypto;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const HEADER_LEN: usize = 4;
pub const NONCE_LEN: usize = crypto::aead::NONCE_LEN;
pub const TAG_LEN: usize = crypto::aead::TAG_LEN;
/// Smallest legal `Len`: an empty plaintext still carries nonce and tag.
pub const MIN_BODY_LEN: usize = NONCE_LEN + TAG_LEN;
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum Error {
    #[error("frame length {0} below minimum {MIN_BODY_LEN}")]
    TooShort(usize),
    #[error("frame length {len} exceeds maximum {max}")]
    Oversized { len: usize, max: usize },
    #[error("stream ended inside a frame")]
    Truncated,
    #[error("stream closed")]
    Closed,
    #[error("frame authentication failed")]
    Authentication,
    #[error("crypto: {0}")]
    Crypto(crypto::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<crypto::Error> for Error {
    fn from(e: crypto::Error) -> Self {
        match e {
            crypto::Error::Authentication => Error::Authentication,
            other => Error::Crypto(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; TAG_LEN],
    pub ciphertext: Vec<u8>,
}

impl Frame {
    pub fn body_len(&self) -> usize {
        MIN_BODY_LEN + self.ciphertext.len()
    }

    fn header(&self) -> [u8; HEADER_LEN] {
        header_for(self.ciphertext.len())
    }

    pub fn encode(&self) -> Bytes {
        let mut b = BytesMut::with_capacity(HEADER_LEN + self.body_len());
        b.put_slice(&self.header());
        b.put_slice(&self.nonce);
        b.put_slice(&self.tag);
        b.put_slice(&self.ciphertext);
        b.freeze()
    }

    /// Decode one frame from the front of `src`, returning it with the number
    /// of bytes consumed.
    pub fn decode(src: &[u8], max_len: usize) -> Result<(Frame, usize), Error> {
        if src.len() < HEADER_LEN {
            return Err(Error::Truncated);
        }
        let len = check_len(read_len(&src[..HEADER_LEN]), max_len)?;
        let end = HEADER_LEN + len;
        if src.len() < end {
            return Err(Error::Truncated);
        }
        Ok((split_body(&src[HEADER_LEN..end]), end))
    }

    /// Authenticate and decrypt.
    pub fn open(&self, key: &[u8; 32]) -> Result<Vec<u8>, Error> {
        let aad = self.header();
        Ok(crypto::aead::open(key, &self.nonce, &aad, &self.ciphertext, &self.tag)?)
    }
}

/// Encrypt `pt` into a frame under `key` and `nonce`. The caller owns nonce uniqueness.
pub fn seal(key: &[u8; 32], nonce: [u8; NONCE_LEN], pt: &[u8]) -> Result<Frame, Error> {
    let body = MIN_BODY_LEN + pt.len();
    if body > u32::MAX as usize {
        return Err(Error::Oversized { len: body, max: u32::MAX as usize });
    }
    let aad = header_for(pt.len());
    let (ciphertext, tag) = crypto::aead::seal(key, &nonce, &aad, pt)?;
    Ok(Frame { nonce, tag, ciphertext })
}

/// Read exactly one frame. A clean EOF before the first header byte is
/// `Error::Closed`; EOF anywhere later is `Error::Truncated`.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Frame, Error>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let n = reader.read(&mut header).await?;
    if n == 0 {
        return Err(Error::Closed);
    }
    reader.read_exact(&mut header[n..]).await.map_err(eof_is_truncation)?;
    let len = check_len(read_len(&header), max_len)?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(eof_is_truncation)?;
    Ok(split_body(&body))
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.encode()).await?;
    writer.flush().await?;
    Ok(())
}

fn header_for(ct_len: usize) -> [u8; HEADER_LEN] {
    ((MIN_BODY_LEN + ct_len) as u32).to_be_bytes()
}

fn read_len(header: &[u8]) -> usize {
    u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize
}

fn check_len(len: usize, max_len: usize) -> Result<usize, Error> {
    if len < MIN_BODY_LEN {
        return Err(Error::TooShort(len));
    }
    if len > max_len {
        return Err(Error::Oversized { len, max: max_len });
    }
    Ok(len)
}

// `body` is at least MIN_BODY_LEN long (checked by `check_len`).
fn split_body(body: &[u8]) -> Frame {
    let mut nonce = [0u8; NONCE_LEN];
    let mut tag = [0u8; TAG_LEN];
    nonce.copy_from_slice(&body[..NONCE_LEN]);
    tag.copy_from_slice(&body[NONCE_LEN..MIN_BODY_LEN]);
    Frame {
        nonce,
        tag,
        ciphertext: body[MIN_BODY_LEN..].to_vec(),
    }
}

fn eof_is_truncation(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::Truncated
    } else {
        Error::Io(e)
    }
}
