//! Core cryptographic primitives (thin wrappers around ring and rsa)

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid symmetric key")]
    InvalidKey,
    #[error("AEAD seal failed")]
    Seal,
    #[error("AEAD authentication failed")]
    Authentication,
    #[error("RSA operation failed: {0}")]
    Rsa(#[from] ::rsa::Error),
    #[error("RSA-OAEP decryption failed")]
    Decrypt,
    #[error("PEM encoding: {0}")]
    Pem(String),
}

pub mod aead {
    //! AES-256-GCM with detached tags.
    use super::Error;
    use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};

    pub const KEY_LEN: usize = 32;
    pub const NONCE_LEN: usize = 12;
    pub const TAG_LEN: usize = 16;

    fn less_safe_key(key: &[u8; KEY_LEN]) -> Result<LessSafeKey, Error> {
        let unbound = UnboundKey::new(&aead::AES_256_GCM, key).map_err(|_| Error::InvalidKey)?;
        Ok(LessSafeKey::new(unbound))
    }

    /// Encrypt `pt`, returning the ciphertext (same length as `pt`) and the tag.
    pub fn seal(
        key: &[u8; KEY_LEN],
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        pt: &[u8],
    ) -> Result<(Vec<u8>, [u8; TAG_LEN]), Error> {
        let key = less_safe_key(key)?;
        let mut buf = pt.to_vec();
        let tag = key
            .seal_in_place_separate_tag(Nonce::assume_unique_for_key(*nonce), Aad::from(aad), &mut buf)
            .map_err(|_| Error::Seal)?;
        let mut out = [0u8; TAG_LEN];
        out.copy_from_slice(tag.as_ref());
        Ok((buf, out))
    }

    /// Verify `tag` and decrypt `ct`. Any mismatch is `Error::Authentication`.
    pub fn open(
        key: &[u8; KEY_LEN],
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        ct: &[u8],
        tag: &[u8; TAG_LEN],
    ) -> Result<Vec<u8>, Error> {
        let key = less_safe_key(key)?;
        let mut buf = Vec::with_capacity(ct.len() + TAG_LEN);
        buf.extend_from_slice(ct);
        buf.extend_from_slice(tag);
        let len = key
            .open_in_place(Nonce::assume_unique_for_key(*nonce), Aad::from(aad), &mut buf)
            .map_err(|_| Error::Authentication)?
            .len();
        buf.truncate(len);
        Ok(buf)
    }
}

pub mod rsa {
    //! RSA key pairs with OAEP(SHA-256, MGF1-SHA-256) encryption.
    use super::Error;
    use ::rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
    use ::rsa::traits::PublicKeyParts;
    use ::rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
    use rand::rngs::OsRng;
    use ring::digest::{digest, SHA256};
    use sha2::Sha256;
    use std::fmt;
    use zeroize::Zeroizing;

    pub const DEFAULT_BITS: usize = 2048;

    #[derive(Clone, PartialEq, Eq)]
    pub struct PublicKey(RsaPublicKey);

    impl PublicKey {
        pub fn from_pem(pem: &str) -> Result<Self, Error> {
            RsaPublicKey::from_public_key_pem(pem)
                .map(Self)
                .map_err(|e| Error::Pem(e.to_string()))
        }

        /// SPKI PEM (`-----BEGIN PUBLIC KEY-----`).
        pub fn to_pem(&self) -> Result<String, Error> {
            self.0
                .to_public_key_pem(LineEnding::LF)
                .map_err(|e| Error::Pem(e.to_string()))
        }

        /// Hex SHA-256 over the DER SPKI encoding.
        pub fn fingerprint(&self) -> Result<String, Error> {
            let der = self
                .0
                .to_public_key_der()
                .map_err(|e| Error::Pem(e.to_string()))?;
            Ok(hex::encode(digest(&SHA256, der.as_bytes())))
        }

        /// Length of every OAEP ciphertext under this key (modulus size in bytes).
        pub fn ciphertext_len(&self) -> usize {
            self.0.size()
        }

        pub fn encrypt(&self, msg: &[u8]) -> Result<Vec<u8>, Error> {
            Ok(self.0.encrypt(&mut OsRng, Oaep::new::<Sha256>(), msg)?)
        }
    }

    impl fmt::Debug for PublicKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("PublicKey")
                .field("bits", &(self.0.size() * 8))
                .finish()
        }
    }

    #[derive(Clone)]
    pub struct KeyPair {
        private: RsaPrivateKey,
        public: PublicKey,
    }

    impl KeyPair {
        pub fn generate(bits: usize) -> Result<Self, Error> {
            let private = RsaPrivateKey::new(&mut OsRng, bits)?;
            Ok(Self::from_private(private))
        }

        fn from_private(private: RsaPrivateKey) -> Self {
            let public = PublicKey(RsaPublicKey::from(&private));
            Self { private, public }
        }

        /// PKCS#8 private key PEM.
        pub fn from_pem(pem: &str) -> Result<Self, Error> {
            RsaPrivateKey::from_pkcs8_pem(pem)
                .map(Self::from_private)
                .map_err(|e| Error::Pem(e.to_string()))
        }

        pub fn to_pem(&self) -> Result<Zeroizing<String>, Error> {
            self.private
                .to_pkcs8_pem(LineEnding::LF)
                .map_err(|e| Error::Pem(e.to_string()))
        }

        pub fn public(&self) -> &PublicKey {
            &self.public
        }

        /// Any OAEP failure (wrong key, corrupted ciphertext) maps to `Error::Decrypt`.
        pub fn decrypt(&self, ct: &[u8]) -> Result<Vec<u8>, Error> {
            self.private
                .decrypt(Oaep::new::<Sha256>(), ct)
                .map_err(|_| Error::Decrypt)
        }
    }

    impl fmt::Debug for KeyPair {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("KeyPair")
                .field("public", &self.public)
                .finish_non_exhaustive()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, RngCore, SeedableRng};
    use std::sync::OnceLock;

    // 1024-bit keys keep debug-mode tests fast; OAEP-SHA256 still fits 62 bytes.
    fn test_pair() -> &'static rsa::KeyPair {
        static PAIR: OnceLock<rsa::KeyPair> = OnceLock::new();
        PAIR.get_or_init(|| rsa::KeyPair::generate(1024).unwrap())
    }

    #[test]
    fn aead_roundtrip_and_tamper() {
        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..64 {
            let mut key = [0u8; 32];
            let mut nonce = [0u8; 12];
            rng.fill_bytes(&mut key);
            rng.fill_bytes(&mut nonce);
            let mut pt = vec![0u8; (rng.next_u32() % 4096) as usize];
            rng.fill_bytes(&mut pt);

            let (ct, tag) = aead::seal(&key, &nonce, b"hdr", &pt).unwrap();
            assert_eq!(ct.len(), pt.len());
            assert_eq!(aead::open(&key, &nonce, b"hdr", &ct, &tag).unwrap(), pt);

            let mut bad_tag = tag;
            bad_tag[0] ^= 0x01;
            assert!(matches!(
                aead::open(&key, &nonce, b"hdr", &ct, &bad_tag),
                Err(Error::Authentication)
            ));
            assert!(aead::open(&key, &nonce, b"HDR", &ct, &tag).is_err());
        }
    }

    #[test]
    fn oaep_roundtrip() {
        let pair = test_pair();
        let secret = [42u8; 32];
        let ct = pair.public().encrypt(&secret).unwrap();
        assert_eq!(ct.len(), pair.public().ciphertext_len());
        assert_eq!(pair.decrypt(&ct).unwrap(), secret);
    }

    #[test]
    fn oaep_is_randomized() {
        let pair = test_pair();
        let a = pair.public().encrypt(b"same").unwrap();
        let b = pair.public().encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_private_key_fails_to_decrypt() {
        let other = rsa::KeyPair::generate(1024).unwrap();
        let ct = test_pair().public().encrypt(&[7u8; 32]).unwrap();
        assert!(matches!(other.decrypt(&ct), Err(Error::Decrypt)));
    }

    #[test]
    fn pem_roundtrip_preserves_fingerprint() {
        let pair = test_pair();
        let pub_pem = pair.public().to_pem().unwrap();
        assert!(pub_pem.starts_with("-----BEGIN PUBLIC KEY-----"));
        let public = rsa::PublicKey::from_pem(&pub_pem).unwrap();
        assert_eq!(&public, pair.public());
        assert_eq!(public.fingerprint().unwrap().len(), 64);

        let priv_pem = pair.to_pem().unwrap();
        let restored = rsa::KeyPair::from_pem(&priv_pem).unwrap();
        assert_eq!(
            restored.public().fingerprint().unwrap(),
            pair.public().fingerprint().unwrap()
        );
        assert!(rsa::PublicKey::from_pem("not a key").is_err());
    }
}
