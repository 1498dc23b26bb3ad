//! RSA key material on disk.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use tracing::info;
use tunnel::{KeyPair, PublicKey};

use crate::config::ExitConfig;

/// Load the configured private key, or generate a fresh pair for this run.
/// The public half is written to `public_key_out` when set.
pub fn load_or_generate(config: &ExitConfig) -> Result<KeyPair> {
    let keys = match &config.private_key {
        Some(path) => {
            let pem = std::fs::read_to_string(path)
                .with_context(|| format!("read private key {}", path.display()))?;
            KeyPair::from_pem(&pem).with_context(|| format!("parse private key {}", path.display()))?
        }
        None => {
            info!(bits = config.rsa_bits, "no private key configured, generating one");
            KeyPair::generate(config.rsa_bits).context("generate RSA key pair")?
        }
    };
    if let Some(out) = &config.public_key_out {
        write_public_key(keys.public(), out)?;
    }
    Ok(keys)
}

pub fn write_public_key(key: &PublicKey, path: &Path) -> Result<()> {
    let pem = key.to_pem().context("encode public key")?;
    std::fs::write(path, pem).with_context(|| format!("write public key {}", path.display()))
}

/// Write the private key readable by the owner only. Refuses to replace an
/// existing file.
pub fn write_private_key(keys: &KeyPair, path: &Path) -> Result<()> {
    let pem = keys.to_pem().context("encode private key")?;
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("create private key {}", path.display()))?;
    file.write_all(pem.as_bytes())
        .with_context(|| format!("write private key {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("sync private key {}", path.display()))
}
