//! Entry node configuration.
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tunnel::Limits;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EntryConfig {
    /// Address local clients connect to.
    pub listen: String,
    /// Exit node address as seen from here.
    pub exit_addr: String,
    /// SPKI PEM of the exit node's public key.
    pub exit_public_key: Option<PathBuf>,

    pub io_timeout_secs: u64,

    // Size limits (bytes)
    pub max_frame_len: usize,
    pub max_request_bytes: usize,

    pub max_connections: usize,
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            listen: String::from("127.0.0.1:8080"),
            exit_addr: String::from("127.0.0.1:9090"),
            exit_public_key: None,
            io_timeout_secs: 30,
            max_frame_len: core_framing::DEFAULT_MAX_FRAME_LEN,
            max_request_bytes: 1024 * 1024,
            max_connections: 1024,
        }
    }
}

impl EntryConfig {
    /// Defaults, then the TOML file if given, then `ENTRY_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("read config {}", p.display()))?;
                Self::from_toml_str(&raw).with_context(|| format!("parse config {}", p.display()))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|k| std::env::var(k).ok())?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ENTRY_LISTEN") {
            self.listen = v;
        }
        if let Some(v) = lookup("ENTRY_EXIT_ADDR") {
            self.exit_addr = v;
        }
        if let Some(v) = lookup("ENTRY_EXIT_PUBLIC_KEY") {
            self.exit_public_key = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("ENTRY_IO_TIMEOUT_SECS") {
            self.io_timeout_secs = v.parse().context("ENTRY_IO_TIMEOUT_SECS")?;
        }
        if let Some(v) = lookup("ENTRY_MAX_CONNECTIONS") {
            self.max_connections = v.parse().context("ENTRY_MAX_CONNECTIONS")?;
        }
        Ok(())
    }

    /// Checked after command-line flags are applied, since the key path is
    /// usually given there.
    pub fn validate(&self) -> Result<()> {
        if self.exit_public_key.is_none() {
            bail!("exit_public_key is required: the entry node must hold the exit node's public key");
        }
        if self.io_timeout_secs == 0 {
            bail!("io_timeout_secs must be non-zero");
        }
        if self.max_connections == 0 {
            bail!("max_connections must be non-zero");
        }
        if self.max_frame_len < core_framing::MIN_BODY_LEN {
            bail!("max_frame_len must be at least {}", core_framing::MIN_BODY_LEN);
        }
        if self.max_request_bytes == 0 {
            bail!("max_request_bytes must be non-zero");
        }
        Ok(())
    }

    pub fn limits(&self) -> Limits {
        Limits {
            io_timeout: Duration::from_secs(self.io_timeout_secs),
            max_frame_len: self.max_frame_len,
        }
    }

    /// Largest client request forwarded in one frame.
    pub fn request_limit(&self) -> usize {
        self.max_request_bytes.min(self.limits().max_payload_len())
    }
}
