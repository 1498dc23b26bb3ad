//! Exit node configuration.
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tunnel::Limits;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExitConfig {
    /// Address the entry node connects to.
    pub listen: String,

    // Key material
    pub private_key: Option<PathBuf>,
    pub public_key_out: Option<PathBuf>,
    pub rsa_bits: usize,

    // Origin used when a request carries neither an absolute URL nor a Host header
    pub fallback_host: String,
    pub fallback_port: u16,

    // Timeouts (seconds)
    pub io_timeout_secs: u64,
    pub origin_timeout_secs: u64,

    // Size limits (bytes)
    pub max_frame_len: usize,
    pub max_response_bytes: usize,

    pub max_connections: usize,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            listen: String::from("127.0.0.1:9090"),
            private_key: None,
            public_key_out: None,
            rsa_bits: core_crypto::rsa::DEFAULT_BITS,
            fallback_host: String::from("example.com"),
            fallback_port: 80,
            io_timeout_secs: 30,
            origin_timeout_secs: 10,
            max_frame_len: core_framing::DEFAULT_MAX_FRAME_LEN,
            max_response_bytes: core_framing::DEFAULT_MAX_FRAME_LEN - core_framing::MIN_BODY_LEN,
            max_connections: 1024,
        }
    }
}

impl ExitConfig {
    /// Defaults, then the TOML file if given, then `EXIT_*` environment overrides.
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
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("EXIT_LISTEN") {
            self.listen = v;
        }
        if let Some(v) = lookup("EXIT_PRIVATE_KEY") {
            self.private_key = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("EXIT_PUBLIC_KEY_OUT") {
            self.public_key_out = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("EXIT_FALLBACK_HOST") {
            self.fallback_host = v;
        }
        if let Some(v) = lookup("EXIT_FALLBACK_PORT") {
            self.fallback_port = v.parse().context("EXIT_FALLBACK_PORT")?;
        }
        if let Some(v) = lookup("EXIT_IO_TIMEOUT_SECS") {
            self.io_timeout_secs = v.parse().context("EXIT_IO_TIMEOUT_SECS")?;
        }
        if let Some(v) = lookup("EXIT_ORIGIN_TIMEOUT_SECS") {
            self.origin_timeout_secs = v.parse().context("EXIT_ORIGIN_TIMEOUT_SECS")?;
        }
        if let Some(v) = lookup("EXIT_MAX_CONNECTIONS") {
            self.max_connections = v.parse().context("EXIT_MAX_CONNECTIONS")?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.io_timeout_secs == 0 || self.origin_timeout_secs == 0 {
            bail!("timeouts must be non-zero");
        }
        // A slow origin must still leave time to send the synthetic error frame.
        if self.origin_timeout_secs >= self.io_timeout_secs {
            bail!(
                "origin_timeout_secs ({}) must be less than io_timeout_secs ({})",
                self.origin_timeout_secs,
                self.io_timeout_secs
            );
        }
        if self.max_connections == 0 {
            bail!("max_connections must be non-zero");
        }
        if self.max_frame_len < core_framing::MIN_BODY_LEN {
            bail!("max_frame_len must be at least {}", core_framing::MIN_BODY_LEN);
        }
        if self.fallback_host.is_empty() {
            bail!("fallback_host must not be empty");
        }
        Ok(())
    }

    pub fn limits(&self) -> Limits {
        Limits {
            io_timeout: Duration::from_secs(self.io_timeout_secs),
            max_frame_len: self.max_frame_len,
        }
    }

    pub fn origin_timeout(&self) -> Duration {
        Duration::from_secs(self.origin_timeout_secs)
    }

    /// Response cap actually enforced: a response must also fit in one frame.
    pub fn response_limit(&self) -> usize {
        self.max_response_bytes.min(self.limits().max_payload_len())
    }
}
