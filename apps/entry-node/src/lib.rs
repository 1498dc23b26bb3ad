//! Entry node: accepts plaintext HTTP from local clients and carries it to
//! the exit node through an encrypted tunnel.

pub mod config;
pub mod errors;
pub mod relay;

pub use config::EntryConfig;
pub use errors::RelayError;
pub use relay::{handle_client, read_request};

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use tunnel::PublicKey;

/// One entry node instance bound to one exit node key.
#[derive(Clone)]
pub struct EntryNode {
    inner: Arc<Inner>,
}

struct Inner {
    config: EntryConfig,
    exit_key: PublicKey,
}

impl EntryNode {
    pub fn new(config: EntryConfig, exit_key: PublicKey) -> Self {
        Self {
            inner: Arc::new(Inner { config, exit_key }),
        }
    }

    /// Validate `config` and load the exit node's public key it points at.
    pub fn from_config(config: EntryConfig) -> Result<Self> {
        config.validate()?;
        let path = config
            .exit_public_key
            .as_ref()
            .context("exit_public_key is not set")?;
        let pem = std::fs::read_to_string(path)
            .with_context(|| format!("read exit public key {}", path.display()))?;
        let exit_key = PublicKey::from_pem(&pem)
            .with_context(|| format!("parse exit public key {}", path.display()))?;
        Ok(Self::new(config, exit_key))
    }

    pub fn config(&self) -> &EntryConfig {
        &self.inner.config
    }

    pub fn exit_key(&self) -> &PublicKey {
        &self.inner.exit_key
    }

    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind(&self.inner.config.listen).await
    }

    /// Accept client connections forever.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, exit = %self.inner.config.exit_addr, "entry node listening");
        }
        let max = self.inner.config.max_connections;
        let node = self.inner;
        tunnel::serve_connections(listener, "entry", max, move |stream, _peer| {
            let node = node.clone();
            async move {
                match handle_client(stream, &node.exit_key, &node.config).await {
                    Ok(requests) => debug!(requests, "client closed"),
                    Err(e) if e.is_protocol_violation() => {
                        warn!(kind = e.kind(), error = %e, "tunnel aborted")
                    }
                    Err(e @ (RelayError::Connect { .. } | RelayError::ConnectTimeout { .. })) => {
                        warn!(kind = e.kind(), error = %e, "exit node unreachable")
                    }
                    Err(e) => info!(kind = e.kind(), error = %e, "client session ended"),
                }
            }
        })
        .await
    }
}
