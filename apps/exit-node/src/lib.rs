//! Exit node: terminates tunnel sessions from entry nodes and performs the
//! relayed HTTP requests against origin servers.

pub mod config;
pub mod errors;
pub mod handler;
pub mod keys;
pub mod origin;
pub mod target;

pub use config::ExitConfig;
pub use errors::OriginError;
pub use handler::{handle_entry_connection, serve_request};
pub use target::{resolve_target, HttpTarget, TargetSource};

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use tunnel::{KeyPair, PublicKey};

/// One exit node instance. Owns its key pair; clones share it read-only.
#[derive(Clone)]
pub struct ExitNode {
    inner: Arc<Inner>,
}

struct Inner {
    config: ExitConfig,
    keys: KeyPair,
}

impl ExitNode {
    pub fn new(config: ExitConfig, keys: KeyPair) -> Self {
        Self {
            inner: Arc::new(Inner { config, keys }),
        }
    }

    pub fn config(&self) -> &ExitConfig {
        &self.inner.config
    }

    pub fn public_key(&self) -> &PublicKey {
        self.inner.keys.public()
    }

    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind(&self.inner.config.listen).await
    }

    /// Accept entry-node connections forever.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "exit node listening");
        }
        let max = self.inner.config.max_connections;
        let node = self.inner;
        tunnel::serve_connections(listener, "exit", max, move |stream, _peer| {
            let node = node.clone();
            async move {
                match handle_entry_connection(stream, &node.keys, &node.config).await {
                    Ok(requests) => debug!(requests, "session closed"),
                    Err(e) if e.is_protocol_violation() => {
                        warn!(kind = e.kind(), error = %e, "session aborted")
                    }
                    Err(e) => info!(kind = e.kind(), error = %e, "session ended"),
                }
            }
        })
        .await
    }
}
