use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use entry_node::{EntryConfig, EntryNode};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "entry-node", version, about = "Client side of the encrypted HTTP relay")]
struct Args {
    /// TOML config file; ENTRY_* environment variables override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// Listen address for local clients, e.g. 127.0.0.1:8080
    #[arg(long)]
    listen: Option<String>,
    /// Exit node address, e.g. 203.0.113.7:9090
    #[arg(long)]
    exit_addr: Option<String>,
    /// Exit node public key (SPKI PEM), as written by `exit-node keygen`
    #[arg(long)]
    exit_public_key: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let mut config = EntryConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(addr) = args.exit_addr {
        config.exit_addr = addr;
    }
    if let Some(path) = args.exit_public_key {
        config.exit_public_key = Some(path);
    }

    let node = EntryNode::from_config(config)?;
    info!(
        exit = %node.config().exit_addr,
        exit_fingerprint = %node.exit_key().fingerprint()?,
        "entry node starting"
    );
    let listener = node
        .bind()
        .await
        .with_context(|| format!("bind {}", node.config().listen))?;

    tokio::select! {
        res = node.serve(listener) => res.context("accept loop")?,
        _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
    }
    Ok(())
}
