use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use exit_node::{keys, ExitConfig, ExitNode};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tunnel::KeyPair;

#[derive(Parser, Debug)]
#[command(name = "exit-node", version, about = "Exit side of the encrypted HTTP relay")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Accept tunnel sessions from entry nodes
    Serve(ServeArgs),
    /// Generate an RSA key pair for distribution to entry nodes
    Keygen(KeygenArgs),
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// TOML config file; EXIT_* environment variables override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// Listen address, e.g. 0.0.0.0:9090
    #[arg(long)]
    listen: Option<String>,
    /// PKCS#8 PEM private key. If omitted, a fresh pair is generated at startup
    #[arg(long)]
    private_key: Option<PathBuf>,
    /// Write the public key (SPKI PEM) here for the entry node
    #[arg(long)]
    public_key_out: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct KeygenArgs {
    #[arg(long)]
    private_key: PathBuf,
    #[arg(long)]
    public_key: PathBuf,
    #[arg(long, default_value_t = core_crypto::rsa::DEFAULT_BITS)]
    bits: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    match Cli::parse().command {
        Commands::Serve(args) => serve(args).await,
        Commands::Keygen(args) => keygen(args),
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let mut config = ExitConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(path) = args.private_key {
        config.private_key = Some(path);
    }
    if let Some(path) = args.public_key_out {
        config.public_key_out = Some(path);
    }

    let keys = keys::load_or_generate(&config)?;
    let node = ExitNode::new(config, keys);
    info!(
        fingerprint = %node.public_key().fingerprint()?,
        fallback = %format!("{}:{}", node.config().fallback_host, node.config().fallback_port),
        "exit node starting"
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

fn keygen(args: KeygenArgs) -> Result<()> {
    let keys = KeyPair::generate(args.bits).context("generate RSA key pair")?;
    keys::write_private_key(&keys, &args.private_key)?;
    keys::write_public_key(keys.public(), &args.public_key)?;
    println!("{}", keys.public().fingerprint()?);
    Ok(())
}
