//! # Beskar - node bootstrap
//!
//! Resolves the node configuration and prepares the gossip membership
//! arguments needed to join (or found) a Beskar cluster.
//!
//! ## Flow
//! ```text
//! beskar.yaml → ConfigResolver → ClusterBootstrap → membership client
//!                                      ↓
//!                         static peers | Kubernetes endpoints
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use beskar::cluster::{self, BootstrapOptions, Deployment, KubeEndpointLister};
use beskar::config;
use beskar_common::constants::DEFAULT_DISCOVERY_TIMEOUT_SECS;

/// Beskar node bootstrap
#[derive(Parser, Debug)]
#[command(name = "beskar")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration directory (defaults to /etc/beskar, falling back to
    /// the embedded configuration when no file exists there)
    #[arg(short, long, env = "BESKAR_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Peer discovery budget in seconds
    #[arg(long, default_value_t = DEFAULT_DISCOVERY_TIMEOUT_SECS, env = "BESKAR_DISCOVERY_TIMEOUT")]
    discovery_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,

    /// Print the prepared membership summary as JSON
    #[arg(long)]
    print: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, args.json_logs)?;

    info!("Starting Beskar v{}", env!("CARGO_PKG_VERSION"));

    let config = config::resolve(args.config_dir.as_deref()).context("Failed to load configuration")?;
    let plugins: Vec<&String> = config.plugins.keys().collect();
    let registry_root = config
        .registry
        .storage
        .parameters()
        .and_then(|p| p.get("rootdirectory"))
        .and_then(|v| v.as_str());
    info!(
        cache = %config.cache.addr,
        cache_size = config.cache.size,
        gossip = %config.gossip.addr,
        profiling = config.profiling,
        plugins = ?plugins,
        registry_root = ?registry_root,
        "Configuration loaded"
    );

    let deployment = Deployment::detect(&config);
    info!(orchestrated = deployment.is_orchestrated(), "Deployment detected");

    let options = BootstrapOptions::new(deployment, Duration::from_secs(args.discovery_timeout));
    let lister = KubeEndpointLister::new();

    let membership = cluster::prepare(&config, &lister, &options)
        .await
        .context("Failed to prepare gossip membership")?;

    let summary = membership.summary()?;
    if args.print {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    info!(
        id = %summary.id,
        peers = ?summary.peers,
        founder = summary.founder,
        "Bootstrap complete"
    );

    Ok(())
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }

    Ok(())
}
