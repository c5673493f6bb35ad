//! # Quorum-Chain Validator Node
//!
//! ## Usage
//!
//! ```bash
//! node-runtime [config.toml]
//! QC_CONFIG=config.toml node-runtime
//! QC_IDENTITY_SEED=<64 hex chars> QC_LISTEN_ADDR=0.0.0.0:5040 node-runtime
//! ```
//!
//! Runs until Ctrl-C, then signals every task and waits for them to stop.

use anyhow::{Context, Result};
use node_runtime::logging::init_tracing;
use node_runtime::{NodeConfig, NodeContainer, CONFIG_PATH_ENV};
use std::path::PathBuf;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Owns the shutdown signal and the running tasks.
struct NodeRuntime {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeRuntime {
    async fn start(config: NodeConfig) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let container = NodeContainer::build(config)
            .await
            .context("failed to build node")?;

        info!(
            validator = %hex::encode(container.local_key),
            peer_addr = ?container.peer_addr().ok(),
            rpc_addr = ?container.rpc_addr(),
            "Validator node ready"
        );
        let tasks = container.start(shutdown_rx);
        Ok(Self { shutdown_tx, tasks })
    }

    async fn shutdown(self) {
        info!("Initiating graceful shutdown...");
        if self.shutdown_tx.send(true).is_err() {
            warn!("All tasks already stopped");
        }
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Task ended abnormally");
            }
        }
        info!("Shutdown complete");
    }
}

fn config_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path();
    let config = NodeConfig::load(path.as_deref()).context("failed to load configuration")?;
    init_tracing(&config.logging).context("failed to initialise logging")?;

    info!("===========================================");
    info!("  Quorum-Chain Validator Node v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================");
    if let Some(path) = &path {
        info!(path = %path.display(), "Loaded configuration");
    }

    let runtime = NodeRuntime::start(config).await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    runtime.shutdown().await;
    Ok(())
}
