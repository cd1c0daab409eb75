//! Plugin manager binary
//!
//! Usage:
//!   plugin-manager --config config/platform.toml
//!   MANO_REGISTRY__LIVENESS_TIMEOUT_MS=30000 plugin-manager

use anyhow::{Context, Result};
use clap::Parser;
use platform_config::{init_tracing, PlatformConfig};
use plugin_manager::{PluginManager, PLUGIN_MANAGER_NAME};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "plugin-manager")]
#[command(about = "Registry and lifecycle controller for control plane plugins")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = PlatformConfig::load(args.config.as_deref())?;
    init_tracing(
        args.log_level.as_deref().unwrap_or(&config.logging.level),
        args.json_logs || config.logging.json,
    )?;

    info!(broker = %config.broker.url, "Starting plugin manager");

    let connection = messaging::connect(PLUGIN_MANAGER_NAME, &config.broker)
        .await
        .context("Failed to connect to broker")?;
    let (runtime, _registry) = PluginManager::start(connection, &config)
        .await
        .context("Failed to start plugin manager")?;

    let context = runtime.context().clone();
    tokio::select! {
        _ = context.wait_for_shutdown() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    runtime.shutdown().await;
    Ok(())
}
