//! Cloud-service lifecycle manager binary

use anyhow::{Context, Result};
use clap::Parser;
use lifecycle::{CloudServiceLifecycleManager, CLM_NAME};
use platform_config::{init_tracing, PlatformConfig};
use plugin_runtime::{PluginOptions, PluginRuntime};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use types::InMemoryStore;

#[derive(Parser, Debug)]
#[command(name = "clm")]
#[command(about = "Cloud-service lifecycle manager")]
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

    /// Override the configured step pool size
    #[arg(long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = PlatformConfig::load(args.config.as_deref())?;
    init_tracing(
        args.log_level.as_deref().unwrap_or(&config.logging.level),
        args.json_logs || config.logging.json,
    )?;

    let connection = messaging::connect(CLM_NAME, &config.broker)
        .await
        .context("Failed to connect to broker")?;

    let workers = args.workers.unwrap_or(config.lifecycle.worker_pool_size);
    let clm = CloudServiceLifecycleManager::new(
        connection.clone(),
        &config.topics,
        Arc::new(InMemoryStore::<serde_json::Value>::new()),
        workers,
    );
    let options = PluginOptions::from_settings(
        CLM_NAME,
        env!("CARGO_PKG_VERSION"),
        "Deploys cloud services on container sites",
        &config.plugin,
    );
    let runtime = PluginRuntime::start(connection, options, Arc::new(clm))
        .await
        .context("Failed to start cloud-service lifecycle manager")?;

    info!(
        workers,
        topic = %config.topics.cloud_service_create,
        "Cloud-service lifecycle manager running"
    );

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
