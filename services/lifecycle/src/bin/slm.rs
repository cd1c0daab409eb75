//! Service lifecycle manager binary

use anyhow::{Context, Result};
use clap::Parser;
use lifecycle::{ServiceLifecycleManager, SLM_NAME};
use platform_config::{init_tracing, PlatformConfig};
use plugin_runtime::{PluginOptions, PluginRuntime};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use types::{InMemoryStore, ServiceInstance};

#[derive(Parser, Debug)]
#[command(name = "slm")]
#[command(about = "Network service lifecycle manager")]
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

    let connection = messaging::connect(SLM_NAME, &config.broker)
        .await
        .context("Failed to connect to broker")?;

    let slm = ServiceLifecycleManager::new(
        connection.clone(),
        config.topics.clone(),
        Arc::new(InMemoryStore::<ServiceInstance>::new()),
        Arc::new(InMemoryStore::<serde_json::Value>::new()),
    );
    let options = PluginOptions::from_settings(
        SLM_NAME,
        env!("CARGO_PKG_VERSION"),
        "Instantiates and terminates network services",
        &config.plugin,
    );
    let runtime = PluginRuntime::start(connection, options, Arc::new(slm))
        .await
        .context("Failed to start service lifecycle manager")?;

    info!(topic = %config.topics.service_create, "Service lifecycle manager running");

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
