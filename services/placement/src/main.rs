//! Placement plugin binary

use anyhow::{Context, Result};
use clap::Parser;
use placement::{PlacementPlugin, PLACEMENT_PLUGIN_NAME};
use platform_config::{init_tracing, PlatformConfig};
use plugin_runtime::{PluginOptions, PluginRuntime};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "placement")]
#[command(about = "First-fit placement plugin")]
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

    let connection = messaging::connect(PLACEMENT_PLUGIN_NAME, &config.broker)
        .await
        .context("Failed to connect to broker")?;

    let options = PluginOptions::from_settings(
        PLACEMENT_PLUGIN_NAME,
        env!("CARGO_PKG_VERSION"),
        "First-fit placement of functions onto infrastructure sites",
        &config.plugin,
    );
    let hooks = Arc::new(PlacementPlugin::new(config.topics.placement.clone()));
    let runtime = PluginRuntime::start(connection, options, hooks)
        .await
        .context("Failed to start placement plugin")?;

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
