//! Relay broker binary
//!
//! Usage:
//!   relay --config config/platform.toml
//!   MANO_RELAY__LISTEN_ADDRESS=0.0.0.0:5672 relay

use anyhow::{Context, Result};
use clap::Parser;
use platform_config::{init_tracing, PlatformConfig};
use relay::RelayServer;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(about = "Topic-routing relay broker for control plane plugins")]
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

    /// Override the listen address from configuration
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = PlatformConfig::load(args.config.as_deref())?;
    init_tracing(
        args.log_level.as_deref().unwrap_or(&config.logging.level),
        args.json_logs || config.logging.json,
    )?;

    if let Some(listen) = args.listen {
        config.relay.listen_address = listen;
    }

    info!("Starting relay broker on {}", config.relay.listen_address);

    let server = RelayServer::new(config.relay.clone());
    let listener = server.bind().await.context("Failed to bind relay listener")?;

    tokio::select! {
        result = server.serve(listener) => {
            if let Err(e) = result {
                error!("Relay failed: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    Ok(())
}
