//! Zenoh bridge for a SunSpec device fleet.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use sunfleet_bridge::bridge::Bridge;
use sunfleet_bridge::config::BridgeConfig;
use tracing::info;

/// Polls a fleet of SunSpec devices over Modbus TCP and publishes to Zenoh.
#[derive(Parser, Debug)]
#[command(name = "sunfleet-bridge")]
#[command(about = "Polls SunSpec devices and publishes to Zenoh")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "sunfleet.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = BridgeConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let mut log_config = config.logging.clone();
    if let Some(level) = &args.log_level {
        log_config.level = level.clone();
    }
    sunfleet_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Starting sunfleet-bridge");
    info!("Loaded configuration from {:?}", args.config);

    let session = sunfleet_common::connect(&config.zenoh)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to Zenoh: {}", e))?;
    info!("Connected to Zenoh");

    Bridge::new(config, session.clone())
        .run()
        .await
        .context("Bridge failed")?;

    session
        .close()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to close Zenoh session: {}", e))?;
    info!("SunFleet bridge stopped");

    Ok(())
}
