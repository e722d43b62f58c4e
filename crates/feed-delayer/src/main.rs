//! Feed delayer - entry point
//!
//! Subscribes to one tick stream and replays every message on stdout after a
//! fixed delay, with epoch timestamps advanced by that delay.

use anyhow::Result;
use clap::Parser;
use feed_delayer::{AppConfig, Args, Session};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config first: it carries the default log filter.
    let (config, config_path) = AppConfig::load(args.config)?;

    delayer_telemetry::init_logging(&config.telemetry.log_level)?;

    info!("Starting feed-delayer v{}", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!(config_path = %path, "Configuration loaded"),
        None => info!("No configuration file found, using defaults"),
    }
    info!(
        url = %config.endpoint.url(),
        on_transport_failure = ?config.on_transport_failure,
        "Upstream endpoint"
    );

    let session = Session::new(config, args.delay, args.symbol)?;
    session.run().await?;

    Ok(())
}
