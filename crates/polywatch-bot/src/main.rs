//! polywatch - entry point.
//!
//! Watches prediction-market trades and alerts on likely insider activity.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Insider-trade detector for prediction markets
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "POLYWATCH_CONFIG", default_value = "config/default.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    polywatch_telemetry::init_logging()?;

    info!("Starting polywatch v{}", env!("CARGO_PKG_VERSION"));
    info!(config_path = %args.config, "Loading configuration");

    let config = polywatch_bot::AppConfig::load(&args.config)?;
    info!(
        source = ?config.feed.source,
        min_trade_size_usd = %config.detector.min_trade_size_usd,
        "Configuration loaded"
    );

    let app = polywatch_bot::Application::new(config)?;
    app.run().await?;

    Ok(())
}
