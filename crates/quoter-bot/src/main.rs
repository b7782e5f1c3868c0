//! Quoter paper-trading bot - Entry Point

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Paper-trading market maker on the quoter execution core
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "QUOTER_CONFIG", default_value = "config/default.toml")]
    config: String,

    /// Confirm orders locally without sending them to the venue
    #[arg(long)]
    shadow: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    quoter_telemetry::init_logging()?;

    info!("Starting quoter v{}", env!("CARGO_PKG_VERSION"));
    info!(config_path = %args.config, "Loading configuration");

    let mut config = quoter_bot::AppConfig::from_file(&args.config)?;
    if args.shadow {
        config.lifecycle.shadow = true;
    }
    info!(
        symbols = config.symbols.len(),
        shadow = config.lifecycle.shadow,
        "Configuration loaded"
    );

    let app = quoter_bot::Application::new(config)?;
    app.run().await?;

    Ok(())
}
