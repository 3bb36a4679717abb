//! Pump Trader - anticipated-signal market trader
//!
//! # WARNING
//! - This bot trades with real money. Only use funds you can afford to lose.
//! - Pump events are adversarial; most participants lose.
//! - Exchange rate limits and latency can leave orders unfilled or stuck.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

// Use the library crate
use pump_trader::cli::commands;
use pump_trader::config::Config;

/// Pump Trader - anticipated-signal market trader
#[derive(Parser)]
#[command(name = "pump-trader")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track deltas, resolve a market, and run the chunked trade
    Trade {
        /// Trade this market directly instead of waiting for detection
        #[arg(long)]
        market: Option<String>,

        /// Resolve and confirm but place no orders
        #[arg(long)]
        dry_run: bool,
    },

    /// Watch the delta stream and report the resolved market only
    Track,

    /// Show the available source-currency balance
    Balance,

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pump_trader=info".parse().unwrap()),
        )
        .with_target(true)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Trade { market, dry_run } => commands::trade(&config, market, dry_run).await,
        Commands::Track => commands::track(&config).await,
        Commands::Balance => commands::balance(&config).await,
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
