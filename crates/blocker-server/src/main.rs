#![warn(missing_docs)]

//! Blocker server binary

use anyhow::Result;
use blocker_server::cli::Cli;
use blocker_server::ServerConfig;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    tracing::info!("Blocker {} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = if cli.config.exists() {
        ServerConfig::from_file(&cli.config)?
    } else {
        tracing::warn!("Config file not found, using defaults: {}", cli.config.display());
        ServerConfig::default()
    };
    cli.apply(&mut config);

    blocker_server::serve(config).await
}
