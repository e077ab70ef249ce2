//! Stagehand CLI - deploy test payloads, run emulated tests, manage artifacts.

use anyhow::{Context, Result};
use clap::Parser;
use stagehand_core::{Config, Engine};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };

    // RUST_LOG wins over --debug, which wins over the configured level.
    let filter = if cli.debug {
        "stagehand=debug".to_string()
    } else {
        format!("stagehand={}", config.logging.level)
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let engine = Engine::open(config).context("failed to open stagehand data directory")?;
    let format = cli.format;

    match cli.command {
        Commands::Deploy(args) => commands::deploy::execute(&engine, args, format).await,
        Commands::Run(args) => commands::run::execute(&engine, args, format).await,
        Commands::Artifacts(cmd) => commands::artifacts::execute(&engine, cmd, format),
        Commands::Report(args) => commands::report::execute(&engine, &args, format),
        Commands::Environments => commands::environments(&engine, format),
    }
}
