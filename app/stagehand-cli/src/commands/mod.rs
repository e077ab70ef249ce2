//! CLI command implementations.
//!
//! - Deploying plans onto registered environments
//! - Running test scripts in emulated guests
//! - Inspecting and pruning collected artifacts
//! - Reading stored deployment reports

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use stagehand_core::Engine;
use std::path::PathBuf;

pub mod artifacts;
pub mod deploy;
pub mod report;
pub mod run;

/// Stagehand - deploy, run and collect embedded test workloads
#[derive(Parser)]
#[command(name = "stagehand")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (default: system and user config files)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "table")]
    pub format: OutputFormat,

    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary (default)
    #[default]
    Table,
    /// JSON document
    Json,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Deploy a plan file onto its environment
    Deploy(deploy::DeployArgs),

    /// Run a test script in an emulated guest
    Run(run::RunArgs),

    /// Inspect and prune collected artifacts
    #[command(subcommand)]
    Artifacts(artifacts::ArtifactCommands),

    /// Show a stored deployment report
    Report(report::ReportArgs),

    /// List registered environments
    Environments,
}

/// Prints `value` as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// List registered environments.
pub fn environments(engine: &Engine, format: OutputFormat) -> anyhow::Result<()> {
    let environments = engine.registry().list();
    if let OutputFormat::Json = format {
        return print_json(&environments);
    }

    println!("{:<24} {:<10} {:<10} {:>8}  STAGING", "ID", "ARCH", "KIND", "MEMORY");
    for env in &environments {
        let memory = if env.memory_mb == 0 {
            "-".to_string()
        } else {
            format!("{}M", env.memory_mb)
        };
        println!(
            "{:<24} {:<10} {:<10} {:>8}  {}",
            env.id,
            env.architecture,
            format!("{:?}", env.kind).to_lowercase(),
            memory,
            engine.config().staging_dir(env).display()
        );
    }
    Ok(())
}
