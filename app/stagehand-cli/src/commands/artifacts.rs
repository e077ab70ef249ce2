//! Collected artifact commands.

use anyhow::Context;
use clap::{Args, Subcommand};
use stagehand_core::Engine;
use std::path::PathBuf;

use super::{print_json, OutputFormat};

/// Collected artifact commands.
#[derive(Subcommand)]
pub enum ArtifactCommands {
    /// Show storage usage
    Stats,

    /// Apply retention: delete expired, compress aged, evict over quota
    Cleanup,

    /// List artifacts collected for a test
    List(ListArgs),

    /// Write an artifact's original content to a file
    Get(GetArgs),

    /// Delete every artifact collected for a test
    Remove(ListArgs),
}

/// Arguments naming a test.
#[derive(Args)]
pub struct ListArgs {
    /// Test id
    pub test_id: String,
}

/// Arguments for the get command.
#[derive(Args)]
pub struct GetArgs {
    /// Artifact id
    pub id: String,

    /// Destination file
    #[arg(long, short)]
    pub output: PathBuf,
}

/// Execute artifact commands.
pub fn execute(engine: &Engine, command: ArtifactCommands, format: OutputFormat) -> anyhow::Result<()> {
    match command {
        ArtifactCommands::Stats => stats(engine, format),
        ArtifactCommands::Cleanup => cleanup(engine, format),
        ArtifactCommands::List(args) => list(engine, &args.test_id, format),
        ArtifactCommands::Get(args) => get(engine, &args),
        ArtifactCommands::Remove(args) => {
            let removed = engine.collector().remove_artifacts_for_test(&args.test_id)?;
            println!("Removed {removed} artifacts of test {}", args.test_id);
            Ok(())
        }
    }
}

fn stats(engine: &Engine, format: OutputFormat) -> anyhow::Result<()> {
    let stats = engine.storage_stats()?;
    if let OutputFormat::Json = format {
        return print_json(&stats);
    }

    println!("Collected Artifacts");
    println!("===================");
    println!();
    println!("Root:       {}", engine.collector().root().display());
    println!("Total:      {} artifacts, {} bytes", stats.total.count, stats.total.bytes);
    println!("Compressed: {}", stats.compressed);
    println!("Expired:    {} awaiting cleanup", stats.expired_pending);
    println!();
    for (category, group) in &stats.by_category {
        println!("  {:<12} {:>6} {:>14} bytes", category.to_string(), group.count, group.bytes);
    }
    Ok(())
}

fn cleanup(engine: &Engine, format: OutputFormat) -> anyhow::Result<()> {
    let stats = engine.cleanup_artifacts()?;
    if let OutputFormat::Json = format {
        return print_json(&stats);
    }

    println!("Expired:     {}", stats.expired);
    println!("Compressed:  {}", stats.compressed);
    println!("Evicted:     {}", stats.evicted);
    if stats.compression_failures > 0 {
        println!("Compression failures: {}", stats.compression_failures);
    }
    println!("Bytes freed: {}", stats.bytes_freed);
    Ok(())
}

fn list(engine: &Engine, test_id: &str, format: OutputFormat) -> anyhow::Result<()> {
    let records = engine.collector().get_artifacts_for_test(test_id)?;
    if let OutputFormat::Json = format {
        return print_json(&records);
    }

    println!("{:<36} {:<12} {:>10} {:<20} NAME", "ID", "CATEGORY", "SIZE", "EXPIRES");
    for record in &records {
        let size = if record.compressed {
            format!("{}z", record.size)
        } else {
            record.size.to_string()
        };
        println!(
            "{:<36} {:<12} {:>10} {:<20} {}",
            record.id,
            record.category.to_string(),
            size,
            record
                .expires_at
                .map_or_else(|| "never".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string()),
            record.name
        );
    }
    Ok(())
}

fn get(engine: &Engine, args: &GetArgs) -> anyhow::Result<()> {
    let content = engine.collector().retrieve_artifact(&args.id)?;
    std::fs::write(&args.output, &content)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    println!("Wrote {} bytes to {}", content.len(), args.output.display());
    Ok(())
}
