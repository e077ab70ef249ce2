//! Test execution command.

use anyhow::{bail, Context};
use clap::Args;
use stagehand_core::{Engine, TestRunOutcome};
use stagehand_runner::{Architecture, TestCase};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{print_json, OutputFormat};

/// Arguments for the run command.
#[derive(Args)]
pub struct RunArgs {
    /// Test script executed as the guest's workload
    pub script: PathBuf,

    /// Guest architecture (default: host architecture)
    #[arg(long)]
    pub arch: Option<Architecture>,

    /// Timeout in seconds
    #[arg(long, default_value_t = 300)]
    pub timeout: u64,

    /// Environment to run on (default: qemu-<arch>)
    #[arg(long)]
    pub env_id: Option<String>,

    /// Test name (default: script file name)
    #[arg(long)]
    pub name: Option<String>,

    /// Guest memory in MiB
    #[arg(long)]
    pub memory: Option<u64>,

    /// Attach an export disk and collect files the guest writes to it
    #[arg(long)]
    pub export: bool,

    /// Extra environment for the script (KEY=VALUE)
    #[arg(long = "env", value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))
}

/// Execute the run command.
pub async fn execute(engine: &Engine, args: RunArgs, format: OutputFormat) -> anyhow::Result<()> {
    let case = build_case(args)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping test");
            on_interrupt.cancel();
        }
    });

    let outcome = engine.run_test_with(case, &cancel).await?;

    match format {
        OutputFormat::Json => print_json(&outcome)?,
        OutputFormat::Table => print_outcome(&outcome),
    }

    if !outcome.result.passed() {
        bail!("test {} {}", outcome.result.test_id, outcome.result.status);
    }
    Ok(())
}

fn build_case(args: RunArgs) -> anyhow::Result<TestCase> {
    let script = std::fs::read_to_string(&args.script)
        .with_context(|| format!("failed to read {}", args.script.display()))?;
    let arch = match args.arch {
        Some(arch) => arch,
        None => Architecture::host().context("host architecture cannot be emulated, pass --arch")?,
    };
    let name = args.name.unwrap_or_else(|| {
        args.script
            .file_stem()
            .map_or_else(|| "test".to_string(), |s| s.to_string_lossy().into_owned())
    });

    let mut case = TestCase::new(name, script, arch).with_timeout(Duration::from_secs(args.timeout));
    if let Some(env_id) = args.env_id {
        case = case.with_environment(env_id);
    }
    if let Some(memory) = args.memory {
        case.target.memory_mb = memory;
    }
    case.export_artifacts = args.export;
    for (key, value) in args.env {
        case = case.with_env(key, value);
    }
    Ok(case)
}

fn print_outcome(outcome: &TestRunOutcome) {
    let result = &outcome.result;
    println!("Test {}", result.test_id);
    println!("  Run:       {}", result.run_id);
    println!("  Status:    {}", result.status);
    match result.exit_code {
        Some(code) => println!("  Exit code: {code}"),
        None => println!("  Exit code: -"),
    }
    println!("  Duration:  {:.2}s", result.duration_secs);
    if let Some(failure) = &result.failure {
        println!("  Failure:   {:?}: {}", failure.kind, failure.message);
        if let Some(signature) = &failure.signature {
            println!("  Signature: {signature}");
        }
    }
    if let Some(dir) = &result.output_dir {
        println!("  Output:    {}", dir.display());
    }

    println!("  Artifacts: {}", outcome.collection.stored.len());
    for record in &outcome.collection.stored {
        println!("    {:<12} {:>10}  {}", record.category, record.size, record.name);
    }
    for path in &outcome.collection.skipped {
        println!("    skipped     {}", path.display());
    }

    if let Some(metrics) = &outcome.metrics {
        println!("  Performance score: {}/100", metrics.score);
        println!(
            "    CPU avg/peak:    {:.1}% / {:.1}%",
            metrics.avg_cpu_percent, metrics.peak_cpu_percent
        );
        println!("    Memory peak:     {:.1}%", metrics.peak_memory_percent);
        if !metrics.bottlenecks.is_empty() {
            println!("    Bottlenecks:     {:?}", metrics.bottlenecks);
        }
    }
}
