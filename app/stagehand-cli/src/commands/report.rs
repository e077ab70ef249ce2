//! Deployment report command.

use clap::Args;
use stagehand_core::Engine;

use super::{print_json, OutputFormat};

/// Arguments for the report command.
#[derive(Args)]
pub struct ReportArgs {
    /// Deployment id (omit to list stored reports)
    pub deployment_id: Option<String>,
}

/// Execute the report command.
pub fn execute(engine: &Engine, args: &ReportArgs, format: OutputFormat) -> anyhow::Result<()> {
    let Some(deployment_id) = &args.deployment_id else {
        let ids = engine.reports();
        if let OutputFormat::Json = format {
            return print_json(&ids);
        }
        for id in ids {
            println!("{id}");
        }
        return Ok(());
    };

    let report = engine.report(deployment_id)?;
    if let OutputFormat::Json = format {
        return print_json(&report);
    }

    let summary = &report.summary;
    println!("Deployment Report");
    println!("=================");
    println!();
    println!("Deployment:   {}", report.result.deployment_id);
    println!("Plan:         {}", report.result.plan_id);
    println!("Environment:  {}", report.result.environment_id);
    println!("Status:       {}", summary.status);
    println!(
        "Steps:        {}/{} ({:.0}%)",
        summary.steps_completed, summary.steps_total, summary.completion_percentage
    );
    println!("Artifacts:    {}", summary.artifacts_deployed);
    println!("Dependencies: {}", summary.dependencies_installed);
    println!("Retries:      {}", summary.retry_count);
    if let Some(perf) = &summary.performance {
        println!("Duration:     {:.2}s", perf.total_duration_seconds);
        println!("Average step: {:.2}s", perf.average_step_seconds);
        if let Some(slowest) = &perf.slowest_step {
            println!("Slowest step: {slowest} ({:.2}s)", perf.slowest_step_seconds);
        }
    }
    if let Some(error) = &report.result.error {
        println!("Error:        {error}");
    }
    println!("Generated:    {}", report.generated_at.to_rfc3339());
    Ok(())
}
