//! Deployment command.

use anyhow::{bail, Context};
use clap::Args;
use stagehand_core::Engine;
use stagehand_deploy::{DeploymentPlan, DeploymentStatus};
use std::path::PathBuf;

use super::{print_json, OutputFormat};

/// Arguments for the deploy command.
#[derive(Args)]
pub struct DeployArgs {
    /// Plan file (JSON)
    pub plan: PathBuf,

    /// Override the plan's environment
    #[arg(long)]
    pub env_id: Option<String>,
}

/// Execute the deploy command.
pub async fn execute(engine: &Engine, args: DeployArgs, format: OutputFormat) -> anyhow::Result<()> {
    let plan = load_plan(engine, &args)?;
    let plan_id = plan.id.clone();

    let result = engine.deploy(plan).await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => {
            println!("Deployment {}", result.deployment_id);
            println!("  Plan:         {plan_id}");
            println!("  Environment:  {}", result.environment_id);
            println!("  Status:       {}", result.status);
            println!("  Artifacts:    {}", result.artifacts_deployed);
            println!("  Dependencies: {}", result.dependencies_installed);
            println!("  Retries:      {}", result.retry_count);
            println!(
                "  Transferred:  {} bytes ({:.0} B/s)",
                result.transfer.bytes_transferred, result.transfer.throughput_bytes_per_sec
            );
            for step in &result.steps {
                println!("    {:<28} {}", step.name, step.status);
            }
            if let Some(error) = &result.error {
                println!("  Error:        {error}");
            }
        }
    }

    if result.status != DeploymentStatus::Completed {
        bail!("deployment {} ended {}", result.deployment_id, result.status);
    }
    Ok(())
}

/// Reads a plan, filling in the configured deployment defaults when the
/// file has no `config` section.
fn load_plan(engine: &Engine, args: &DeployArgs) -> anyhow::Result<DeploymentPlan> {
    let data = std::fs::read(&args.plan)
        .with_context(|| format!("failed to read {}", args.plan.display()))?;
    let mut value: serde_json::Value = serde_json::from_slice(&data)
        .with_context(|| format!("{} is not valid JSON", args.plan.display()))?;

    if let Some(object) = value.as_object_mut() {
        if !object.contains_key("config") {
            object.insert("config".into(), serde_json::to_value(&engine.config().deploy)?);
        }
        if let Some(env_id) = &args.env_id {
            object.insert("environment_id".into(), env_id.clone().into());
        }
    }

    let mut plan: DeploymentPlan = serde_json::from_value(value)
        .with_context(|| format!("{} is not a deployment plan", args.plan.display()))?;
    plan.refresh_estimate();
    Ok(plan)
}
