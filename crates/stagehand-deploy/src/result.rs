//! Deployment results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::plan::DeploymentPlan;
use crate::status::DeploymentStatus;
use crate::step::DeploymentStep;

/// Transfer throughput of a deployment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferMetrics {
    /// Bytes transferred.
    pub bytes_transferred: u64,
    /// Time spent transferring, in seconds.
    pub transfer_seconds: f64,
    /// Bytes per second.
    pub throughput_bytes_per_sec: f64,
}

impl TransferMetrics {
    /// Records one transfer.
    #[allow(clippy::cast_precision_loss)]
    pub fn record(&mut self, bytes: u64, seconds: f64) {
        self.bytes_transferred += bytes;
        self.transfer_seconds += seconds;
        self.throughput_bytes_per_sec = if self.transfer_seconds > 0.0 {
            self.bytes_transferred as f64 / self.transfer_seconds
        } else {
            0.0
        };
    }
}

/// Outcome of one deployment.
///
/// Created `PENDING` at submission, updated step by step, and terminal
/// exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentResult {
    /// Deployment id.
    pub deployment_id: String,
    /// Plan that was deployed.
    pub plan_id: String,
    /// Target environment.
    pub environment_id: String,
    /// Overall status.
    pub status: DeploymentStatus,
    /// Submission time.
    pub started_at: DateTime<Utc>,
    /// Time the deployment became terminal.
    pub ended_at: Option<DateTime<Utc>>,
    /// Steps, in execution order.
    pub steps: Vec<DeploymentStep>,
    /// Error message; present iff the deployment failed.
    pub error: Option<String>,
    /// Artifacts transferred.
    pub artifacts_deployed: usize,
    /// Dependencies installed.
    pub dependencies_installed: usize,
    /// Retries across all steps.
    pub retry_count: u32,
    /// Transfer throughput.
    pub transfer: TransferMetrics,
}

impl DeploymentResult {
    /// Creates a pending result for `plan`.
    #[must_use]
    pub fn pending(plan: &DeploymentPlan) -> Self {
        Self {
            deployment_id: Uuid::new_v4().to_string(),
            plan_id: plan.id.clone(),
            environment_id: plan.environment_id.clone(),
            status: DeploymentStatus::Pending,
            started_at: Utc::now(),
            ended_at: None,
            steps: Vec::new(),
            error: None,
            artifacts_deployed: 0,
            dependencies_installed: 0,
            retry_count: 0,
            transfer: TransferMetrics::default(),
        }
    }

    /// Moves the deployment into a non-terminal phase.
    ///
    /// Ignored once the result is terminal.
    pub fn enter(&mut self, status: DeploymentStatus) {
        if !self.status.is_final() {
            self.status = status;
        }
    }

    /// Makes the result terminal.
    ///
    /// Returns false, changing nothing, if it already was.
    pub fn finish(&mut self, status: DeploymentStatus, error: Option<String>) -> bool {
        if self.status.is_final() || !status.is_final() {
            return false;
        }
        self.status = status;
        self.error = if status == DeploymentStatus::Failed {
            Some(error.unwrap_or_else(|| "deployment failed".to_string()))
        } else {
            None
        };
        self.ended_at = Some(Utc::now());
        true
    }

    /// Number of completed steps.
    #[must_use]
    pub fn steps_completed(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == DeploymentStatus::Completed)
            .count()
    }

    /// Completion in percent.
    ///
    /// 100 once completed, otherwise the completed-step ratio.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn completion_percentage(&self) -> f64 {
        if self.status == DeploymentStatus::Completed {
            return 100.0;
        }
        let total = crate::step::StepKind::ALL.len();
        self.steps_completed() as f64 * 100.0 / total as f64
    }

    /// Duration in seconds, once terminal.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> Option<f64> {
        let micros = (self.ended_at? - self.started_at).num_microseconds()?;
        Some(micros as f64 / 1_000_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_artifact::{Artifact, ArtifactType};

    fn result() -> DeploymentResult {
        let plan = DeploymentPlan::new(
            "env",
            vec![Artifact::new("a", ArtifactType::Data, "a", "/a")],
        );
        DeploymentResult::pending(&plan)
    }

    #[test]
    fn test_terminal_exactly_once() {
        let mut result = result();
        result.enter(DeploymentStatus::Connecting);
        assert!(result.finish(DeploymentStatus::Failed, Some("boom".to_string())));
        assert!(!result.finish(DeploymentStatus::Completed, None));
        result.enter(DeploymentStatus::Validating);

        assert_eq!(result.status, DeploymentStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert!(result.duration_secs().is_some());
    }

    #[test]
    fn test_completion_percentage() {
        let mut result = result();
        let mut step = DeploymentStep::new(crate::step::StepKind::Preparing);
        step.start();
        step.complete();
        result.steps.push(step);
        assert!((result.completion_percentage() - 100.0 / 6.0).abs() < 1e-9);

        result.finish(DeploymentStatus::Completed, None);
        assert!((result.completion_percentage() - 100.0).abs() < f64::EPSILON);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_transfer_metrics() {
        let mut metrics = TransferMetrics::default();
        metrics.record(1000, 0.5);
        metrics.record(1000, 0.5);
        assert_eq!(metrics.bytes_transferred, 2000);
        assert!((metrics.throughput_bytes_per_sec - 2000.0).abs() < 1e-9);
    }
}
