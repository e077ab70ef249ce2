//! Deployment steps.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::DeploymentStatus;

/// The phases of a deployment, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Checksum validation, repository storage, dependency ordering.
    Preparing,
    /// Session establishment.
    Connecting,
    /// Package-manager dependency installation.
    InstallingDependencies,
    /// Artifact transfer.
    DeployingScripts,
    /// Instrumentation setup.
    ConfiguringInstrumentation,
    /// Post-deployment verification.
    Validating,
}

impl StepKind {
    /// Every step, in execution order.
    pub const ALL: [Self; 6] = [
        Self::Preparing,
        Self::Connecting,
        Self::InstallingDependencies,
        Self::DeployingScripts,
        Self::ConfiguringInstrumentation,
        Self::Validating,
    ];

    /// Deployment status while this step runs.
    #[must_use]
    pub const fn phase(&self) -> DeploymentStatus {
        match self {
            Self::Preparing => DeploymentStatus::Preparing,
            Self::Connecting => DeploymentStatus::Connecting,
            Self::InstallingDependencies => DeploymentStatus::InstallingDeps,
            Self::DeployingScripts => DeploymentStatus::DeployingScripts,
            Self::ConfiguringInstrumentation => DeploymentStatus::ConfiguringInstrumentation,
            Self::Validating => DeploymentStatus::Validating,
        }
    }

    /// Human-readable step name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Preparing => "Prepare artifacts",
            Self::Connecting => "Connect to environment",
            Self::InstallingDependencies => "Install dependencies",
            Self::DeployingScripts => "Deploy artifacts",
            Self::ConfiguringInstrumentation => "Configure instrumentation",
            Self::Validating => "Validate deployment",
        }
    }
}

/// One step of a deployment and its own small state machine.
///
/// `Pending → Preparing → Completed | Failed`. A completed step always has
/// progress 100 and an end time; a failed step always has an error and an
/// end time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentStep {
    /// Step id.
    pub id: String,
    /// Which phase this step performs.
    pub kind: StepKind,
    /// Display name.
    pub name: String,
    /// Step status.
    pub status: DeploymentStatus,
    /// First start time.
    pub started_at: Option<DateTime<Utc>>,
    /// Completion or failure time.
    pub ended_at: Option<DateTime<Utc>>,
    /// Error of the final failed attempt.
    pub error: Option<String>,
    /// Free-form details, such as item counts.
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
    /// Progress in percent.
    pub progress: u8,
    /// Number of retries performed.
    pub retry_count: u32,
}

impl DeploymentStep {
    /// Creates a pending step.
    #[must_use]
    pub fn new(kind: StepKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            name: kind.name().to_string(),
            status: DeploymentStatus::Pending,
            started_at: None,
            ended_at: None,
            error: None,
            details: BTreeMap::new(),
            progress: 0,
            retry_count: 0,
        }
    }

    /// Marks the step running. The start time of the first attempt is kept.
    pub fn start(&mut self) {
        self.status = DeploymentStatus::Preparing;
        self.started_at.get_or_insert_with(Utc::now);
        self.error = None;
    }

    /// Records progress of `done` out of `total` items.
    pub fn set_progress(&mut self, done: usize, total: usize) {
        let percent = if total == 0 { 100 } else { (done * 100 / total).min(100) };
        self.progress = u8::try_from(percent).unwrap_or(100);
        self.details.insert("items_processed".to_string(), done.into());
        self.details.insert("items_total".to_string(), total.into());
    }

    /// Marks the step completed.
    pub fn complete(&mut self) {
        self.status = DeploymentStatus::Completed;
        self.progress = 100;
        self.error = None;
        self.ended_at = Some(Utc::now());
    }

    /// Marks the step failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = DeploymentStatus::Failed;
        self.error = Some(error.into());
        self.ended_at = Some(Utc::now());
    }

    /// Step duration in seconds, once finished.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> Option<f64> {
        let (start, end) = (self.started_at?, self.ended_at?);
        let micros = (end - start).num_microseconds()?;
        Some(micros as f64 / 1_000_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_lifecycle() {
        let mut step = DeploymentStep::new(StepKind::Connecting);
        assert_eq!(step.status, DeploymentStatus::Pending);
        assert!(step.duration_secs().is_none());

        step.start();
        assert_eq!(step.status, DeploymentStatus::Preparing);
        step.set_progress(1, 4);
        assert_eq!(step.progress, 25);

        step.complete();
        assert_eq!(step.progress, 100);
        assert!(step.ended_at.is_some());
        assert!(step.duration_secs().unwrap() >= 0.0);
    }

    #[test]
    fn test_failed_step_has_error() {
        let mut step = DeploymentStep::new(StepKind::Validating);
        step.start();
        step.fail("checksum mismatch");
        assert_eq!(step.status, DeploymentStatus::Failed);
        assert_eq!(step.error.as_deref(), Some("checksum mismatch"));
        assert!(step.ended_at.is_some());
    }

    #[test]
    fn test_kind_order_matches_phases() {
        let phases: Vec<_> = StepKind::ALL.iter().map(StepKind::phase).collect();
        assert_eq!(phases[0], DeploymentStatus::Preparing);
        assert_eq!(phases[5], DeploymentStatus::Validating);
    }
}
