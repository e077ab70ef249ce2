//! Completion reports and their persistence.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stagehand_error::CommonError;
use tracing::debug;

use crate::error::Result;
use crate::result::DeploymentResult;
use crate::status::DeploymentStatus;

/// Timing summary of a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    /// Wall-clock duration of the deployment.
    pub total_duration_seconds: f64,
    /// Mean duration of finished steps.
    pub average_step_seconds: f64,
    /// Name of the slowest step.
    pub slowest_step: Option<String>,
    /// Duration of the slowest step.
    pub slowest_step_seconds: f64,
    /// Transfer throughput in bytes per second.
    pub throughput_bytes_per_sec: f64,
}

/// Aggregate counts for a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Final status.
    pub status: DeploymentStatus,
    /// Steps that completed.
    pub steps_completed: usize,
    /// Steps that were started.
    pub steps_total: usize,
    /// Artifacts transferred.
    pub artifacts_deployed: usize,
    /// Dependencies installed.
    pub dependencies_installed: usize,
    /// Retries across steps.
    pub retry_count: u32,
    /// Completion percentage.
    pub completion_percentage: f64,
    /// Present once the deployment has finished.
    pub performance: Option<PerformanceSummary>,
}

/// Deployment result plus derived summary, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionReport {
    /// The full result.
    pub result: DeploymentResult,
    /// Derived summary.
    pub summary: ReportSummary,
    /// Time the report was generated.
    pub generated_at: DateTime<Utc>,
}

impl CompletionReport {
    /// Builds a report from a result.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_result(result: &DeploymentResult) -> Self {
        let durations: Vec<(&str, f64)> = result
            .steps
            .iter()
            .filter_map(|s| s.duration_secs().map(|d| (s.name.as_str(), d)))
            .collect();
        let slowest = durations
            .iter()
            .copied()
            .max_by(|a, b| a.1.total_cmp(&b.1));

        let performance = result.duration_secs().map(|total| PerformanceSummary {
            total_duration_seconds: total,
            average_step_seconds: if durations.is_empty() {
                0.0
            } else {
                durations.iter().map(|(_, d)| d).sum::<f64>() / durations.len() as f64
            },
            slowest_step: slowest.map(|(name, _)| name.to_string()),
            slowest_step_seconds: slowest.map_or(0.0, |(_, d)| d),
            throughput_bytes_per_sec: result.transfer.throughput_bytes_per_sec,
        });

        Self {
            summary: ReportSummary {
                status: result.status,
                steps_completed: result.steps_completed(),
                steps_total: result.steps.len(),
                artifacts_deployed: result.artifacts_deployed,
                dependencies_installed: result.dependencies_installed,
                retry_count: result.retry_count,
                completion_percentage: result.completion_percentage(),
                performance,
            },
            result: result.clone(),
            generated_at: Utc::now(),
        }
    }
}

/// Stores one JSON report per deployment id.
pub struct ReportStore {
    dir: PathBuf,
}

impl ReportStore {
    /// Creates a store in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, deployment_id: &str) -> PathBuf {
        self.dir.join(format!("{deployment_id}.json"))
    }

    /// Persists a report, replacing any previous one for the same id.
    ///
    /// # Errors
    ///
    /// Returns an error if the report cannot be written.
    pub fn save(&self, report: &CompletionReport) -> Result<PathBuf> {
        let path = self.path(&report.result.deployment_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(report)?)?;
        fs::rename(&tmp, &path)?;
        debug!(deployment_id = %report.result.deployment_id, path = %path.display(), "saved report");
        Ok(path)
    }

    /// Loads a report.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if no report exists for the id.
    pub fn load(&self, deployment_id: &str) -> Result<CompletionReport> {
        let path = self.path(deployment_id);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CommonError::not_found(format!("report {deployment_id}")).into());
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    /// Ids of every stored report, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut ids: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::DeploymentPlan;
    use crate::step::{DeploymentStep, StepKind};
    use stagehand_artifact::{Artifact, ArtifactType};
    use tempfile::tempdir;

    fn finished_result() -> DeploymentResult {
        let plan = DeploymentPlan::new("env", vec![Artifact::new("a", ArtifactType::Data, "a", "/a")]);
        let mut result = DeploymentResult::pending(&plan);
        for kind in [StepKind::Preparing, StepKind::Connecting] {
            let mut step = DeploymentStep::new(kind);
            step.start();
            step.set_progress(1, 1);
            step.complete();
            result.steps.push(step);
        }
        result.artifacts_deployed = 1;
        result.transfer.record(1, 0.001);
        result.finish(DeploymentStatus::Completed, None);
        result
    }

    #[test]
    fn test_summary() {
        let report = CompletionReport::from_result(&finished_result());
        assert_eq!(report.summary.steps_completed, 2);
        assert_eq!(report.summary.steps_total, 2);
        let performance = report.summary.performance.unwrap();
        assert!(performance.total_duration_seconds >= 0.0);
        assert!(performance.slowest_step.is_some());
    }

    #[test]
    fn test_store_round_trip() {
        let dir = tempdir().unwrap();
        let store = ReportStore::new(dir.path()).unwrap();
        let report = CompletionReport::from_result(&finished_result());

        store.save(&report).unwrap();
        let loaded = store.load(&report.result.deployment_id).unwrap();
        assert_eq!(loaded, report);
        assert_eq!(store.list(), vec![report.result.deployment_id.clone()]);

        let err = store.load("missing").unwrap_err();
        assert!(err.is_not_found());
    }
}
