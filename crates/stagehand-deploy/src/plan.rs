//! Deployment plans and their validation.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stagehand_artifact::{Artifact, Dependency};
use uuid::Uuid;

use crate::config::DeploymentConfig;
use crate::instrumentation::InstrumentationConfig;
use crate::status::DeploymentStatus;

const BASE_ESTIMATE_SECS: f64 = 10.0;
const PER_ARTIFACT_SECS: f64 = 2.0;
const PER_MIB_SECS: f64 = 1.0;
const PER_DEPENDENCY_SECS: f64 = 15.0;
const INSTRUMENTATION_FACTOR: f64 = 1.5;

/// Severity of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The plan is rejected.
    Error,
    /// The plan runs, but the caller should know.
    Warning,
}

/// One problem found while validating a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Issue severity.
    pub severity: Severity,
    /// Description.
    pub message: String,
}

impl ValidationIssue {
    pub(crate) fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    /// Returns true if the issue rejects the plan.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{label}: {}", self.message)
    }
}

/// What to deploy, where, and under what policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    /// Plan id.
    #[serde(default = "new_id")]
    pub id: String,
    /// Target environment id.
    pub environment_id: String,
    /// Artifacts in caller order; the engine reorders by dependency.
    pub artifacts: Vec<Artifact>,
    /// Package-manager dependencies to install first.
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    /// Instrumentation to configure.
    #[serde(default)]
    pub instrumentation: InstrumentationConfig,
    /// Timeouts, retries and limits.
    #[serde(default)]
    pub config: DeploymentConfig,
    /// Creation time.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Last known status of the plan.
    #[serde(default)]
    pub status: DeploymentStatus,
    /// Estimated duration in seconds.
    #[serde(default)]
    pub estimated_duration_secs: Option<f64>,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

impl DeploymentPlan {
    /// Creates a plan with default configuration and no instrumentation.
    #[must_use]
    pub fn new(environment_id: impl Into<String>, artifacts: Vec<Artifact>) -> Self {
        let mut plan = Self {
            id: new_id(),
            environment_id: environment_id.into(),
            artifacts,
            dependencies: Vec::new(),
            instrumentation: InstrumentationConfig::default(),
            config: DeploymentConfig::default(),
            created_at: Utc::now(),
            status: DeploymentStatus::Pending,
            estimated_duration_secs: None,
        };
        plan.refresh_estimate();
        plan
    }

    /// Sets the dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<Dependency>) -> Self {
        self.dependencies = dependencies;
        self.refresh_estimate();
        self
    }

    /// Sets the instrumentation.
    #[must_use]
    pub fn with_instrumentation(mut self, instrumentation: InstrumentationConfig) -> Self {
        self.instrumentation = instrumentation;
        self.refresh_estimate();
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: DeploymentConfig) -> Self {
        self.config = config;
        self
    }

    /// Total artifact payload in bytes.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.artifacts.iter().map(|a| a.content.len() as u64).sum()
    }

    /// Estimates how long the deployment will take.
    ///
    /// 10 s base, 2 s per artifact, 1 s per MiB, 15 s per dependency,
    /// half again as long with instrumentation.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn estimate_duration(&self) -> Duration {
        let mib = self.total_bytes() as f64 / (1024.0 * 1024.0);
        let mut secs = BASE_ESTIMATE_SECS
            + PER_ARTIFACT_SECS * self.artifacts.len() as f64
            + PER_MIB_SECS * mib
            + PER_DEPENDENCY_SECS * self.dependencies.len() as f64;
        if self.instrumentation.is_enabled() {
            secs *= INSTRUMENTATION_FACTOR;
        }
        Duration::from_secs_f64(secs)
    }

    /// Recomputes `estimated_duration_secs`, e.g. after deserializing.
    pub fn refresh_estimate(&mut self) {
        self.estimated_duration_secs = Some(self.estimate_duration().as_secs_f64());
    }

    /// Validates the plan.
    ///
    /// Any issue with [`Severity::Error`] rejects the plan. A timeout shorter
    /// than the estimate is only a warning.
    #[must_use]
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.environment_id.trim().is_empty() {
            issues.push(ValidationIssue::error("environment id is empty"));
        }
        if self.artifacts.is_empty() {
            issues.push(ValidationIssue::error("plan has no artifacts"));
        }

        let mut seen = HashSet::new();
        for artifact in &self.artifacts {
            if !seen.insert(artifact.id.as_str()) {
                issues.push(ValidationIssue::error(format!(
                    "duplicate artifact id {}",
                    artifact.id
                )));
            }
            if artifact.content.is_empty() {
                issues.push(ValidationIssue::error(format!(
                    "artifact {} has no content",
                    artifact.id
                )));
            }
            if artifact.content.len() as u64 > self.config.max_transfer_bytes {
                issues.push(ValidationIssue::error(format!(
                    "artifact {} is {} bytes, over the {} byte transfer limit",
                    artifact.id,
                    artifact.content.len(),
                    self.config.max_transfer_bytes
                )));
            }
            if !stagehand_artifact::permissions::is_valid(&artifact.permissions) {
                issues.push(ValidationIssue::error(format!(
                    "artifact {} has invalid permissions {:?}",
                    artifact.id, artifact.permissions
                )));
            }
            for problem in artifact.path_errors() {
                issues.push(ValidationIssue::error(format!(
                    "artifact {}: {problem}",
                    artifact.id
                )));
            }
            if self.config.validate_checksums && !artifact.verify_checksum() {
                issues.push(ValidationIssue::error(format!(
                    "artifact {} checksum does not match content",
                    artifact.id
                )));
            }
        }

        for (index, dependency) in self.dependencies.iter().enumerate() {
            if dependency.name.trim().is_empty() {
                issues.push(ValidationIssue::error(format!(
                    "dependency #{index} has no name"
                )));
            }
        }

        let estimate = self.estimate_duration();
        if self.config.timeout() < estimate {
            issues.push(ValidationIssue::warning(format!(
                "timeout {}s is shorter than the estimated {:.0}s",
                self.config.timeout_secs,
                estimate.as_secs_f64()
            )));
        }

        issues
    }

    /// Returns true if validation found no errors.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.validate().iter().any(ValidationIssue::is_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_artifact::{ArtifactType, PackageManager};

    fn artifact(id: &str, content: &str) -> Artifact {
        Artifact::new(format!("{id}.sh"), ArtifactType::Script, content, format!("/opt/{id}.sh")).with_id(id)
    }

    #[test]
    fn test_estimate() {
        let plan = DeploymentPlan::new("env", vec![artifact("a", "x"), artifact("b", "y")])
            .with_dependencies(vec![Dependency::new("curl", PackageManager::Apt)]);
        // 10 + 2*2 + ~0 + 15
        let secs = plan.estimate_duration().as_secs_f64();
        assert!((secs - 29.0).abs() < 0.01, "{secs}");

        let plan = plan.with_instrumentation(InstrumentationConfig::all());
        let secs = plan.estimate_duration().as_secs_f64();
        assert!((secs - 43.5).abs() < 0.01, "{secs}");
        assert!(plan.estimated_duration_secs.is_some());
    }

    #[test]
    fn test_valid_plan() {
        let plan = DeploymentPlan::new("env", vec![artifact("a", "x")]);
        assert!(plan.validate().is_empty());
        assert!(plan.is_valid());
    }

    #[test]
    fn test_rejections() {
        let mut oversized = artifact("big", "0123456789");
        oversized.permissions = "999".to_string();
        let config = DeploymentConfig {
            max_transfer_bytes: 5,
            ..Default::default()
        };
        let plan = DeploymentPlan::new(
            "env",
            vec![artifact("a", "x"), artifact("a", "y"), artifact("empty", ""), oversized],
        )
        .with_dependencies(vec![Dependency::new("  ", PackageManager::Apt)])
        .with_config(config);

        let issues = plan.validate();
        let errors: Vec<_> = issues.iter().filter(|i| i.is_error()).collect();
        assert!(errors.iter().any(|i| i.message.contains("duplicate artifact id a")));
        assert!(errors.iter().any(|i| i.message.contains("empty has no content")));
        assert!(errors.iter().any(|i| i.message.contains("transfer limit")));
        assert!(errors.iter().any(|i| i.message.contains("invalid permissions")));
        assert!(errors.iter().any(|i| i.message.contains("has no name")));
        assert!(!plan.is_valid());
    }

    #[test]
    fn test_escaping_target_path_rejected() {
        let mut escaping = artifact("esc", "x");
        escaping.target_path = "/opt/../../etc/passwd".to_string();
        let plan = DeploymentPlan::new("env", vec![escaping]);
        let issues = plan.validate();
        assert!(issues
            .iter()
            .any(|i| i.is_error() && i.message.contains("artifact esc") && i.message.contains("'..'")));
        assert!(!plan.is_valid());
    }

    #[test]
    fn test_empty_plan_rejected() {
        let plan = DeploymentPlan::new("env", Vec::new());
        assert!(!plan.is_valid());
    }

    #[test]
    fn test_short_timeout_is_warning() {
        let config = DeploymentConfig {
            timeout_secs: 5,
            ..Default::default()
        };
        let plan = DeploymentPlan::new("env", vec![artifact("a", "x")]).with_config(config);
        let issues = plan.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Warning);
        assert!(plan.is_valid());
    }
}
