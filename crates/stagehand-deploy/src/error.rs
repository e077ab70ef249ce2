//! Error types for deployment operations.

use stagehand_artifact::ArtifactError;
use stagehand_error::CommonError;
use thiserror::Error;

use crate::plan::ValidationIssue;

/// Result type alias for deployment operations.
pub type Result<T> = std::result::Result<T, DeployError>;

/// Errors that can occur while planning or executing a deployment.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Shared failure mode.
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Artifact repository error.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// The plan was rejected before execution.
    #[error("plan rejected: {}", format_issues(.0))]
    Validation(Vec<ValidationIssue>),

    /// The deployment target reported a failure.
    #[error("target error: {0}")]
    Target(String),

    /// A dependency could not be installed.
    #[error("dependency {name} failed: {reason}")]
    Dependency {
        /// Dependency name.
        name: String,
        /// Failure description.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DeployError {
    /// Creates a target error.
    #[must_use]
    pub fn target(msg: impl Into<String>) -> Self {
        Self::Target(msg.into())
    }

    /// Returns true if retrying the failed operation may succeed.
    ///
    /// Connection, transfer and install failures are transient; validation,
    /// integrity and state errors are not.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Target(_) | Self::Dependency { .. } | Self::Io(_) => true,
            Self::Common(e) => e.is_transient(),
            Self::Artifact(_) | Self::Validation(_) | Self::Json(_) => false,
        }
    }

    /// Returns true if the error reports a missing record.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        match self {
            Self::Common(e) => e.is_not_found(),
            Self::Artifact(e) => e.is_not_found(),
            _ => false,
        }
    }
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
