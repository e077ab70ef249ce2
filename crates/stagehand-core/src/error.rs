//! Error types for the engine layer.

use stagehand_artifact::ArtifactError;
use stagehand_collector::CollectorError;
use stagehand_deploy::DeployError;
use stagehand_error::CommonError;
use stagehand_perf::PerfError;
use stagehand_runner::RunnerError;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while orchestrating components.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Common errors (I/O, config, not found, etc.).
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Artifact repository error.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// Deployment error.
    #[error(transparent)]
    Deploy(#[from] DeployError),

    /// Test runner error.
    #[error(transparent)]
    Runner(#[from] RunnerError),

    /// Artifact collector error.
    #[error(transparent)]
    Collector(#[from] CollectorError),

    /// Performance monitor error.
    #[error(transparent)]
    Perf(#[from] PerfError),

    /// The environment cannot host the request.
    #[error("environment {environment_id} incompatible: {reason}")]
    Incompatible {
        /// Environment id.
        environment_id: String,
        /// What does not match.
        reason: String,
    },
}

impl CoreError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Common(CommonError::config(msg))
    }

    /// Creates a new not found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::Common(CommonError::not_found(resource))
    }

    /// Returns true if the error reports a missing record.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Common(e) => e.is_not_found(),
            Self::Artifact(e) => e.is_not_found(),
            Self::Deploy(e) => e.is_not_found(),
            Self::Collector(e) => e.is_not_found(),
            Self::Runner(_) | Self::Perf(_) | Self::Incompatible { .. } => false,
        }
    }

    /// Returns true if the request was refused before anything ran.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        match self {
            Self::Runner(e) => e.is_rejection(),
            Self::Incompatible { .. } => true,
            _ => false,
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Common(CommonError::from(err))
    }
}
