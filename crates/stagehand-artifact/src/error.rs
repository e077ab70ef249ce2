//! Error types for artifact operations.

use stagehand_error::CommonError;
use thiserror::Error;

/// Result type alias for artifact operations.
pub type Result<T> = std::result::Result<T, ArtifactError>;

/// Errors that can occur while storing, loading or packaging artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Shared failure mode.
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Artifact failed validation.
    #[error("invalid artifact {id}: {reason}")]
    Invalid {
        /// Artifact id.
        id: String,
        /// Joined validation messages.
        reason: String,
    },

    /// Content does not hash to the recorded checksum.
    #[error("checksum mismatch for artifact {id}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Artifact id.
        id: String,
        /// Recorded checksum.
        expected: String,
        /// Checksum of the bytes actually present.
        actual: String,
    },

    /// Dependency graph contains a cycle.
    #[error("dependency cycle: {0}")]
    DependencyCycle(String),

    /// Package archive is malformed.
    #[error("package error: {0}")]
    Package(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ArtifactError {
    /// Returns true if the error reports a missing artifact.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Common(CommonError::NotFound(_)))
    }

    pub(crate) fn not_found(id: &str) -> Self {
        Self::Common(CommonError::not_found(format!("artifact {id}")))
    }

    pub(crate) fn storage(msg: impl Into<String>) -> Self {
        Self::Common(CommonError::internal(msg))
    }
}
