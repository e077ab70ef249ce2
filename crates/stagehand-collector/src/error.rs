//! Error types for the collector.

use stagehand_error::CommonError;
use thiserror::Error;

/// Result type alias for collector operations.
pub type Result<T> = std::result::Result<T, CollectorError>;

/// Collector errors.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Shared failure mode.
    #[error(transparent)]
    Common(#[from] CommonError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Sidecar (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CollectorError {
    /// Returns true if the artifact is unknown.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Common(e) if e.is_not_found())
    }

    pub(crate) fn not_found(id: &str) -> Self {
        CommonError::not_found(format!("collected artifact {id}")).into()
    }

    pub(crate) fn poisoned() -> Self {
        CommonError::internal("collector index lock poisoned").into()
    }
}
