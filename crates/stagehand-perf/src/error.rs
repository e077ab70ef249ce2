//! Error types for performance monitoring.

use stagehand_error::CommonError;
use thiserror::Error;

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, PerfError>;

/// Monitor errors.
#[derive(Debug, Error)]
pub enum PerfError {
    /// Shared failure mode.
    #[error(transparent)]
    Common(#[from] CommonError),

    /// The resource probe failed.
    #[error("probe failed: {0}")]
    Probe(#[from] std::io::Error),
}
