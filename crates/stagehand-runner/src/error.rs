//! Error types for the test runner.

use stagehand_error::CommonError;
use thiserror::Error;

use crate::arch::Architecture;

/// Result type alias for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Errors that prevent a test from running at all.
///
/// Failures of the test itself (crash, timeout, non-zero exit) are not
/// errors; they are reported in the returned `TestResult`.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Shared failure mode.
    #[error(transparent)]
    Common(#[from] CommonError),

    /// The runner is not configured for this architecture.
    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(Architecture),

    /// The emulator runner only serves virtual targets.
    #[error("environment {0} is not virtual")]
    NotVirtual(String),

    /// The requested guest memory exceeds the configured ceiling.
    #[error("requested {requested_mb} MiB of guest memory, ceiling is {ceiling_mb} MiB")]
    MemoryCeiling {
        /// Requested memory.
        requested_mb: u64,
        /// Configured ceiling.
        ceiling_mb: u64,
    },

    /// The boot image for an architecture is missing.
    #[error("boot image not found: {0}")]
    BootImage(String),

    /// Building the init image or artifact disk failed.
    #[error("image build failed: {0}")]
    Image(String),

    /// The emulator process could not be started.
    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        /// Emulator binary.
        binary: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Returns true if the error is a capability rejection raised before
    /// any process is spawned.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedArchitecture(_) | Self::NotVirtual(_) | Self::MemoryCeiling { .. }
        )
    }
}
