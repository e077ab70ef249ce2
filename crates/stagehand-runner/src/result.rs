//! Test results.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stagehand_artifact::{ArtifactBundle, ArtifactSource};

/// Outcome classification of a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestStatus {
    /// Completed with exit code 0 and no crash.
    Passed,
    /// Non-zero exit code or guest crash.
    Failed,
    /// The wall-clock limit fired.
    Timeout,
    /// The run could not produce a verdict (setup, boot, protocol).
    Error,
    /// Cancelled by the caller.
    Cancelled,
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
            Self::Error => "ERROR",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Why a run did not pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A crash signature appeared on the console.
    Crash,
    /// The test body exited non-zero.
    NonZeroExit,
    /// The guest failed to boot.
    BootFailure,
    /// The emulator exited without printing the completion marker.
    MissingCompletion,
    /// The wall-clock limit fired.
    Timeout,
    /// The run was cancelled.
    Cancelled,
    /// Preparing or launching the emulator failed.
    Setup,
}

/// Details of a non-passing run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    /// Failure kind.
    pub kind: FailureKind,
    /// True if a crash signature matched.
    pub kernel_panic: bool,
    /// The signature that matched, if any.
    pub signature: Option<String>,
    /// Description.
    pub message: String,
    /// Console lines around the match.
    pub excerpt: Option<String>,
}

impl FailureInfo {
    /// Creates failure info without a console match.
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            kernel_panic: false,
            signature: None,
            message: message.into(),
            excerpt: None,
        }
    }
}

/// Structured result of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Test id.
    pub test_id: String,
    /// Run id, unique per invocation.
    pub run_id: String,
    /// Classification.
    pub status: TestStatus,
    /// Guest console output.
    pub stdout: String,
    /// Emulator diagnostics.
    pub stderr: String,
    /// Exit code reported by the guest, or by the emulator if none was.
    pub exit_code: Option<i32>,
    /// Wall-clock duration in seconds.
    pub duration_secs: f64,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Files produced by the run.
    pub artifacts: ArtifactBundle,
    /// Present unless the run passed.
    pub failure: Option<FailureInfo>,
    /// Directory holding the console log and extracted files.
    pub output_dir: Option<PathBuf>,
}

impl TestResult {
    /// Returns true if the run passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.status == TestStatus::Passed
    }

    /// Returns true if a crash signature was detected.
    #[must_use]
    pub fn kernel_panic(&self) -> bool {
        self.failure.as_ref().is_some_and(|f| f.kernel_panic)
    }
}

impl ArtifactSource for TestResult {
    fn test_id(&self) -> &str {
        &self.test_id
    }

    fn artifact_bundle(&self) -> &ArtifactBundle {
        &self.artifacts
    }
}
