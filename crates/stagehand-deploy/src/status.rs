//! Deployment lifecycle states.

use serde::{Deserialize, Serialize};

/// Status of a deployment, or of a single step within one.
///
/// Steps only use `Pending`, `Preparing` (running), `Completed` and `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    /// Submitted, waiting for a concurrency slot.
    #[default]
    Pending,
    /// Validating and resolving artifacts.
    Preparing,
    /// Opening a session to the target.
    Connecting,
    /// Installing package-manager dependencies.
    InstallingDeps,
    /// Transferring artifacts.
    DeployingScripts,
    /// Applying instrumentation settings.
    ConfiguringInstrumentation,
    /// Verifying deployed artifacts.
    Validating,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled by the caller.
    Cancelled,
}

impl DeploymentStatus {
    /// Returns true for non-terminal states after `Pending`.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::Pending) && !self.is_final()
    }

    /// Returns true for the terminal states.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns the wire name of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Preparing => "PREPARING",
            Self::Connecting => "CONNECTING",
            Self::InstallingDeps => "INSTALLING_DEPS",
            Self::DeployingScripts => "DEPLOYING_SCRIPTS",
            Self::ConfiguringInstrumentation => "CONFIGURING_INSTRUMENTATION",
            Self::Validating => "VALIDATING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_and_final() {
        assert!(!DeploymentStatus::Pending.is_active());
        assert!(!DeploymentStatus::Pending.is_final());
        for status in [
            DeploymentStatus::Preparing,
            DeploymentStatus::Connecting,
            DeploymentStatus::InstallingDeps,
            DeploymentStatus::DeployingScripts,
            DeploymentStatus::ConfiguringInstrumentation,
            DeploymentStatus::Validating,
        ] {
            assert!(status.is_active(), "{status}");
            assert!(!status.is_final(), "{status}");
        }
        for status in [
            DeploymentStatus::Completed,
            DeploymentStatus::Failed,
            DeploymentStatus::Cancelled,
        ] {
            assert!(status.is_final());
            assert!(!status.is_active());
        }
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&DeploymentStatus::InstallingDeps).unwrap();
        assert_eq!(json, "\"INSTALLING_DEPS\"");
    }
}
