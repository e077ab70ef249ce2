//! Deployment configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Default overall deployment timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default connection timeout in seconds.
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Default number of retries per step.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default maximum number of concurrently executing deployments.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Default per-artifact transfer ceiling (100 MiB).
pub const DEFAULT_MAX_TRANSFER_BYTES: u64 = 100 * 1024 * 1024;

/// Timeouts, retry policy and limits for a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    /// Overall deployment timeout in seconds.
    pub timeout_secs: u64,
    /// Timeout for establishing a target session, in seconds.
    pub connection_timeout_secs: u64,
    /// Retries per step after the first attempt.
    pub retry_attempts: u32,
    /// Delay before the first retry, in seconds.
    pub retry_base_delay_secs: f64,
    /// Multiplier applied to the delay for each further retry.
    pub backoff_multiplier: f64,
    /// Maximum number of deployments executing at once.
    pub max_concurrent_deployments: usize,
    /// Largest artifact that may be transferred, in bytes.
    pub max_transfer_bytes: u64,
    /// Re-verify artifact checksums before transfer.
    pub validate_checksums: bool,
    /// Roll back transferred artifacts when a deployment fails.
    pub cleanup_on_failure: bool,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            connection_timeout_secs: DEFAULT_CONNECTION_TIMEOUT_SECS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_base_delay_secs: 2.0,
            backoff_multiplier: 2.0,
            max_concurrent_deployments: DEFAULT_MAX_CONCURRENT,
            max_transfer_bytes: DEFAULT_MAX_TRANSFER_BYTES,
            validate_checksums: true,
            cleanup_on_failure: true,
        }
    }
}

impl DeploymentConfig {
    /// Overall deployment timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Connection timeout.
    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Builds the retry policy described by this configuration.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_secs_f64(self.retry_base_delay_secs.max(0.0)),
            self.backoff_multiplier,
        )
    }
}
