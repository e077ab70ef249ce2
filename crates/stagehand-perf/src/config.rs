//! Monitor configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sampling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Sampling interval in milliseconds.
    pub interval_ms: u64,
    /// Samples kept in memory per session; the oldest are dropped first.
    pub max_samples: usize,
    /// Samples kept in the final metrics record.
    pub retained_points: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            max_samples: 3600,
            retained_points: 100,
        }
    }
}

impl MonitorConfig {
    /// Sampling interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}
