//! Test cases consumed by the runner.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::arch::Architecture;

/// Default per-test timeout in seconds.
pub const DEFAULT_TEST_TIMEOUT_SECS: u64 = 300;

/// Where a test must run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    /// Environment id from the registry.
    pub environment_id: String,
    /// Guest architecture.
    pub architecture: Architecture,
    /// True for emulated targets.
    #[serde(default = "default_true")]
    pub is_virtual: bool,
    /// Guest memory in MiB; 0 selects the runner default.
    #[serde(default)]
    pub memory_mb: u64,
}

const fn default_true() -> bool {
    true
}

/// A file injected into the init image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadFile {
    /// Absolute guest path.
    pub path: String,
    /// Content.
    pub content: Vec<u8>,
    /// Permission bits.
    #[serde(default = "default_mode")]
    pub mode: u32,
}

const fn default_mode() -> u32 {
    0o644
}

/// One test to run inside a freshly booted guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Test id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Shell script executed as the test body.
    pub script: String,
    /// Wall-clock limit in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Target metadata.
    pub target: TargetSpec,
    /// Environment variables exported before the script runs.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Extra files injected into the guest.
    #[serde(default)]
    pub files: Vec<PayloadFile>,
    /// Attach a writable disk and collect what the test leaves on it.
    #[serde(default)]
    pub export_artifacts: bool,
}

const fn default_timeout() -> u64 {
    DEFAULT_TEST_TIMEOUT_SECS
}

impl TestCase {
    /// Creates a test for a virtual target of the given architecture.
    #[must_use]
    pub fn new(name: impl Into<String>, script: impl Into<String>, architecture: Architecture) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            script: script.into(),
            timeout_secs: DEFAULT_TEST_TIMEOUT_SECS,
            target: TargetSpec {
                environment_id: format!("qemu-{architecture}"),
                architecture,
                is_virtual: true,
                memory_mb: 0,
            },
            env: BTreeMap::new(),
            files: Vec::new(),
            export_artifacts: false,
        }
    }

    /// Sets the timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    /// Sets the target environment id.
    #[must_use]
    pub fn with_environment(mut self, environment_id: impl Into<String>) -> Self {
        self.target.environment_id = environment_id.into();
        self
    }

    /// Exports a variable to the script.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Injects a file.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<Vec<u8>>, mode: u32) -> Self {
        self.files.push(PayloadFile {
            path: path.into(),
            content: content.into(),
            mode,
        });
        self
    }

    /// Requests an artifact export disk.
    #[must_use]
    pub const fn with_artifact_export(mut self) -> Self {
        self.export_artifacts = true;
        self
    }

    /// Wall-clock limit.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
