//! Runner configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::arch::Architecture;

/// Default guest memory in MiB.
pub const DEFAULT_MEMORY_MB: u64 = 512;

/// Default hard ceiling on guest memory in MiB.
pub const DEFAULT_MEMORY_CEILING_MB: u64 = 8192;

/// Default grace window for emulator shutdown in milliseconds.
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 5000;

/// Default artifact export disk size in MiB.
pub const DEFAULT_ARTIFACT_DISK_MB: u64 = 64;

/// Emulator runner settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Directory holding default kernels, named per architecture.
    pub boot_image_dir: PathBuf,
    /// Per-architecture kernel overrides.
    pub kernels: BTreeMap<Architecture, PathBuf>,
    /// Optional base initramfs the payload is appended to.
    pub base_initramfs: Option<PathBuf>,
    /// Guest memory when the target does not request any.
    pub memory_mb: u64,
    /// Requests above this are rejected.
    pub memory_ceiling_mb: u64,
    /// Shutdown grace window, split between the monitor request and SIGTERM.
    pub grace_period_ms: u64,
    /// Artifact export disk size.
    pub artifact_disk_mb: u64,
    /// Parent of per-run scratch directories.
    pub work_dir: PathBuf,
    /// Parent of per-run output directories (console log, extracted files).
    pub output_dir: PathBuf,
    /// Architectures this host can emulate.
    pub architectures: Vec<Architecture>,
    /// Console chunks buffered between reader tasks and the run loop.
    pub console_channel_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        let base = std::env::temp_dir().join("stagehand");
        Self {
            boot_image_dir: PathBuf::from("/var/lib/stagehand/images"),
            kernels: BTreeMap::new(),
            base_initramfs: None,
            memory_mb: DEFAULT_MEMORY_MB,
            memory_ceiling_mb: DEFAULT_MEMORY_CEILING_MB,
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            artifact_disk_mb: DEFAULT_ARTIFACT_DISK_MB,
            work_dir: base.join("work"),
            output_dir: base.join("runs"),
            architectures: Architecture::ALL.to_vec(),
            console_channel_capacity: 64,
        }
    }
}

impl RunnerConfig {
    /// Shutdown grace window.
    #[must_use]
    pub const fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Kernel image for `arch`.
    #[must_use]
    pub fn kernel_for(&self, arch: Architecture) -> PathBuf {
        self.kernels
            .get(&arch)
            .cloned()
            .unwrap_or_else(|| self.boot_image_dir.join(arch.default_kernel_name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_override() {
        let mut config = RunnerConfig {
            boot_image_dir: "/images".into(),
            ..RunnerConfig::default()
        };
        assert_eq!(
            config.kernel_for(Architecture::X86_64),
            PathBuf::from("/images/vmlinuz-x86_64")
        );
        config
            .kernels
            .insert(Architecture::X86_64, "/custom/bzImage".into());
        assert_eq!(config.kernel_for(Architecture::X86_64), PathBuf::from("/custom/bzImage"));
    }

    #[test]
    fn test_partial_json() {
        let config: RunnerConfig =
            serde_json::from_str(r#"{"memory_mb": 1024, "kernels": {"aarch64": "/k/Image"}}"#).unwrap();
        assert_eq!(config.memory_mb, 1024);
        assert_eq!(config.grace_period(), Duration::from_secs(5));
        assert_eq!(config.kernel_for(Architecture::Aarch64), PathBuf::from("/k/Image"));
    }
}
