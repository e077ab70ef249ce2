//! Configuration management.
//!
//! Stagehand configuration is loaded from multiple sources with the
//! following priority:
//!
//! 1. Environment variables (`STAGEHAND_*`, nested keys joined by `__`)
//! 2. User configuration file (`~/.config/stagehand/config.toml`)
//! 3. System configuration file (`/etc/stagehand/config.toml`)
//! 4. Default values
//!
//! ## Example Configuration File
//!
//! ```toml
//! data_dir = "/srv/stagehand"
//!
//! [deploy]
//! timeout_secs = 600
//! retry_attempts = 5
//!
//! [runner]
//! memory_mb = 1024
//! grace_period_ms = 3000
//!
//! [collector.retention.core_dumps]
//! max_age_days = 7
//! max_count = 10
//!
//! [monitor]
//! interval_ms = 500
//!
//! [[environments]]
//! id = "rpi-4"
//! architecture = "aarch64"
//! kind = "physical"
//! staging_dir = "/mnt/rpi-4"
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! `STAGEHAND_RUNNER__MEMORY_MB=2048` overrides `runner.memory_mb`.

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use stagehand_collector::RetentionConfig;
use stagehand_constants::storage::{
    ARTIFACTS_DIR, COLLECTED_DIR, IMAGES_DIR, REPORTS_DIR, RUNS_DIR, STAGING_DIR, WORK_DIR,
};
use stagehand_deploy::DeploymentConfig;
use stagehand_perf::MonitorConfig;
use stagehand_runner::RunnerConfig;

use crate::registry::TargetEnvironment;

/// Stagehand configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of all persistent state.
    pub data_dir: PathBuf,
    /// Deployment defaults.
    pub deploy: DeploymentConfig,
    /// Emulator runner settings.
    pub runner: RunnerConfig,
    /// Collected artifact storage.
    pub collector: CollectorConfig,
    /// Resource sampling.
    pub monitor: MonitorConfig,
    /// Environments besides the built-in `qemu-<arch>` ones.
    pub environments: Vec<TargetEnvironment>,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            runner: runner_defaults(&data_dir),
            data_dir,
            deploy: DeploymentConfig::default(),
            collector: CollectorConfig::default(),
            monitor: MonitorConfig::default(),
            environments: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from files and environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source cannot be parsed.
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(system_config_path()))
            .merge(Toml::file(user_config_path()))
            .merge(Env::prefixed("STAGEHAND_").split("__"))
            .extract()
            .map(Self::rebased)
    }

    /// Loads configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("STAGEHAND_").split("__"))
            .extract()
            .map(Self::rebased)
    }

    /// Moves runner directories that were left at their defaults under a
    /// relocated `data_dir`.
    fn rebased(mut self) -> Self {
        let defaults = runner_defaults(&default_data_dir());
        let relocated = runner_defaults(&self.data_dir);
        if self.runner.boot_image_dir == defaults.boot_image_dir {
            self.runner.boot_image_dir = relocated.boot_image_dir;
        }
        if self.runner.work_dir == defaults.work_dir {
            self.runner.work_dir = relocated.work_dir;
        }
        if self.runner.output_dir == defaults.output_dir {
            self.runner.output_dir = relocated.output_dir;
        }
        self
    }

    /// Returns the path to the artifact repository.
    #[must_use]
    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join(ARTIFACTS_DIR)
    }

    /// Returns the path to collected test artifacts.
    #[must_use]
    pub fn collector_dir(&self) -> PathBuf {
        self.collector
            .root
            .clone()
            .unwrap_or_else(|| self.data_dir.join(COLLECTED_DIR))
    }

    /// Returns the path to deployment reports.
    #[must_use]
    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir.join(REPORTS_DIR)
    }

    /// Returns the path to per-run scratch directories.
    #[must_use]
    pub fn work_dir(&self) -> PathBuf {
        self.runner.work_dir.clone()
    }

    /// Returns the path to boot images.
    #[must_use]
    pub fn images_dir(&self) -> PathBuf {
        self.runner.boot_image_dir.clone()
    }

    /// Returns the staging directory of `environment`.
    #[must_use]
    pub fn staging_dir(&self, environment: &TargetEnvironment) -> PathBuf {
        environment
            .staging_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join(STAGING_DIR).join(&environment.id))
    }
}

/// Collector configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Storage root (defaults to `<data_dir>/collected`).
    pub root: Option<PathBuf>,
    /// Per-category retention.
    pub retention: RetentionConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn runner_defaults(data_dir: &Path) -> RunnerConfig {
    RunnerConfig {
        boot_image_dir: data_dir.join(IMAGES_DIR),
        work_dir: data_dir.join(WORK_DIR),
        output_dir: data_dir.join(RUNS_DIR),
        ..RunnerConfig::default()
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("/var/lib"))
        .join("stagehand")
}

fn user_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("stagehand")
        .join("config.toml")
}

fn system_config_path() -> PathBuf {
    PathBuf::from("/etc/stagehand/config.toml")
}
