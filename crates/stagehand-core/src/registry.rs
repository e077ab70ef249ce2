//! Test environment registry.
//!
//! Environments are owned by whatever inventory the deployment uses; the
//! engine only needs to look them up by id. [`InMemoryRegistry`] is seeded
//! from configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use stagehand_runner::Architecture;
use tracing::debug;

/// How an environment executes tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentKind {
    /// Emulated guest booted per test.
    #[default]
    Virtual,
    /// Real hardware.
    Physical,
}

impl EnvironmentKind {
    /// Returns true for emulated environments.
    #[must_use]
    pub const fn is_virtual(self) -> bool {
        matches!(self, Self::Virtual)
    }
}

/// A place deployments go and tests run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetEnvironment {
    /// Environment id referenced by plans and test cases.
    pub id: String,
    /// Guest architecture.
    pub architecture: Architecture,
    /// Virtual or physical.
    #[serde(default)]
    pub kind: EnvironmentKind,
    /// Memory available to tests in MiB; 0 uses the runner default.
    #[serde(default)]
    pub memory_mb: u64,
    /// Directory deployments are staged into. Defaults to
    /// `<data_dir>/staging/<id>`.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
    /// Execute dependency install and verify commands while deploying.
    #[serde(default)]
    pub run_commands: bool,
}

impl TargetEnvironment {
    /// Creates a virtual environment with default memory.
    #[must_use]
    pub fn virtual_machine(id: impl Into<String>, architecture: Architecture) -> Self {
        Self {
            id: id.into(),
            architecture,
            kind: EnvironmentKind::Virtual,
            memory_mb: 0,
            staging_dir: None,
            run_commands: false,
        }
    }

    /// Creates a physical environment.
    #[must_use]
    pub fn physical(id: impl Into<String>, architecture: Architecture) -> Self {
        Self {
            kind: EnvironmentKind::Physical,
            ..Self::virtual_machine(id, architecture)
        }
    }

    /// Sets the staging directory.
    #[must_use]
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// Sets the memory size.
    #[must_use]
    pub const fn with_memory_mb(mut self, memory_mb: u64) -> Self {
        self.memory_mb = memory_mb;
        self
    }
}

/// Lookup of environments by id.
pub trait EnvironmentRegistry: Send + Sync {
    /// Environment with `id`, if registered.
    fn get(&self, id: &str) -> Option<TargetEnvironment>;

    /// Every registered environment, ordered by id.
    fn list(&self) -> Vec<TargetEnvironment>;
}

/// Registry held in memory.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    environments: RwLock<BTreeMap<String, TargetEnvironment>>,
}

impl InMemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an environment. Returns the previous entry.
    pub fn register(&self, environment: TargetEnvironment) -> Option<TargetEnvironment> {
        debug!(environment_id = %environment.id, kind = ?environment.kind, "registering environment");
        self.environments
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(environment.id.clone(), environment)
    }

    /// Removes an environment.
    pub fn unregister(&self, id: &str) -> Option<TargetEnvironment> {
        self.environments
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }
}

impl FromIterator<TargetEnvironment> for InMemoryRegistry {
    fn from_iter<I: IntoIterator<Item = TargetEnvironment>>(environments: I) -> Self {
        let registry = Self::new();
        for environment in environments {
            registry.register(environment);
        }
        registry
    }
}

impl EnvironmentRegistry for InMemoryRegistry {
    fn get(&self, id: &str) -> Option<TargetEnvironment> {
        self.environments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn list(&self) -> Vec<TargetEnvironment> {
        self.environments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}
