//! Deployment targets.
//!
//! The engine drives every step through [`DeploymentTarget`]; remote
//! transports implement it elsewhere. [`LocalTarget`] stages artifacts
//! into a directory, which is how virtual environments receive their
//! payload before boot.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stagehand_artifact::{has_parent_component, sha256_hex, Artifact, Dependency};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{DeployError, Result};
use crate::instrumentation::{InstrumentationConfig, InstrumentationSettings};
use crate::plan::ValidationIssue;

/// Directory inside the staging root holding deployment manifests.
pub const MANIFEST_DIR: &str = ".stagehand";

const DEPENDENCY_MANIFEST: &str = "dependencies.json";
const INSTRUMENTATION_MANIFEST: &str = "instrumentation.json";

/// A place artifacts can be deployed to.
#[async_trait]
pub trait DeploymentTarget: Send + Sync {
    /// Short description for logs.
    fn describe(&self) -> String;

    /// Opens a session to the target.
    async fn connect(&self) -> Result<()>;

    /// Transfers one artifact, returning the bytes written.
    async fn transfer(&self, artifact: &Artifact) -> Result<u64>;

    /// Installs one dependency.
    async fn install(&self, dependency: &Dependency) -> Result<()>;

    /// Applies instrumentation settings.
    async fn configure_instrumentation(&self, config: &InstrumentationConfig) -> Result<()>;

    /// Verifies that deployed artifacts are intact.
    async fn verify(&self, artifacts: &[Artifact]) -> Result<()>;

    /// Removes previously transferred artifacts.
    async fn rollback(&self, artifacts: &[Artifact]) -> Result<()>;

    /// Closes the session.
    async fn disconnect(&self) -> Result<()>;
}

/// Dependency record written by [`LocalTarget`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledDependency {
    /// Dependency name.
    pub name: String,
    /// Requested version.
    pub version: Option<String>,
    /// Package manager.
    pub package_manager: String,
    /// Install command, if any.
    pub install_command: Option<String>,
}

/// Stages artifacts under a local directory.
///
/// Artifact target paths are interpreted relative to the root. Install and
/// verify commands are only executed when `run_commands` is set; otherwise
/// dependencies are just recorded in the manifest.
pub struct LocalTarget {
    root: PathBuf,
    run_commands: bool,
    manifest_lock: Mutex<()>,
}

impl LocalTarget {
    /// Creates a target rooted at `root` that records dependencies only.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            run_commands: false,
            manifest_lock: Mutex::new(()),
        }
    }

    /// Executes dependency install and verify commands with `sh -c`.
    #[must_use]
    pub const fn with_commands(mut self, run_commands: bool) -> Self {
        self.run_commands = run_commands;
        self
    }

    /// Staging root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path an artifact is staged at.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the path would leave the staging root.
    pub fn staged_path(&self, artifact: &Artifact) -> Result<PathBuf> {
        let relative = artifact.target_path.trim_start_matches('/');
        let relative = if relative.is_empty() || relative.ends_with('/') {
            Path::new(relative).join(&artifact.name)
        } else {
            PathBuf::from(relative)
        };
        if relative.has_root() || has_parent_component(&relative) {
            return Err(DeployError::Validation(vec![ValidationIssue::error(format!(
                "artifact {} target {:?} leaves the staging root",
                artifact.id, artifact.target_path
            ))]));
        }
        Ok(self.root.join(relative))
    }

    fn manifest_path(&self, name: &str) -> PathBuf {
        self.root.join(MANIFEST_DIR).join(name)
    }

    /// Reads the installed-dependency manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest exists but cannot be parsed.
    pub async fn installed_dependencies(&self) -> Result<Vec<InstalledDependency>> {
        match tokio::fs::read(self.manifest_path(DEPENDENCY_MANIFEST)).await {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn run_shell(command: &str) -> Result<()> {
        debug!(command = %command, "running dependency command");
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output()
            .await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(DeployError::target(format!(
                "`{command}` exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[async_trait]
impl DeploymentTarget for LocalTarget {
    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }

    async fn connect(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.root.join(MANIFEST_DIR)).await?;
        let probe = self.root.join(MANIFEST_DIR).join(".probe");
        tokio::fs::write(&probe, b"ok").await?;
        tokio::fs::remove_file(&probe).await?;
        debug!(root = %self.root.display(), "local target ready");
        Ok(())
    }

    async fn transfer(&self, artifact: &Artifact) -> Result<u64> {
        let path = self.staged_path(artifact)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &artifact.content).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = artifact.mode() {
                tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).await?;
            }
        }

        debug!(id = %artifact.id, path = %path.display(), "staged artifact");
        Ok(artifact.content.len() as u64)
    }

    async fn install(&self, dependency: &Dependency) -> Result<()> {
        let install_command = dependency.install_command();
        if self.run_commands {
            let command = install_command.as_deref().ok_or_else(|| DeployError::Dependency {
                name: dependency.name.clone(),
                reason: "no install command".to_string(),
            })?;
            Self::run_shell(command)
                .await
                .map_err(|e| DeployError::Dependency {
                    name: dependency.name.clone(),
                    reason: e.to_string(),
                })?;
            if let Some(verify) = dependency.verify_command() {
                Self::run_shell(&verify)
                    .await
                    .map_err(|e| DeployError::Dependency {
                        name: dependency.name.clone(),
                        reason: format!("verification failed: {e}"),
                    })?;
            }
        }

        let _guard = self.manifest_lock.lock().await;
        let mut installed = self.installed_dependencies().await?;
        installed.retain(|d| d.name != dependency.name);
        installed.push(InstalledDependency {
            name: dependency.name.clone(),
            version: dependency.version.clone(),
            package_manager: dependency.package_manager.to_string(),
            install_command,
        });
        tokio::fs::create_dir_all(self.root.join(MANIFEST_DIR)).await?;
        tokio::fs::write(
            self.manifest_path(DEPENDENCY_MANIFEST),
            serde_json::to_vec_pretty(&installed)?,
        )
        .await?;
        info!(dependency = %dependency.name, "dependency installed");
        Ok(())
    }

    async fn configure_instrumentation(&self, config: &InstrumentationConfig) -> Result<()> {
        let settings: InstrumentationSettings = config.settings();
        tokio::fs::create_dir_all(self.root.join(MANIFEST_DIR)).await?;
        tokio::fs::write(
            self.manifest_path(INSTRUMENTATION_MANIFEST),
            serde_json::to_vec_pretty(&settings)?,
        )
        .await?;
        Ok(())
    }

    async fn verify(&self, artifacts: &[Artifact]) -> Result<()> {
        for artifact in artifacts {
            let path = self.staged_path(artifact)?;
            let content = tokio::fs::read(&path).await.map_err(|e| {
                DeployError::target(format!("{} missing after transfer: {e}", path.display()))
            })?;
            let actual = sha256_hex(&content);
            if actual != artifact.checksum {
                return Err(DeployError::target(format!(
                    "{} checksum {actual} does not match {}",
                    path.display(),
                    artifact.checksum
                )));
            }
        }
        Ok(())
    }

    async fn rollback(&self, artifacts: &[Artifact]) -> Result<()> {
        for artifact in artifacts {
            let path = match self.staged_path(artifact) {
                Ok(path) => path,
                Err(e) => {
                    warn!(id = %artifact.id, error = %e, "rollback skipped");
                    continue;
                }
            };
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "rolled back artifact"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "rollback failed"),
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        debug!(root = %self.root.display(), "local target released");
        Ok(())
    }
}
