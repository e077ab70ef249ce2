//! Package-manager dependencies declared by a deployment plan.

use serde::{Deserialize, Serialize};

/// Package manager that installs a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    /// Debian/Ubuntu `apt-get`.
    #[default]
    Apt,
    /// Fedora/RHEL `dnf`.
    Dnf,
    /// Python `pip`.
    Pip,
    /// Node `npm`.
    Npm,
    /// Rust `cargo install`.
    Cargo,
    /// Caller-supplied commands only.
    Custom,
}

impl PackageManager {
    /// Returns the manager name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Apt => "apt",
            Self::Dnf => "dnf",
            Self::Pip => "pip",
            Self::Npm => "npm",
            Self::Cargo => "cargo",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for PackageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dependency to install on the target before artifacts are deployed.
///
/// Created when a plan is built and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Package name.
    pub name: String,
    /// Exact version or constraint (`1.2.3`, `>=2.0`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Manager that installs it.
    #[serde(default)]
    pub package_manager: PackageManager,
    /// Explicit install command; derived from the manager when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_command: Option<String>,
    /// Explicit verification command; derived from the manager when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_command: Option<String>,
    /// Optional dependencies may fail to install without failing the step.
    #[serde(default)]
    pub optional: bool,
}

impl Dependency {
    /// Creates a required dependency without a version.
    #[must_use]
    pub fn new(name: impl Into<String>, package_manager: PackageManager) -> Self {
        Self {
            name: name.into(),
            version: None,
            package_manager,
            install_command: None,
            verify_command: None,
            optional: false,
        }
    }

    /// Sets the version or constraint.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Sets explicit install and verify commands.
    #[must_use]
    pub fn with_commands(mut self, install: impl Into<String>, verify: impl Into<String>) -> Self {
        self.install_command = Some(install.into());
        self.verify_command = Some(verify.into());
        self
    }

    /// Marks the dependency optional.
    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Returns the command that installs this dependency.
    ///
    /// `None` only for custom dependencies without an explicit command.
    #[must_use]
    pub fn install_command(&self) -> Option<String> {
        if let Some(cmd) = &self.install_command {
            return Some(cmd.clone());
        }
        let name = &self.name;
        let version = self.version.as_deref();
        let cmd = match self.package_manager {
            PackageManager::Apt => match version {
                Some(v) => format!("apt-get install -y {name}={v}"),
                None => format!("apt-get install -y {name}"),
            },
            PackageManager::Dnf => match version {
                Some(v) => format!("dnf install -y {name}-{v}"),
                None => format!("dnf install -y {name}"),
            },
            PackageManager::Pip => match version {
                Some(v) if v.starts_with(['<', '>', '=', '~', '!']) => {
                    format!("pip install '{name}{v}'")
                }
                Some(v) => format!("pip install {name}=={v}"),
                None => format!("pip install {name}"),
            },
            PackageManager::Npm => match version {
                Some(v) => format!("npm install -g {name}@{v}"),
                None => format!("npm install -g {name}"),
            },
            PackageManager::Cargo => match version {
                Some(v) => format!("cargo install {name} --version {v}"),
                None => format!("cargo install {name}"),
            },
            PackageManager::Custom => return None,
        };
        Some(cmd)
    }

    /// Returns the command that verifies this dependency is installed.
    #[must_use]
    pub fn verify_command(&self) -> Option<String> {
        if let Some(cmd) = &self.verify_command {
            return Some(cmd.clone());
        }
        let name = &self.name;
        let cmd = match self.package_manager {
            PackageManager::Apt => format!("dpkg -s {name}"),
            PackageManager::Dnf => format!("rpm -q {name}"),
            PackageManager::Pip => format!("pip show {name}"),
            PackageManager::Npm => format!("npm ls -g {name}"),
            PackageManager::Cargo => format!("cargo install --list | grep -q '^{name} '"),
            PackageManager::Custom => return None,
        };
        Some(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_install_commands() {
        let apt = Dependency::new("curl", PackageManager::Apt).with_version("7.88");
        assert_eq!(apt.install_command().unwrap(), "apt-get install -y curl=7.88");
        assert_eq!(apt.verify_command().unwrap(), "dpkg -s curl");

        let pip = Dependency::new("pytest", PackageManager::Pip).with_version(">=7.0");
        assert_eq!(pip.install_command().unwrap(), "pip install 'pytest>=7.0'");

        let pinned = Dependency::new("pytest", PackageManager::Pip).with_version("7.4.0");
        assert_eq!(pinned.install_command().unwrap(), "pip install pytest==7.4.0");

        let npm = Dependency::new("tap", PackageManager::Npm);
        assert_eq!(npm.install_command().unwrap(), "npm install -g tap");
    }

    #[test]
    fn test_custom_requires_explicit_commands() {
        let custom = Dependency::new("firmware", PackageManager::Custom);
        assert!(custom.install_command().is_none());

        let custom = custom.with_commands("./install-fw.sh", "test -f /lib/firmware/fw.bin");
        assert_eq!(custom.install_command().unwrap(), "./install-fw.sh");
        assert_eq!(custom.verify_command().unwrap(), "test -f /lib/firmware/fw.bin");
    }

    #[test]
    fn test_serde_defaults() {
        let dep: Dependency = serde_json::from_str(r#"{"name": "jq"}"#).unwrap();
        assert_eq!(dep.package_manager, PackageManager::Apt);
        assert!(!dep.optional);
        assert!(dep.version.is_none());
    }
}
