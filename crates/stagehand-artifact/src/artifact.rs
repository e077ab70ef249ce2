//! Artifact model.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stagehand_constants::storage::META_EXTENSION;
use uuid::Uuid;

use crate::checksum::{is_sha256_hex, sha256_hex};
use crate::permissions::{self, EXECUTABLE_DEFAULT, REGULAR_DEFAULT};

/// Kind of deployable file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    /// Shell or interpreter script.
    Script,
    /// Compiled executable.
    Binary,
    /// Configuration file.
    Config,
    /// Test data.
    Data,
    /// Shared library.
    Library,
    /// Documentation.
    #[serde(rename = "doc")]
    Documentation,
}

impl ArtifactType {
    /// All artifact types, in storage order.
    pub const ALL: [Self; 6] = [
        Self::Script,
        Self::Binary,
        Self::Config,
        Self::Data,
        Self::Library,
        Self::Documentation,
    ];

    /// Returns the type name, also used as the storage directory name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Binary => "binary",
            Self::Config => "config",
            Self::Data => "data",
            Self::Library => "library",
            Self::Documentation => "doc",
        }
    }

    /// Returns true for types installed with execute permission by default.
    #[must_use]
    pub const fn is_executable(&self) -> bool {
        matches!(self, Self::Script | Self::Binary | Self::Library)
    }

    /// Returns the default permission string for this type.
    #[must_use]
    pub const fn default_permissions(&self) -> &'static str {
        if self.is_executable() {
            EXECUTABLE_DEFAULT
        } else {
            REGULAR_DEFAULT
        }
    }
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deployable file plus its integrity and placement metadata.
///
/// The checksum always describes `content`; constructors compute it and
/// [`Artifact::verify_checksum`] re-derives it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Unique identifier.
    pub id: String,
    /// Human-readable file name.
    pub name: String,
    /// Artifact kind.
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    /// Raw content.
    #[serde(with = "content_base64")]
    pub content: Vec<u8>,
    /// SHA-256 hex digest of `content`.
    pub checksum: String,
    /// Octal (`0755`) or symbolic (`rwxr-xr-x`) permissions.
    pub permissions: String,
    /// Install path on the target.
    pub target_path: String,
    /// Ids of artifacts that must be deployed first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Size of `content` in bytes.
    pub size: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Creates an artifact with a fresh id and type-default permissions.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        artifact_type: ArtifactType,
        content: impl Into<Vec<u8>>,
        target_path: impl Into<String>,
    ) -> Self {
        let content = content.into();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            artifact_type,
            checksum: sha256_hex(&content),
            size: content.len() as u64,
            content,
            permissions: artifact_type.default_permissions().to_string(),
            target_path: target_path.into(),
            dependencies: Vec::new(),
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Overrides the generated id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Overrides the default permissions.
    #[must_use]
    pub fn with_permissions(mut self, permissions: impl Into<String>) -> Self {
        self.permissions = permissions.into();
        self
    }

    /// Declares artifacts this one depends on.
    #[must_use]
    pub fn with_dependencies<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns true if the recorded checksum matches the content.
    #[must_use]
    pub fn verify_checksum(&self) -> bool {
        sha256_hex(&self.content) == self.checksum
    }

    /// Returns the numeric permission mode, if the string is valid.
    #[must_use]
    pub fn mode(&self) -> Option<u32> {
        permissions::mode_of(&self.permissions)
    }

    /// Returns every validation problem with this artifact.
    ///
    /// An empty list means the artifact is valid.
    #[must_use]
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.id.trim().is_empty() {
            errors.push("id is empty".to_string());
        }
        if self.name.trim().is_empty() {
            errors.push("name is empty".to_string());
        }
        if self.target_path.trim().is_empty() {
            errors.push("target path is empty".to_string());
        }
        errors.extend(self.path_errors());
        if !permissions::is_valid(&self.permissions) {
            errors.push(format!("invalid permissions {:?}", self.permissions));
        }
        if !is_sha256_hex(&self.checksum) {
            errors.push(format!("malformed checksum {:?}", self.checksum));
        } else if !self.verify_checksum() {
            errors.push("checksum does not match content".to_string());
        }
        if self.size != self.content.len() as u64 {
            errors.push(format!(
                "size {} does not match content length {}",
                self.size,
                self.content.len()
            ));
        }
        if self.dependencies.iter().any(|d| d == &self.id) {
            errors.push("artifact depends on itself".to_string());
        }
        errors
    }

    /// Returns problems with `name` and `target_path` that would place the
    /// artifact outside its storage or staging directory.
    ///
    /// The name must be a single path component and must not end in the
    /// metadata sidecar extension. The target path must not contain `..`.
    #[must_use]
    pub fn path_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !self.name.trim().is_empty() && !is_plain_file_name(&self.name) {
            errors.push(format!("name {:?} is not a plain file name", self.name));
        }
        if self
            .name
            .strip_suffix(META_EXTENSION)
            .is_some_and(|stem| stem.ends_with('.'))
        {
            errors.push(format!("name {:?} ends in .{META_EXTENSION}", self.name));
        }
        if has_parent_component(&self.target_path) {
            errors.push(format!("target path {:?} contains '..'", self.target_path));
        }
        errors
    }

    /// Returns true if the artifact passes every validation check.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validation_errors().is_empty()
    }

    /// Returns the file name used for on-disk and packaged storage.
    #[must_use]
    pub fn storage_name(&self) -> String {
        format!("{}_{}", self.id, self.name)
    }

    /// Splits off the metadata record (everything except content).
    #[must_use]
    pub fn meta(&self) -> ArtifactMeta {
        ArtifactMeta {
            id: self.id.clone(),
            name: self.name.clone(),
            artifact_type: self.artifact_type,
            checksum: self.checksum.clone(),
            permissions: self.permissions.clone(),
            target_path: self.target_path.clone(),
            dependencies: self.dependencies.clone(),
            metadata: self.metadata.clone(),
            size: self.size,
            created_at: self.created_at,
        }
    }

    /// Rebuilds an artifact from its metadata record and content.
    ///
    /// The checksum is taken from `meta`; callers verify it.
    #[must_use]
    pub fn from_parts(meta: ArtifactMeta, content: Vec<u8>) -> Self {
        Self {
            id: meta.id,
            name: meta.name,
            artifact_type: meta.artifact_type,
            size: content.len() as u64,
            content,
            checksum: meta.checksum,
            permissions: meta.permissions,
            target_path: meta.target_path,
            dependencies: meta.dependencies,
            metadata: meta.metadata,
            created_at: meta.created_at,
        }
    }
}

/// Sidecar record: an artifact without its content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    /// Unique identifier.
    pub id: String,
    /// File name.
    pub name: String,
    /// Artifact kind.
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    /// SHA-256 hex digest of the content.
    pub checksum: String,
    /// Permission string.
    pub permissions: String,
    /// Install path on the target.
    pub target_path: String,
    /// Dependency ids.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Content size in bytes.
    pub size: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

mod content_base64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(content: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(content))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.contains(['/', '\\', '\0']) && name != "." && name != ".."
}

/// Returns true if `path` contains a `..` component.
#[must_use]
pub fn has_parent_component(path: impl AsRef<Path>) -> bool {
    path.as_ref()
        .components()
        .any(|component| component == Component::ParentDir)
}
