//! Metadata records for collected artifacts.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stagehand_artifact::ArtifactCategory;

/// A collected artifact. Serialized as the `.meta` sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Artifact id.
    pub id: String,
    /// Owning test.
    pub test_id: String,
    /// Category.
    pub category: ArtifactCategory,
    /// Original file name.
    pub name: String,
    /// Stored file.
    pub path: PathBuf,
    /// Stored size in bytes.
    pub size: u64,
    /// SHA-256 of the original, uncompressed content.
    pub checksum: String,
    /// Collection time.
    pub created_at: DateTime<Utc>,
    /// Deletion deadline.
    pub expires_at: Option<DateTime<Utc>>,
    /// True if the stored file is gzip-compressed.
    #[serde(default)]
    pub compressed: bool,
    /// Size before compression.
    #[serde(default)]
    pub original_size: Option<u64>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ArtifactRecord {
    /// Returns true if the record has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Size of the content once decompressed.
    #[must_use]
    pub fn content_size(&self) -> u64 {
        self.original_size.unwrap_or(self.size)
    }
}

/// Outcome of one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionReport {
    /// Stored artifacts.
    pub stored: Vec<ArtifactRecord>,
    /// Source files that could not be collected.
    pub skipped: Vec<PathBuf>,
}

impl CollectionReport {
    /// Stored paths grouped by category.
    #[must_use]
    pub fn bundle(&self) -> stagehand_artifact::ArtifactBundle {
        let mut bundle = stagehand_artifact::ArtifactBundle::default();
        for record in &self.stored {
            bundle.push(record.category, record.path.clone());
        }
        bundle
    }

    /// Returns true if every referenced file was collected.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Outcome of a retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupStats {
    /// Artifacts deleted because they expired.
    pub expired: usize,
    /// Artifacts compressed.
    pub compressed: usize,
    /// Artifacts evicted by count or size limits.
    pub evicted: usize,
    /// Compressions that failed; those artifacts stay uncompressed.
    pub compression_failures: usize,
    /// Bytes released.
    pub bytes_freed: u64,
}

impl CleanupStats {
    /// Artifacts removed for any reason.
    #[must_use]
    pub const fn removed(&self) -> usize {
        self.expired + self.evicted
    }
}

/// Count and size of a group of artifacts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStats {
    /// Artifacts.
    pub count: usize,
    /// Stored bytes.
    pub bytes: u64,
}

impl GroupStats {
    pub(crate) fn add(&mut self, bytes: u64) {
        self.count += 1;
        self.bytes += bytes;
    }
}

/// Aggregate storage usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    /// All artifacts.
    pub total: GroupStats,
    /// Per category.
    pub by_category: BTreeMap<ArtifactCategory, GroupStats>,
    /// Per owning test.
    pub by_test: BTreeMap<String, GroupStats>,
    /// Compressed artifacts.
    pub compressed: usize,
    /// Expired artifacts not yet swept.
    pub expired_pending: usize,
}
