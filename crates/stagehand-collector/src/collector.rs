//! Category- and test-scoped storage for artifacts produced by test runs.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use stagehand_artifact::{sha256_hex, ArtifactCategory, ArtifactSource};
use stagehand_constants::storage::{GZIP_EXTENSION, META_EXTENSION};
use stagehand_error::CommonError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::{CollectorError, Result};
use crate::policy::RetentionConfig;
use crate::record::{ArtifactRecord, CleanupStats, CollectionReport, GroupStats, StorageStats};

#[derive(Default)]
struct Index {
    records: HashMap<String, ArtifactRecord>,
    by_test: HashMap<String, BTreeSet<String>>,
}

impl Index {
    fn insert(&mut self, record: ArtifactRecord) {
        self.by_test
            .entry(record.test_id.clone())
            .or_default()
            .insert(record.id.clone());
        self.records.insert(record.id.clone(), record);
    }

    fn remove(&mut self, id: &str) -> Option<ArtifactRecord> {
        let record = self.records.remove(id)?;
        if let Some(ids) = self.by_test.get_mut(&record.test_id) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_test.remove(&record.test_id);
            }
        }
        Some(record)
    }
}

/// Copies test outputs into durable storage and applies retention.
///
/// ```text
/// <root>/<category>/<test_id>/<artifact_id>_<name>[.gz]
/// <root>/<category>/<test_id>/<artifact_id>_<name>[.gz].meta
/// ```
pub struct ArtifactCollector {
    root: PathBuf,
    policies: RetentionConfig,
    clock: Arc<dyn Clock>,
    index: RwLock<Index>,
}

impl ArtifactCollector {
    /// Opens a collector using the system clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage directories cannot be created.
    pub fn open(root: impl Into<PathBuf>, policies: RetentionConfig) -> Result<Self> {
        Self::with_clock(root, policies, Arc::new(SystemClock))
    }

    /// Opens a collector with an explicit clock and reloads existing sidecars.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage directories cannot be created.
    pub fn with_clock(root: impl Into<PathBuf>, policies: RetentionConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let root = root.into();
        for category in ArtifactCategory::ALL {
            fs::create_dir_all(root.join(category.dir_name()))?;
        }
        let collector = Self {
            root,
            policies,
            clock,
            index: RwLock::new(Index::default()),
        };
        let loaded = collector.reload()?;
        info!(root = %collector.root.display(), artifacts = loaded, "opened artifact collector");
        Ok(collector)
    }

    /// Storage root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Active retention policies.
    #[must_use]
    pub const fn policies(&self) -> &RetentionConfig {
        &self.policies
    }

    /// Rebuilds the index from sidecars. Returns the number of records.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage root cannot be read.
    pub fn reload(&self) -> Result<usize> {
        let mut index = Index::default();
        for category in ArtifactCategory::ALL {
            let category_dir = self.root.join(category.dir_name());
            for test_dir in read_dirs(&category_dir)? {
                for meta_path in list_sidecars(&test_dir)? {
                    match read_record(&meta_path) {
                        Ok(record) if record.path.exists() => index.insert(record),
                        Ok(record) => {
                            warn!(id = %record.id, path = %record.path.display(), "sidecar without content, ignoring");
                        }
                        Err(e) => warn!(path = %meta_path.display(), error = %e, "unreadable sidecar, ignoring"),
                    }
                }
            }
        }
        let count = index.records.len();
        *write_lock(&self.index)? = index;
        Ok(count)
    }

    // ========================================================================
    // Collection
    // ========================================================================

    /// Copies every file referenced by `source` into storage.
    ///
    /// Missing or unreadable source files are skipped and reported; the
    /// collection as a whole still succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error only if the index is unusable.
    pub fn collect(&self, source: &dyn ArtifactSource) -> Result<CollectionReport> {
        let test_id = source.test_id();
        let mut report = CollectionReport::default();

        for (category, path) in source.artifact_bundle().iter() {
            match self.collect_file(test_id, category, path) {
                Ok(record) => {
                    debug!(test_id, id = %record.id, category = %category, size = record.size, "collected artifact");
                    write_lock(&self.index)?.insert(record.clone());
                    report.stored.push(record);
                }
                Err(e) => {
                    warn!(test_id, path = %path.display(), error = %e, "skipping artifact");
                    report.skipped.push(path.clone());
                }
            }
        }

        info!(
            test_id,
            stored = report.stored.len(),
            skipped = report.skipped.len(),
            "artifact collection finished"
        );
        Ok(report)
    }

    fn collect_file(&self, test_id: &str, category: ArtifactCategory, source: &Path) -> Result<ArtifactRecord> {
        let content = fs::read(source)?;
        let name = source
            .file_name()
            .map_or_else(|| "artifact".to_string(), |n| n.to_string_lossy().into_owned());
        let id = Uuid::new_v4().to_string();
        let dir = self.root.join(category.dir_name()).join(sanitize(test_id));
        fs::create_dir_all(&dir)?;

        let path = dir.join(format!("{id}_{name}"));
        let now = self.clock.now();
        let record = ArtifactRecord {
            id,
            test_id: test_id.to_string(),
            category,
            name,
            path,
            size: content.len() as u64,
            checksum: sha256_hex(&content),
            created_at: now,
            expires_at: Some(now + self.policies.for_category(category).max_age()),
            compressed: false,
            original_size: None,
            metadata: [("source".to_string(), source.display().to_string())].into(),
        };

        write_atomic(&record.path, &content)?;
        if let Err(e) = write_record(&record) {
            let _ = fs::remove_file(&record.path);
            return Err(e);
        }
        Ok(record)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Records owned by `test_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is unusable.
    pub fn get_artifacts_for_test(&self, test_id: &str) -> Result<Vec<ArtifactRecord>> {
        let index = read_lock(&self.index)?;
        let mut records: Vec<ArtifactRecord> = index
            .by_test
            .get(test_id)
            .into_iter()
            .flatten()
            .filter_map(|id| index.records.get(id).cloned())
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    /// Record for `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is unusable.
    pub fn get_artifact_by_id(&self, id: &str) -> Result<Option<ArtifactRecord>> {
        Ok(read_lock(&self.index)?.records.get(id).cloned())
    }

    /// Content of `id`, decompressed if needed and checksum-verified.
    ///
    /// # Errors
    ///
    /// Returns not-found for unknown ids, an integrity error if the content
    /// does not match its checksum, or an I/O error.
    pub fn retrieve_artifact(&self, id: &str) -> Result<Vec<u8>> {
        let record = self.get_artifact_by_id(id)?.ok_or_else(|| CollectorError::not_found(id))?;
        let stored = fs::read(&record.path)?;
        let content = if record.compressed {
            let mut decoded = Vec::new();
            GzDecoder::new(stored.as_slice()).read_to_end(&mut decoded)?;
            decoded
        } else {
            stored
        };

        let actual = sha256_hex(&content);
        if actual != record.checksum {
            return Err(CommonError::integrity(format!(
                "collected artifact {id}: expected {}, got {actual}",
                record.checksum
            ))
            .into());
        }
        Ok(content)
    }

    /// Aggregate usage at the current clock time.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is unusable.
    pub fn get_storage_stats(&self) -> Result<StorageStats> {
        let now = self.clock.now();
        let index = read_lock(&self.index)?;
        let mut stats = StorageStats::default();
        for record in index.records.values() {
            stats.total.add(record.size);
            stats.by_category.entry(record.category).or_default().add(record.size);
            stats
                .by_test
                .entry(record.test_id.clone())
                .or_insert_with(GroupStats::default)
                .add(record.size);
            if record.compressed {
                stats.compressed += 1;
            }
            if record.is_expired(now) {
                stats.expired_pending += 1;
            }
        }
        Ok(stats)
    }

    // ========================================================================
    // Retention
    // ========================================================================

    /// Deletes expired artifacts, compresses aged ones and enforces count and
    /// size limits, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is unusable. Per-artifact file errors
    /// are logged and skipped.
    pub fn cleanup_expired(&self) -> Result<CleanupStats> {
        let now = self.clock.now();
        let mut stats = CleanupStats::default();

        let expired: Vec<String> = read_lock(&self.index)?
            .records
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| r.id.clone())
            .collect();
        for id in expired {
            if let Some(freed) = self.delete(&id)? {
                stats.expired += 1;
                stats.bytes_freed += freed;
            }
        }

        let due: Vec<ArtifactRecord> = read_lock(&self.index)?
            .records
            .values()
            .filter(|r| {
                !r.compressed
                    && self
                        .policies
                        .for_category(r.category)
                        .compress_age()
                        .is_some_and(|age| now - r.created_at >= age)
            })
            .cloned()
            .collect();
        for record in due {
            match compress(&record) {
                Ok(compressed) => {
                    stats.compressed += 1;
                    stats.bytes_freed += record.size.saturating_sub(compressed.size);
                    debug!(id = %record.id, from = record.size, to = compressed.size, "compressed artifact");
                    write_lock(&self.index)?.insert(compressed);
                }
                Err(e) => {
                    warn!(id = %record.id, error = %e, "compression failed, keeping original");
                    stats.compression_failures += 1;
                }
            }
        }

        for category in ArtifactCategory::ALL {
            let policy = self.policies.for_category(category);
            if policy.max_count.is_none() && policy.max_size_bytes.is_none() {
                continue;
            }
            let mut records: Vec<(chrono::DateTime<chrono::Utc>, String, u64)> = read_lock(&self.index)?
                .records
                .values()
                .filter(|r| r.category == category)
                .map(|r| (r.created_at, r.id.clone(), r.size))
                .collect();
            records.sort();

            let mut count = records.len();
            let mut bytes: u64 = records.iter().map(|(_, _, size)| size).sum();
            for (_, id, size) in records {
                let over_count = policy.max_count.is_some_and(|max| count > max);
                let over_size = policy.max_size_bytes.is_some_and(|max| bytes > max);
                if !over_count && !over_size {
                    break;
                }
                if let Some(freed) = self.delete(&id)? {
                    stats.evicted += 1;
                    stats.bytes_freed += freed;
                }
                count -= 1;
                bytes = bytes.saturating_sub(size);
            }
        }

        if stats != CleanupStats::default() {
            info!(
                expired = stats.expired,
                compressed = stats.compressed,
                evicted = stats.evicted,
                bytes_freed = stats.bytes_freed,
                "retention sweep finished"
            );
        }
        Ok(stats)
    }

    /// Removes every artifact owned by `test_id`. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is unusable.
    pub fn remove_artifacts_for_test(&self, test_id: &str) -> Result<usize> {
        let ids: Vec<String> = read_lock(&self.index)?
            .by_test
            .get(test_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        let mut removed = 0;
        for id in ids {
            if self.delete(&id)?.is_some() {
                removed += 1;
            }
        }
        for category in ArtifactCategory::ALL {
            let dir = self.root.join(category.dir_name()).join(sanitize(test_id));
            let _ = fs::remove_dir(dir);
        }
        info!(test_id, removed, "removed test artifacts");
        Ok(removed)
    }

    /// Deletes one artifact's files and index entry. Returns the bytes freed.
    fn delete(&self, id: &str) -> Result<Option<u64>> {
        let Some(record) = write_lock(&self.index)?.remove(id) else {
            return Ok(None);
        };
        if let Err(e) = remove_if_exists(&record.path).and_then(|()| remove_if_exists(&meta_path_for(&record.path)))
        {
            warn!(id, error = %e, "failed to delete artifact files");
        }
        debug!(id, test_id = %record.test_id, "deleted artifact");
        Ok(Some(record.size))
    }
}

// ============================================================================
// Files
// ============================================================================

/// Writes `<path>.gz` and its sidecar, then removes the original.
fn compress(record: &ArtifactRecord) -> Result<ArtifactRecord> {
    let content = fs::read(&record.path)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&content)?;
    let encoded = encoder.finish()?;

    let mut name = record.path.as_os_str().to_owned();
    name.push(".");
    name.push(GZIP_EXTENSION);
    let path = PathBuf::from(name);

    let compressed = ArtifactRecord {
        path,
        size: encoded.len() as u64,
        compressed: true,
        original_size: Some(record.size),
        ..record.clone()
    };
    write_atomic(&compressed.path, &encoded)?;
    if let Err(e) = write_record(&compressed) {
        let _ = fs::remove_file(&compressed.path);
        return Err(e);
    }

    if let Err(e) = remove_if_exists(&record.path).and_then(|()| remove_if_exists(&meta_path_for(&record.path))) {
        warn!(id = %record.id, error = %e, "failed to remove uncompressed copy");
    }
    Ok(compressed)
}

fn sanitize(test_id: &str) -> String {
    let name: String = test_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    if name.chars().all(|c| c == '.') {
        format!("_{name}")
    } else {
        name
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| CollectorError::poisoned())
}

fn write_lock<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| CollectorError::poisoned())
}

fn meta_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(META_EXTENSION);
    PathBuf::from(name)
}

fn read_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    Ok(fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect())
}

fn list_sidecars(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == META_EXTENSION))
        .collect();
    paths.sort();
    Ok(paths)
}

fn read_record(meta_path: &Path) -> Result<ArtifactRecord> {
    Ok(serde_json::from_slice(&fs::read(meta_path)?)?)
}

fn write_record(record: &ArtifactRecord) -> Result<()> {
    write_atomic(&meta_path_for(&record.path), &serde_json::to_vec_pretty(record)?)
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let temp_name = format!(
        "{}.tmp.{}",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id()
    );
    let temp_path = path.with_file_name(temp_name);
    let mut file = fs::File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("a1-b_2.c"), "a1-b_2.c");
        assert_eq!(sanitize("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize(".."), "_..");
    }

    #[test]
    fn test_index_remove_drops_empty_test() {
        let mut index = Index::default();
        let record = ArtifactRecord {
            id: "a".into(),
            test_id: "t".into(),
            category: ArtifactCategory::Log,
            name: "x.log".into(),
            path: "/nope".into(),
            size: 1,
            checksum: String::new(),
            created_at: chrono::Utc::now(),
            expires_at: None,
            compressed: false,
            original_size: None,
            metadata: std::collections::BTreeMap::new(),
        };
        index.insert(record);
        assert!(index.remove("a").is_some());
        assert!(index.by_test.is_empty());
        assert!(index.remove("a").is_none());
    }
}
