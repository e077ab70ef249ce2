//! Durable artifact repository.
//!
//! Content and metadata are written side by side; an in-memory cache and a
//! reverse dependency index sit in front of the files. Every load from disk
//! re-derives the checksum.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use stagehand_constants::storage::META_EXTENSION;
use tracing::{debug, info, warn};

use crate::artifact::{Artifact, ArtifactMeta, ArtifactType};
use crate::checksum::sha256_hex;
use crate::error::{ArtifactError, Result};
use crate::package;

/// Checksummed artifact store with dependency resolution.
pub struct ArtifactRepository {
    /// Storage root.
    root: PathBuf,
    /// Loaded artifacts keyed by id.
    cache: RwLock<HashMap<String, Artifact>>,
    /// Metadata sidecar location keyed by artifact id.
    index: RwLock<HashMap<String, PathBuf>>,
    /// Reverse dependency edges: dependency id -> dependents.
    dependents: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl ArtifactRepository {
    /// Opens (or creates) a repository rooted at `root`.
    ///
    /// Existing sidecars are indexed; content is loaded lazily.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for artifact_type in ArtifactType::ALL {
            fs::create_dir_all(root.join(artifact_type.as_str()))?;
        }

        let repo = Self {
            root,
            cache: RwLock::new(HashMap::new()),
            index: RwLock::new(HashMap::new()),
            dependents: RwLock::new(HashMap::new()),
        };
        let indexed = repo.reindex()?;
        info!(root = %repo.root.display(), artifacts = indexed, "opened artifact repository");
        Ok(repo)
    }

    /// Returns the storage root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stores an artifact.
    ///
    /// Returns `Ok(true)` if the artifact was written and `Ok(false)` if an
    /// identical artifact (same id and checksum) is already stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact is invalid, its checksum does not
    /// match its content, another artifact with the same id but different
    /// content exists, or the files cannot be written.
    pub fn store(&self, artifact: &Artifact) -> Result<bool> {
        let actual = sha256_hex(&artifact.content);
        if actual != artifact.checksum {
            return Err(ArtifactError::ChecksumMismatch {
                id: artifact.id.clone(),
                expected: artifact.checksum.clone(),
                actual,
            });
        }
        let errors = artifact.validation_errors();
        if !errors.is_empty() {
            return Err(ArtifactError::Invalid {
                id: artifact.id.clone(),
                reason: errors.join("; "),
            });
        }

        if let Some(existing) = self.get(&artifact.id)? {
            if existing.checksum == artifact.checksum {
                debug!(id = %artifact.id, "artifact already stored");
                return Ok(false);
            }
            return Err(stagehand_error::CommonError::already_exists(format!(
                "artifact {} with different content",
                artifact.id
            ))
            .into());
        }

        let dir = self.type_dir(artifact.artifact_type);
        let content_path = dir.join(artifact.storage_name());
        let meta_path = meta_path_for(&content_path);

        write_atomic(&content_path, &artifact.content)?;
        write_atomic(&meta_path, &serde_json::to_vec_pretty(&artifact.meta())?)?;

        write_lock(&self.index)?
            .insert(artifact.id.clone(), meta_path);
        self.link_dependencies(&artifact.id, &artifact.dependencies)?;
        write_lock(&self.cache)?
            .insert(artifact.id.clone(), artifact.clone());

        info!(
            id = %artifact.id,
            name = %artifact.name,
            artifact_type = %artifact.artifact_type,
            size = artifact.size,
            "stored artifact"
        );
        Ok(true)
    }

    /// Gets an artifact by id.
    ///
    /// Falls back to durable storage on a cache miss, rescanning the
    /// sidecars if the id is not indexed.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::ChecksumMismatch`] if the stored content no
    /// longer matches its checksum, or an I/O/JSON error on unreadable files.
    pub fn get(&self, id: &str) -> Result<Option<Artifact>> {
        if let Some(artifact) = read_lock(&self.cache)?.get(id) {
            return Ok(Some(artifact.clone()));
        }

        let mut meta_path = read_lock(&self.index)?.get(id).cloned();
        if meta_path.is_none() {
            self.reindex()?;
            meta_path = read_lock(&self.index)?.get(id).cloned();
        }
        let Some(meta_path) = meta_path else {
            return Ok(None);
        };

        let artifact = load_from_disk(&meta_path)?;
        write_lock(&self.cache)?
            .insert(artifact.id.clone(), artifact.clone());
        Ok(Some(artifact))
    }

    /// Returns every stored artifact of one type.
    ///
    /// Artifacts that fail to load (corrupt content, unreadable sidecar)
    /// are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the type directory cannot be listed.
    pub fn get_by_type(&self, artifact_type: ArtifactType) -> Result<Vec<Artifact>> {
        let mut artifacts = Vec::new();
        for meta_path in list_sidecars(&self.type_dir(artifact_type))? {
            match read_meta(&meta_path) {
                Ok(meta) => match self.get(&meta.id) {
                    Ok(Some(artifact)) => artifacts.push(artifact),
                    Ok(None) => {}
                    Err(e) => warn!(id = %meta.id, error = %e, "skipping unreadable artifact"),
                },
                Err(e) => warn!(path = %meta_path.display(), error = %e, "skipping bad sidecar"),
            }
        }
        artifacts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(artifacts)
    }

    /// Returns the ids of every indexed artifact.
    ///
    /// # Errors
    ///
    /// Returns an error if the index lock is poisoned.
    pub fn list_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = read_lock(&self.index)?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    /// Returns the ids of artifacts that declare `id` as a dependency.
    ///
    /// # Errors
    ///
    /// Returns an error if the dependency index lock is poisoned.
    pub fn dependents(&self, id: &str) -> Result<Vec<String>> {
        Ok(read_lock(&self.dependents)?
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Re-derives the checksum of an artifact's stored bytes.
    ///
    /// Reads the content from disk, bypassing the cache, so out-of-band
    /// modification is detected. Returns `Ok(false)` on mismatch.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact is unknown or its files are unreadable.
    pub fn verify_stored(&self, id: &str) -> Result<bool> {
        let meta_path = read_lock(&self.index)?
            .get(id)
            .cloned()
            .ok_or_else(|| ArtifactError::not_found(id))?;
        let meta = read_meta(&meta_path)?;
        let content = fs::read(content_path_for(&meta_path))?;
        Ok(sha256_hex(&content) == meta.checksum)
    }

    /// Validates an artifact: checksum, required fields, permission format.
    #[must_use]
    pub fn validate(&self, artifact: &Artifact) -> bool {
        let errors = artifact.validation_errors();
        if !errors.is_empty() {
            debug!(id = %artifact.id, errors = ?errors, "artifact failed validation");
        }
        errors.is_empty()
    }

    /// Removes an artifact and its sidecar.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact is unknown or the files cannot be removed.
    pub fn remove(&self, id: &str) -> Result<()> {
        let meta_path = write_lock(&self.index)?
            .remove(id)
            .ok_or_else(|| ArtifactError::not_found(id))?;
        let content_path = content_path_for(&meta_path);
        write_lock(&self.cache)?.remove(id);
        if let Ok(meta) = read_meta(&meta_path) {
            let mut dependents = write_lock(&self.dependents)?;
            for dep in &meta.dependencies {
                if let Some(set) = dependents.get_mut(dep) {
                    set.remove(id);
                }
            }
        }
        remove_if_exists(&content_path)?;
        remove_if_exists(&meta_path)?;
        debug!(id = %id, "removed artifact");
        Ok(())
    }

    /// Resolves the transitive dependencies of `ids`.
    ///
    /// Returns every reachable artifact id exactly once, each dependency
    /// before all of its dependents.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown ids and
    /// [`ArtifactError::DependencyCycle`] if the graph is cyclic.
    pub fn resolve_dependencies(&self, ids: &[String]) -> Result<Vec<String>> {
        let mut order = Vec::new();
        let mut done = HashSet::new();
        let mut path = Vec::new();
        for id in ids {
            self.visit(id, &mut path, &mut done, &mut order)?;
        }
        Ok(order)
    }

    fn visit(
        &self,
        id: &str,
        path: &mut Vec<String>,
        done: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        if done.contains(id) {
            return Ok(());
        }
        if let Some(start) = path.iter().position(|p| p == id) {
            let mut cycle = path[start..].to_vec();
            cycle.push(id.to_string());
            return Err(ArtifactError::DependencyCycle(cycle.join(" -> ")));
        }
        let artifact = self.get(id)?.ok_or_else(|| ArtifactError::not_found(id))?;

        path.push(id.to_string());
        for dep in &artifact.dependencies {
            self.visit(dep, path, done, order)?;
        }
        path.pop();

        done.insert(id.to_string());
        order.push(id.to_string());
        Ok(())
    }

    /// Builds a deployment package for `ids` and their dependencies.
    ///
    /// Returns `Ok(None)` if any id cannot be resolved, so a partial
    /// package is never produced.
    ///
    /// # Errors
    ///
    /// Returns an error if stored content is corrupt or the archive cannot
    /// be written.
    pub fn create_package(&self, ids: &[String]) -> Result<Option<Vec<u8>>> {
        let order = match self.resolve_dependencies(ids) {
            Ok(order) => order,
            Err(e) if e.is_not_found() || matches!(e, ArtifactError::DependencyCycle(_)) => {
                warn!(error = %e, "cannot package unresolvable artifacts");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let mut artifacts = Vec::with_capacity(order.len());
        for id in &order {
            match self.get(id)? {
                Some(artifact) => artifacts.push(artifact),
                None => return Ok(None),
            }
        }

        let bytes = package::build_package(&artifacts)?;
        info!(artifacts = artifacts.len(), bytes = bytes.len(), "created package");
        Ok(Some(bytes))
    }

    /// Rebuilds the sidecar index and dependency edges from disk.
    fn reindex(&self) -> Result<usize> {
        let mut index = HashMap::new();
        let mut dependents: HashMap<String, BTreeSet<String>> = HashMap::new();
        for artifact_type in ArtifactType::ALL {
            for meta_path in list_sidecars(&self.type_dir(artifact_type))? {
                match read_meta(&meta_path) {
                    Ok(meta) => {
                        for dep in &meta.dependencies {
                            dependents
                                .entry(dep.clone())
                                .or_default()
                                .insert(meta.id.clone());
                        }
                        index.insert(meta.id, meta_path);
                    }
                    Err(e) => warn!(path = %meta_path.display(), error = %e, "skipping bad sidecar"),
                }
            }
        }
        let count = index.len();
        *write_lock(&self.index)? = index;
        *write_lock(&self.dependents)? = dependents;
        Ok(count)
    }

    fn link_dependencies(&self, id: &str, dependencies: &[String]) -> Result<()> {
        let mut dependents = write_lock(&self.dependents)?;
        for dep in dependencies {
            dependents
                .entry(dep.clone())
                .or_default()
                .insert(id.to_string());
        }
        Ok(())
    }

    fn type_dir(&self, artifact_type: ArtifactType) -> PathBuf {
        self.root.join(artifact_type.as_str())
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| ArtifactError::storage("artifact repository lock poisoned"))
}

fn write_lock<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| ArtifactError::storage("artifact repository lock poisoned"))
}

fn meta_path_for(content_path: &Path) -> PathBuf {
    let mut name = content_path.as_os_str().to_owned();
    name.push(".");
    name.push(META_EXTENSION);
    PathBuf::from(name)
}

fn content_path_for(meta_path: &Path) -> PathBuf {
    meta_path.with_extension("")
}

fn list_sidecars(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == META_EXTENSION))
        .collect();
    paths.sort();
    Ok(paths)
}

fn read_meta(meta_path: &Path) -> Result<ArtifactMeta> {
    let data = fs::read(meta_path)?;
    Ok(serde_json::from_slice(&data)?)
}

fn load_from_disk(meta_path: &Path) -> Result<Artifact> {
    let meta = read_meta(meta_path)?;
    let content = fs::read(content_path_for(meta_path))?;
    let actual = sha256_hex(&content);
    if actual != meta.checksum {
        return Err(ArtifactError::ChecksumMismatch {
            id: meta.id,
            expected: meta.checksum,
            actual,
        });
    }
    Ok(Artifact::from_parts(meta, content))
}

/// Writes to a temp file and renames it into place.
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

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn script(id: &str, deps: &[&str]) -> Artifact {
        Artifact::new(format!("{id}.sh"), ArtifactType::Script, format!("echo {id}"), format!("/opt/{id}.sh"))
            .with_id(id)
            .with_dependencies(deps.iter().copied())
    }

    #[test]
    fn test_store_and_get() {
        let dir = tempdir().unwrap();
        let repo = ArtifactRepository::open(dir.path()).unwrap();

        let artifact = script("a", &[]);
        assert!(repo.store(&artifact).unwrap());
        // Idempotent for identical content.
        assert!(!repo.store(&artifact).unwrap());

        let loaded = repo.get("a").unwrap().unwrap();
        assert_eq!(loaded, artifact);
        assert!(dir.path().join("script").join("a_a.sh").exists());
        assert!(dir.path().join("script").join("a_a.sh.meta").exists());
    }

    #[test]
    fn test_duplicate_id_with_different_content_rejected() {
        let dir = tempdir().unwrap();
        let repo = ArtifactRepository::open(dir.path()).unwrap();
        repo.store(&script("a", &[])).unwrap();

        let other = Artifact::new("a.sh", ArtifactType::Script, "echo changed", "/opt/a.sh").with_id("a");
        let err = repo.store(&other).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_store_rejects_bad_checksum() {
        let dir = tempdir().unwrap();
        let repo = ArtifactRepository::open(dir.path()).unwrap();
        let mut artifact = script("a", &[]);
        artifact.checksum = "0".repeat(64);
        assert!(matches!(
            repo.store(&artifact),
            Err(ArtifactError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_get_by_type_and_dependents() {
        let dir = tempdir().unwrap();
        let repo = ArtifactRepository::open(dir.path()).unwrap();
        repo.store(&script("a", &[])).unwrap();
        repo.store(&script("b", &["a"])).unwrap();
        let config = Artifact::new("c.toml", ArtifactType::Config, "x=1", "/etc/c.toml").with_id("c");
        repo.store(&config).unwrap();

        assert_eq!(repo.get_by_type(ArtifactType::Script).unwrap().len(), 2);
        assert_eq!(repo.get_by_type(ArtifactType::Config).unwrap().len(), 1);
        assert!(repo.get_by_type(ArtifactType::Binary).unwrap().is_empty());
        assert_eq!(repo.dependents("a").unwrap(), vec!["b".to_string()]);
    }

    #[test]
    fn test_resolve_diamond() {
        let dir = tempdir().unwrap();
        let repo = ArtifactRepository::open(dir.path()).unwrap();
        repo.store(&script("base", &[])).unwrap();
        repo.store(&script("left", &["base"])).unwrap();
        repo.store(&script("right", &["base"])).unwrap();
        repo.store(&script("top", &["left", "right"])).unwrap();

        let order = repo.resolve_dependencies(&["top".to_string()]).unwrap();
        assert_eq!(order, vec!["base", "left", "right", "top"]);
    }

    #[test]
    fn test_resolve_cycle_is_error() {
        let dir = tempdir().unwrap();
        let repo = ArtifactRepository::open(dir.path()).unwrap();
        repo.store(&script("x", &["y"])).unwrap();
        repo.store(&script("y", &["x"])).unwrap();

        let err = repo.resolve_dependencies(&["x".to_string()]).unwrap_err();
        assert!(matches!(err, ArtifactError::DependencyCycle(_)));
        assert!(err.to_string().contains("x -> y -> x"));
    }

    #[test]
    fn test_remove() {
        let dir = tempdir().unwrap();
        let repo = ArtifactRepository::open(dir.path()).unwrap();
        repo.store(&script("a", &[])).unwrap();
        repo.remove("a").unwrap();
        assert!(repo.get("a").unwrap().is_none());
        assert!(repo.remove("a").unwrap_err().is_not_found());
    }
}
