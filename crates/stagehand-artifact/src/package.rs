//! Deployment packages: gzip-compressed tar archives of artifacts.
//!
//! Each artifact contributes two entries, `{type}/{name}` holding the raw
//! content and `{type}/{name}.meta` holding the JSON metadata record.
//! Entries are written in dependency order, so unpacking yields artifacts
//! in the order they must be installed.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use stagehand_constants::storage::META_EXTENSION;
use tar::{Archive, Builder, EntryType, Header};

use crate::artifact::{Artifact, ArtifactMeta};
use crate::checksum::sha256_hex;
use crate::error::{ArtifactError, Result};

fn entry_path(artifact: &Artifact) -> String {
    format!("{}/{}", artifact.artifact_type.as_str(), artifact.name)
}

fn append(builder: &mut Builder<Vec<u8>>, path: &str, data: &[u8], mode: u32) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_path(path)?;
    header.set_size(data.len() as u64);
    header.set_mode(mode);
    header.set_entry_type(EntryType::Regular);
    header.set_cksum();
    builder.append(&header, data)?;
    Ok(())
}

/// Builds a package from artifacts already in installation order.
///
/// # Errors
///
/// Returns [`ArtifactError::Package`] if two artifacts map to the same
/// entry path or a name cannot be told apart from a metadata entry, or an
/// I/O error if the archive cannot be written.
pub fn build_package(artifacts: &[Artifact]) -> Result<Vec<u8>> {
    let mut seen = HashSet::new();
    let mut builder = Builder::new(Vec::new());

    for artifact in artifacts {
        let problems = artifact.path_errors();
        if !problems.is_empty() {
            return Err(ArtifactError::Package(format!(
                "artifact {}: {}",
                artifact.id,
                problems.join("; ")
            )));
        }
        let path = entry_path(artifact);
        if !seen.insert(path.clone()) {
            return Err(ArtifactError::Package(format!(
                "duplicate entry {path} (artifact {})",
                artifact.id
            )));
        }
        let mode = artifact.mode().unwrap_or(0o644);
        append(&mut builder, &path, &artifact.content, mode)?;

        let meta = serde_json::to_vec_pretty(&artifact.meta())?;
        append(&mut builder, &format!("{path}.{META_EXTENSION}"), &meta, 0o644)?;
    }

    let tar_data = builder.into_inner()?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_data)?;
    Ok(encoder.finish()?)
}

/// Reconstructs every artifact in a package.
///
/// Artifacts are returned in archive order, and each one's content is
/// checked against the checksum in its metadata record.
///
/// # Errors
///
/// Returns [`ArtifactError::Package`] for a metadata record without
/// content, [`ArtifactError::ChecksumMismatch`] for corrupted content, or
/// an I/O/JSON error for a malformed archive.
pub fn unpack_package(bytes: &[u8]) -> Result<Vec<Artifact>> {
    let mut archive = Archive::new(GzDecoder::new(bytes));
    let mut contents: HashMap<String, Vec<u8>> = HashMap::new();
    let mut metas: Vec<(String, ArtifactMeta)> = Vec::new();
    let suffix = format!(".{META_EXTENSION}");

    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type() != EntryType::Regular {
            continue;
        }
        let path = entry.path()?.to_string_lossy().into_owned();
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;

        if let Some(content_path) = path.strip_suffix(&suffix) {
            metas.push((content_path.to_string(), serde_json::from_slice(&data)?));
        } else {
            contents.insert(path, data);
        }
    }

    let mut artifacts = Vec::with_capacity(metas.len());
    for (content_path, meta) in metas {
        let content = contents.remove(&content_path).ok_or_else(|| {
            ArtifactError::Package(format!("missing content for {content_path}"))
        })?;
        let actual = sha256_hex(&content);
        if actual != meta.checksum {
            return Err(ArtifactError::ChecksumMismatch {
                id: meta.id,
                expected: meta.checksum,
                actual,
            });
        }
        artifacts.push(Artifact::from_parts(meta, content));
    }
    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactType;

    #[test]
    fn test_package_entries_layout() {
        let a = Artifact::new("setup.sh", ArtifactType::Script, "echo setup", "/opt/setup.sh");
        let b = Artifact::new("app.toml", ArtifactType::Config, "k = 1", "/etc/app.toml");
        let bytes = build_package(&[a, b]).unwrap();

        let mut archive = Archive::new(GzDecoder::new(bytes.as_slice()));
        let paths: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            paths,
            vec!["script/setup.sh", "script/setup.sh.meta", "config/app.toml", "config/app.toml.meta"]
        );
    }

    #[test]
    fn test_duplicate_entry_rejected() {
        let a = Artifact::new("run.sh", ArtifactType::Script, "one", "/a");
        let b = Artifact::new("run.sh", ArtifactType::Script, "two", "/b");
        assert!(matches!(build_package(&[a, b]), Err(ArtifactError::Package(_))));
    }

    #[test]
    fn test_sidecar_lookalike_name_rejected() {
        let a = Artifact::new("notes.meta", ArtifactType::Data, "{}", "/data/");
        assert!(matches!(build_package(&[a]), Err(ArtifactError::Package(_))));
    }

    #[test]
    fn test_unpack_detects_missing_content() {
        let artifact = Artifact::new("x.bin", ArtifactType::Data, vec![1, 2], "/x");
        let mut builder = Builder::new(Vec::new());
        let meta = serde_json::to_vec(&artifact.meta()).unwrap();
        append(&mut builder, "data/x.bin.meta", &meta, 0o644).unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(&builder.into_inner().unwrap()).unwrap();
        let bytes = encoder.finish().unwrap();

        assert!(matches!(unpack_package(&bytes), Err(ArtifactError::Package(_))));
    }
}
