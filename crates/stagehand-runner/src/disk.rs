//! Artifact export disk.

use std::io;
use std::path::{Path, PathBuf};

use stagehand_artifact::ArtifactBundle;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Result, RunnerError};

/// Creates a sparse raw image of `size_mb` and formats it as ext4.
///
/// Returns `false` when `mkfs.ext4` is unavailable. The image is then
/// unusable and the run goes ahead without an export disk.
///
/// # Errors
///
/// Returns an error if the image cannot be created or formatting fails.
pub async fn create_artifact_disk(path: &Path, size_mb: u64) -> Result<bool> {
    let file = tokio::fs::File::create(path).await?;
    file.set_len(size_mb * 1024 * 1024).await?;
    drop(file);

    let output = match Command::new("mkfs.ext4")
        .arg("-q")
        .arg("-F")
        .arg(path)
        .output()
        .await
    {
        Ok(output) => output,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "mkfs.ext4 not found, artifact disk left unformatted");
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    };

    if !output.status.success() {
        return Err(RunnerError::Image(format!(
            "mkfs.ext4 failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    debug!(path = %path.display(), size_mb, "artifact disk formatted");
    Ok(true)
}

/// Copies the disk contents into `dest` and classifies every file.
///
/// Extraction problems are logged; whatever was copied is returned.
pub async fn extract_artifacts(image: &Path, dest: &Path) -> ArtifactBundle {
    if let Err(e) = tokio::fs::create_dir_all(dest).await {
        warn!(dest = %dest.display(), error = %e, "cannot create extraction directory");
        return ArtifactBundle::default();
    }

    let request = format!("rdump / {}", dest.display());
    match Command::new("debugfs").arg("-R").arg(&request).arg(image).output().await {
        Ok(output) if output.status.success() => {}
        Ok(output) => {
            warn!(
                image = %image.display(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "debugfs rdump failed"
            );
        }
        Err(e) => {
            warn!(image = %image.display(), error = %e, "debugfs unavailable");
            return ArtifactBundle::default();
        }
    }

    let root = dest.to_path_buf();
    let files = tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        walk(&root, &mut files);
        files
    })
    .await
    .unwrap_or_default();

    let mut bundle = ArtifactBundle::default();
    for file in files {
        bundle.push_classified(file);
    }
    bundle
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut entries: Vec<_> = entries.filter_map(std::result::Result::ok).collect();
    entries.sort_by_key(std::fs::DirEntry::file_name);
    for entry in entries {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            if entry.file_name() != "lost+found" {
                walk(&path, files);
            }
        } else if file_type.is_file() {
            files.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_artifact::ArtifactCategory;

    async fn installed(tool: &str) -> bool {
        Command::new(tool).arg("-V").output().await.is_ok()
    }

    async fn debugfs_write(image: &Path, source: &Path, name: &str) {
        let request = format!("write {} {name}", source.display());
        let output = Command::new("debugfs")
            .arg("-w")
            .arg("-R")
            .arg(&request)
            .arg(image)
            .output()
            .await
            .unwrap();
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    }

    #[tokio::test]
    async fn test_export_disk_round_trip() {
        if !installed("mkfs.ext4").await || !installed("debugfs").await {
            eprintln!("skipping: e2fsprogs not installed");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("artifacts.img");
        assert!(create_artifact_disk(&image, 8).await.unwrap());

        let log = dir.path().join("test.log");
        let core = dir.path().join("core.42");
        std::fs::write(&log, b"suite passed\n").unwrap();
        std::fs::write(&core, [0x7fu8, b'E', b'L', b'F']).unwrap();
        debugfs_write(&image, &log, "test.log").await;
        debugfs_write(&image, &core, "core.42").await;

        let dest = dir.path().join("exported");
        let bundle = extract_artifacts(&image, &dest).await;

        let names = |category| -> Vec<String> {
            bundle
                .paths(category)
                .iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect()
        };
        assert_eq!(bundle.len(), 2);
        assert_eq!(names(ArtifactCategory::Log), ["test.log"]);
        assert_eq!(names(ArtifactCategory::CoreDump), ["core.42"]);

        let exported_log = &bundle.paths(ArtifactCategory::Log)[0];
        assert!(exported_log.starts_with(&dest));
        assert_eq!(std::fs::read(exported_log).unwrap(), b"suite passed\n");
    }

    #[test]
    fn test_walk_skips_lost_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("lost+found")).unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("lost+found/#12"), b"x").unwrap();
        std::fs::write(dir.path().join("nested/core.123"), b"x").unwrap();
        std::fs::write(dir.path().join("test.log"), b"x").unwrap();

        let mut files = Vec::new();
        walk(dir.path(), &mut files);
        assert_eq!(
            files,
            vec![dir.path().join("nested/core.123"), dir.path().join("test.log")]
        );
    }
}
