//! Per-run scratch directory.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Scratch directory removed when dropped.
#[derive(Debug)]
pub struct WorkArea {
    dir: TempDir,
}

impl WorkArea {
    /// Creates a fresh directory under `parent`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(parent: &Path, test_id: &str) -> io::Result<Self> {
        std::fs::create_dir_all(parent)?;
        let prefix: String = test_id.chars().filter(char::is_ascii_alphanumeric).take(12).collect();
        let dir = tempfile::Builder::new()
            .prefix(&format!("run-{prefix}-"))
            .tempdir_in(parent)?;
        Ok(Self { dir })
    }

    /// Directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of `name` inside the work area.
    #[must_use]
    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Removes the directory, reporting failures.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails.
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removed_on_drop() {
        let parent = tempfile::tempdir().unwrap();
        let path = {
            let area = WorkArea::new(parent.path(), "a1b2-c3").unwrap();
            std::fs::write(area.join("initrd.img"), b"x").unwrap();
            assert!(area.path().file_name().unwrap().to_string_lossy().starts_with("run-a1b2c3-"));
            area.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
