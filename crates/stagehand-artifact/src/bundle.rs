//! Files produced by a test run, grouped by category.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Category of a produced artifact; selects retention and storage area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactCategory {
    /// Console transcripts and log files.
    Log,
    /// Process or kernel core dumps.
    CoreDump,
    /// Execution traces and profiles.
    Trace,
    /// Captured screens.
    Screenshot,
    /// Anything else.
    Other,
}

impl ArtifactCategory {
    /// All categories.
    pub const ALL: [Self; 5] = [
        Self::Log,
        Self::CoreDump,
        Self::Trace,
        Self::Screenshot,
        Self::Other,
    ];

    /// Storage directory name for this category.
    #[must_use]
    pub const fn dir_name(&self) -> &'static str {
        match self {
            Self::Log => "logs",
            Self::CoreDump => "core_dumps",
            Self::Trace => "traces",
            Self::Screenshot => "screenshots",
            Self::Other => "other",
        }
    }

    /// Classifies an exported file by its name.
    #[must_use]
    pub fn classify(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if name.starts_with("core") || name.contains("vmcore") || matches!(ext.as_str(), "core" | "dmp" | "dump")
        {
            Self::CoreDump
        } else if name.contains("trace") || matches!(ext.as_str(), "trace" | "perf" | "ftrace" | "dat") {
            Self::Trace
        } else if matches!(ext.as_str(), "log" | "txt" | "out" | "err") || name.contains("dmesg") {
            Self::Log
        } else if matches!(ext.as_str(), "png" | "jpg" | "jpeg" | "ppm" | "bmp") {
            Self::Screenshot
        } else {
            Self::Other
        }
    }
}

impl std::fmt::Display for ArtifactCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Paths of files a test run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactBundle {
    /// Log files.
    #[serde(default)]
    pub logs: Vec<PathBuf>,
    /// Core dumps.
    #[serde(default)]
    pub core_dumps: Vec<PathBuf>,
    /// Traces.
    #[serde(default)]
    pub traces: Vec<PathBuf>,
    /// Screenshots.
    #[serde(default)]
    pub screenshots: Vec<PathBuf>,
    /// Uncategorized files.
    #[serde(default)]
    pub other: Vec<PathBuf>,
}

impl ArtifactBundle {
    /// Adds a path under the given category.
    pub fn push(&mut self, category: ArtifactCategory, path: impl Into<PathBuf>) {
        self.paths_mut(category).push(path.into());
    }

    /// Adds a path, classifying it by file name.
    pub fn push_classified(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        let category = ArtifactCategory::classify(&path);
        self.push(category, path);
    }

    /// Returns the paths for one category.
    #[must_use]
    pub fn paths(&self, category: ArtifactCategory) -> &[PathBuf] {
        match category {
            ArtifactCategory::Log => &self.logs,
            ArtifactCategory::CoreDump => &self.core_dumps,
            ArtifactCategory::Trace => &self.traces,
            ArtifactCategory::Screenshot => &self.screenshots,
            ArtifactCategory::Other => &self.other,
        }
    }

    fn paths_mut(&mut self, category: ArtifactCategory) -> &mut Vec<PathBuf> {
        match category {
            ArtifactCategory::Log => &mut self.logs,
            ArtifactCategory::CoreDump => &mut self.core_dumps,
            ArtifactCategory::Trace => &mut self.traces,
            ArtifactCategory::Screenshot => &mut self.screenshots,
            ArtifactCategory::Other => &mut self.other,
        }
    }

    /// Iterates over every `(category, path)` pair.
    pub fn iter(&self) -> impl Iterator<Item = (ArtifactCategory, &PathBuf)> {
        ArtifactCategory::ALL
            .into_iter()
            .flat_map(move |c| self.paths(c).iter().map(move |p| (c, p)))
    }

    /// Total number of paths.
    #[must_use]
    pub fn len(&self) -> usize {
        ArtifactCategory::ALL.iter().map(|c| self.paths(*c).len()).sum()
    }

    /// Returns true if no paths are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Something that produced artifacts for a test, such as a test result.
pub trait ArtifactSource {
    /// Id of the test that owns the artifacts.
    fn test_id(&self) -> &str;

    /// Produced files.
    fn artifact_bundle(&self) -> &ArtifactBundle;
}
