//! Retention policies per artifact category.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use stagehand_artifact::ArtifactCategory;

/// How long artifacts of one category are kept and when they are compressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Age after which artifacts are deleted.
    pub max_age_days: u32,
    /// Age after which artifacts are gzip-compressed.
    #[serde(default)]
    pub compress_after_days: Option<u32>,
    /// Keep at most this many artifacts; oldest are evicted first.
    #[serde(default)]
    pub max_count: Option<usize>,
    /// Keep at most this many stored bytes; oldest are evicted first.
    #[serde(default)]
    pub max_size_bytes: Option<u64>,
}

impl RetentionPolicy {
    /// Policy deleting after `max_age_days`.
    #[must_use]
    pub const fn days(max_age_days: u32) -> Self {
        Self {
            max_age_days,
            compress_after_days: None,
            max_count: None,
            max_size_bytes: None,
        }
    }

    /// Compresses after `days`.
    #[must_use]
    pub const fn compress_after(mut self, days: u32) -> Self {
        self.compress_after_days = Some(days);
        self
    }

    /// Caps the number of artifacts.
    #[must_use]
    pub const fn max_count(mut self, count: usize) -> Self {
        self.max_count = Some(count);
        self
    }

    /// Caps the stored bytes.
    #[must_use]
    pub const fn max_size(mut self, bytes: u64) -> Self {
        self.max_size_bytes = Some(bytes);
        self
    }

    /// Maximum age.
    #[must_use]
    pub fn max_age(&self) -> Duration {
        Duration::days(i64::from(self.max_age_days))
    }

    /// Compression age, if compression is enabled.
    #[must_use]
    pub fn compress_age(&self) -> Option<Duration> {
        self.compress_after_days.map(|d| Duration::days(i64::from(d)))
    }
}

/// Retention policies for every category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Console and log files.
    pub logs: RetentionPolicy,
    /// Core dumps.
    pub core_dumps: RetentionPolicy,
    /// Traces.
    pub traces: RetentionPolicy,
    /// Screenshots.
    pub screenshots: RetentionPolicy,
    /// Everything else.
    pub other: RetentionPolicy,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            logs: RetentionPolicy::days(30).compress_after(7),
            core_dumps: RetentionPolicy::days(14).compress_after(1).max_count(20),
            traces: RetentionPolicy::days(7).compress_after(1),
            screenshots: RetentionPolicy::days(30),
            other: RetentionPolicy::days(7),
        }
    }
}

impl RetentionConfig {
    /// Policy for `category`.
    #[must_use]
    pub const fn for_category(&self, category: ArtifactCategory) -> &RetentionPolicy {
        match category {
            ArtifactCategory::Log => &self.logs,
            ArtifactCategory::CoreDump => &self.core_dumps,
            ArtifactCategory::Trace => &self.traces,
            ArtifactCategory::Screenshot => &self.screenshots,
            ArtifactCategory::Other => &self.other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RetentionConfig::default();
        assert_eq!(config.for_category(ArtifactCategory::Log).max_age(), Duration::days(30));
        assert_eq!(
            config.for_category(ArtifactCategory::CoreDump).compress_age(),
            Some(Duration::days(1))
        );
        assert_eq!(config.core_dumps.max_count, Some(20));
        assert_eq!(config.screenshots.compress_age(), None);
    }

    #[test]
    fn test_partial_override() {
        let config: RetentionConfig =
            serde_json::from_str(r#"{"other": {"max_age_days": 1, "max_size_bytes": 1024}}"#).unwrap();
        assert_eq!(config.other.max_size_bytes, Some(1024));
        assert_eq!(config.logs, RetentionPolicy::days(30).compress_after(7));
    }
}
