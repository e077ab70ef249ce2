/// Extension of the JSON metadata sidecar written next to stored content.
pub const META_EXTENSION: &str = "meta";

/// Extension appended to compressed artifacts.
pub const GZIP_EXTENSION: &str = "gz";

/// Directory under the data dir holding the artifact repository.
pub const ARTIFACTS_DIR: &str = "artifacts";

/// Directory under the data dir holding collected test artifacts.
pub const COLLECTED_DIR: &str = "collected";

/// Directory under the data dir holding deployment completion reports.
pub const REPORTS_DIR: &str = "reports";

/// Directory under the data dir holding per-run scratch areas.
pub const WORK_DIR: &str = "work";

/// Directory under the data dir holding boot images.
pub const IMAGES_DIR: &str = "images";

/// Directory under the data dir holding per-environment staging roots.
pub const STAGING_DIR: &str = "staging";

/// Directory under the data dir holding per-run output (console logs, exports).
pub const RUNS_DIR: &str = "runs";
