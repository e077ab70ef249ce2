//! # stagehand-collector
//!
//! Durable storage for files produced by test runs.
//!
//! Collected files are copied under a category and test scoped directory,
//! checksummed and indexed by id and owning test. Retention policies per
//! [`ArtifactCategory`](stagehand_artifact::ArtifactCategory) decide when
//! artifacts are compressed, evicted or deleted.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod collector;
pub mod error;
pub mod policy;
pub mod record;

pub use clock::{Clock, ManualClock, SystemClock};
pub use collector::ArtifactCollector;
pub use error::{CollectorError, Result};
pub use policy::{RetentionConfig, RetentionPolicy};
pub use record::{ArtifactRecord, CleanupStats, CollectionReport, GroupStats, StorageStats};
