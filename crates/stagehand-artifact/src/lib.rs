//! # stagehand-artifact
//!
//! Typed, checksummed artifacts and the repository that stores them.
//!
//! - [`Artifact`]: deployable file plus integrity and placement metadata
//! - [`Dependency`]: package-manager dependency with derived commands
//! - [`ArtifactRepository`]: durable store with dependency resolution
//! - [`package`]: gzip-compressed tar packaging of artifact sets
//! - [`ArtifactBundle`]: files a test run produced, grouped by category
//!
//! ## Storage layout
//!
//! ```text
//! <root>/
//! ├── script/
//! │   ├── <id>_<name>          # raw content
//! │   └── <id>_<name>.meta     # JSON sidecar (every field but content)
//! ├── binary/
//! └── ...
//! ```

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod artifact;
pub mod bundle;
pub mod checksum;
pub mod dependency;
pub mod error;
pub mod package;
pub mod permissions;
pub mod repository;

pub use artifact::{has_parent_component, Artifact, ArtifactMeta, ArtifactType};
pub use bundle::{ArtifactBundle, ArtifactCategory, ArtifactSource};
pub use checksum::sha256_hex;
pub use dependency::{Dependency, PackageManager};
pub use error::{ArtifactError, Result};
pub use package::unpack_package;
pub use permissions::Permissions;
pub use repository::ArtifactRepository;
