//! # stagehand-core
//!
//! Configuration and the engine context for stagehand.
//!
//! [`Engine`] replaces process-wide singletons: it owns the artifact
//! repository, deployment engine, test runner, artifact collector,
//! performance monitor and report store, and resolves environment ids
//! through an [`EnvironmentRegistry`].
//!
//! ```text
//! deploy:   plan ─▶ registry ─▶ LocalTarget ─▶ DeploymentEngine ─▶ ReportStore
//! run_test: case ─▶ registry ─▶ monitor start ─▶ TestRunner ─▶ monitor stop ─▶ collector
//! ```

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod engine;
pub mod error;
pub mod registry;

pub use config::{CollectorConfig, Config, LoggingConfig};
pub use engine::{Engine, EngineBuilder, TestRunOutcome};
pub use error::{CoreError, Result};
pub use registry::{EnvironmentKind, EnvironmentRegistry, InMemoryRegistry, TargetEnvironment};
