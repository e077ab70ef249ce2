//! # stagehand-deploy
//!
//! Deployment of artifact sets onto test environments.
//!
//! A [`DeploymentPlan`] is validated up front, then executed by the
//! [`DeploymentEngine`] as an ordered sequence of steps:
//!
//! ```text
//! PENDING → PREPARING → CONNECTING → INSTALLING_DEPS → DEPLOYING_SCRIPTS
//!         → CONFIGURING_INSTRUMENTATION → VALIDATING → COMPLETED
//!                                                    ↘ FAILED | CANCELLED
//! ```
//!
//! Each step retries transient failures according to the
//! [`RetryPolicy`] transition table. The actual transport is behind the
//! [`DeploymentTarget`] trait; [`LocalTarget`] stages into a directory.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod engine;
pub mod error;
pub mod instrumentation;
pub mod plan;
pub mod report;
pub mod result;
pub mod retry;
pub mod status;
pub mod step;
pub mod target;

pub use config::DeploymentConfig;
pub use engine::DeploymentEngine;
pub use error::{DeployError, Result};
pub use instrumentation::{InstrumentationConfig, InstrumentationSettings};
pub use plan::{DeploymentPlan, Severity, ValidationIssue};
pub use report::{CompletionReport, PerformanceSummary, ReportStore, ReportSummary};
pub use result::{DeploymentResult, TransferMetrics};
pub use retry::{RetryPolicy, StepOutcome, Transition};
pub use status::DeploymentStatus;
pub use step::{DeploymentStep, StepKind};
pub use target::{DeploymentTarget, InstalledDependency, LocalTarget};
