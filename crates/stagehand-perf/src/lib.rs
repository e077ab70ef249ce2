//! # stagehand-perf
//!
//! Resource monitoring for test runs.
//!
//! A [`PerformanceMonitor`] runs one sampling session at a time, reading
//! host and per-process counters through a [`ResourceProbe`]. Stopping a
//! session produces [`PerformanceMetrics`]: peaks and averages, a
//! down-sampled time series, a 0-100 score and detected bottlenecks.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod monitor;
pub mod probe;

pub use config::MonitorConfig;
pub use error::{PerfError, Result};
pub use metrics::{Bottleneck, PerformanceMetrics, ProcessMetrics, ResourceSnapshot};
pub use monitor::PerformanceMonitor;
pub use probe::{HostInfo, ProcProbe, ProcessCounters, ResourceProbe, SystemCounters};
