//! Emulator-based test runner.
//!
//! Each test boots a fresh guest: the test script is packed into an init
//! image, the emulator's serial console is streamed over a bounded channel,
//! and the run ends on the completion marker, emulator exit, timeout or
//! cancellation. Teardown (process group, reader tasks, scratch directory)
//! happens on every path.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod arch;
pub mod case;
pub mod config;
pub mod console;
pub mod disk;
pub mod error;
pub mod initramfs;
pub mod launcher;
pub mod result;
pub mod runner;
pub mod script;
pub mod workarea;

pub use arch::Architecture;
pub use case::{PayloadFile, TargetSpec, TestCase};
pub use config::RunnerConfig;
pub use console::{classify, ConsoleBuffer, RunEnd};
pub use error::{Result, RunnerError};
pub use launcher::{EmulatorLauncher, LaunchSpec, QemuLauncher};
pub use result::{FailureInfo, FailureKind, TestResult, TestStatus};
pub use runner::{ProcessObserver, TestRunner};
