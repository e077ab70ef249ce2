//! Instrumentation flags and the settings derived from them.

use serde::{Deserialize, Serialize};

/// Instrumentation requested for a deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentationConfig {
    /// Collect code coverage.
    pub enable_coverage: bool,
    /// Inject faults.
    pub enable_fault_injection: bool,
    /// Enable kernel/user tracing.
    pub enable_tracing: bool,
    /// Enable sampling profiler.
    pub enable_profiling: bool,
}

/// Coverage collection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageSettings {
    /// Coverage tool.
    pub tool: String,
    /// Directory for coverage data on the target.
    pub output_dir: String,
    /// Collect branch coverage in addition to lines.
    pub branch_coverage: bool,
}

/// Fault injection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultInjectionSettings {
    /// Fault types to inject.
    pub fault_types: Vec<String>,
    /// Injection probability in percent.
    pub probability_percent: u8,
    /// Debugfs root of the fault injection interface.
    pub debugfs_root: String,
}

/// Tracing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracingSettings {
    /// Tracer name.
    pub tracer: String,
    /// Events to enable.
    pub events: Vec<String>,
    /// Per-CPU buffer size in KiB.
    pub buffer_size_kb: u32,
}

/// Profiling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilingSettings {
    /// Sampling frequency in Hz.
    pub frequency_hz: u32,
    /// Record call graphs.
    pub call_graph: bool,
    /// Output file on the target.
    pub output_path: String,
}

/// All derived settings for an instrumentation configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentationSettings {
    /// Present when coverage is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageSettings>,
    /// Present when fault injection is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault_injection: Option<FaultInjectionSettings>,
    /// Present when tracing is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracing: Option<TracingSettings>,
    /// Present when profiling is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profiling: Option<ProfilingSettings>,
}

impl InstrumentationConfig {
    /// Enables everything.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            enable_coverage: true,
            enable_fault_injection: true,
            enable_tracing: true,
            enable_profiling: true,
        }
    }

    /// Returns true if any instrumentation is requested.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enable_coverage
            || self.enable_fault_injection
            || self.enable_tracing
            || self.enable_profiling
    }

    /// Derives the concrete settings for every enabled flag.
    #[must_use]
    pub fn settings(&self) -> InstrumentationSettings {
        InstrumentationSettings {
            coverage: self.enable_coverage.then(|| CoverageSettings {
                tool: "gcov".to_string(),
                output_dir: "/var/lib/stagehand/coverage".to_string(),
                branch_coverage: true,
            }),
            fault_injection: self.enable_fault_injection.then(|| FaultInjectionSettings {
                fault_types: vec![
                    "failslab".to_string(),
                    "fail_page_alloc".to_string(),
                    "fail_make_request".to_string(),
                ],
                probability_percent: 1,
                debugfs_root: "/sys/kernel/debug".to_string(),
            }),
            tracing: self.enable_tracing.then(|| TracingSettings {
                tracer: "function_graph".to_string(),
                events: vec!["sched:sched_switch".to_string(), "syscalls".to_string()],
                buffer_size_kb: 4096,
            }),
            profiling: self.enable_profiling.then(|| ProfilingSettings {
                frequency_hz: 99,
                call_graph: true,
                output_path: "/var/lib/stagehand/perf.data".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_has_no_settings() {
        let config = InstrumentationConfig::default();
        assert!(!config.is_enabled());
        assert_eq!(config.settings(), InstrumentationSettings::default());
    }

    #[test]
    fn test_each_flag_derives_its_settings() {
        let config = InstrumentationConfig {
            enable_coverage: true,
            enable_tracing: true,
            ..Default::default()
        };
        assert!(config.is_enabled());
        let settings = config.settings();
        assert!(settings.coverage.is_some());
        assert!(settings.tracing.is_some());
        assert!(settings.fault_injection.is_none());
        assert!(settings.profiling.is_none());

        let json = serde_json::to_value(&settings).unwrap();
        assert!(json.get("profiling").is_none());
    }
}
