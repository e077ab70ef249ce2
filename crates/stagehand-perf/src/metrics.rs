//! Performance records, scoring and bottleneck detection.

#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::probe::HostInfo;

const MIB: f64 = 1024.0 * 1024.0;

/// Duration after which the score starts to drop, in seconds.
pub const SOFT_DURATION_CEILING_SECS: f64 = 300.0;

/// Host resources at one instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// Sample time.
    pub timestamp: DateTime<Utc>,
    /// Seconds since the session started.
    pub elapsed_secs: f64,
    /// Host CPU utilization since the previous sample, 0-100.
    pub cpu_percent: f64,
    /// Used memory in bytes.
    pub memory_used: u64,
    /// Available memory in bytes.
    pub memory_available: u64,
    /// Used memory as a share of total, 0-100.
    pub memory_percent: f64,
    /// Disk bytes read since the session started.
    pub disk_read_bytes: u64,
    /// Disk bytes written since the session started.
    pub disk_write_bytes: u64,
    /// Network bytes received since the session started.
    pub net_rx_bytes: u64,
    /// Network bytes sent since the session started.
    pub net_tx_bytes: u64,
    /// Processes on the host.
    pub process_count: u64,
    /// 1 minute load average.
    pub load_1: f64,
    /// 5 minute load average.
    pub load_5: f64,
    /// 15 minute load average.
    pub load_15: f64,
}

/// Aggregates for one tracked process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessMetrics {
    /// Process id.
    pub pid: u32,
    /// Samples taken.
    pub samples: u64,
    /// Peak CPU, percent of one core.
    pub peak_cpu_percent: f64,
    /// Average CPU, percent of one core.
    pub avg_cpu_percent: f64,
    /// Peak resident set size.
    pub peak_rss_bytes: u64,
    /// Peak virtual size.
    pub peak_vsz_bytes: u64,
    /// Most threads observed.
    pub max_threads: u64,
    /// Most open descriptors observed.
    pub max_open_fds: u64,
    /// Bytes read, last observed.
    pub read_bytes: u64,
    /// Bytes written, last observed.
    pub write_bytes: u64,
    /// True once the process disappeared.
    pub exited: bool,
}

/// Detected resource bottleneck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bottleneck {
    /// CPU peaked at or above 95 %.
    CpuSaturated,
    /// CPU averaged above 80 %.
    HighCpu,
    /// Memory peaked above 90 %.
    MemoryPressure,
    /// Memory peaked above 80 %.
    HighMemory,
    /// Disk I/O averaged above 50 MiB/s.
    HighDiskIo,
    /// Network I/O averaged above 25 MiB/s.
    HighNetworkIo,
    /// 1 minute load exceeded twice the core count.
    SystemOverload,
}

/// Result of one monitoring session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Monitored test.
    pub test_id: String,
    /// Session start.
    pub started_at: DateTime<Utc>,
    /// Session end.
    pub ended_at: DateTime<Utc>,
    /// Session length.
    pub duration_secs: f64,
    /// Peak host CPU.
    pub peak_cpu_percent: f64,
    /// Average host CPU.
    pub avg_cpu_percent: f64,
    /// Peak used memory.
    pub peak_memory_bytes: u64,
    /// Average used memory.
    pub avg_memory_bytes: u64,
    /// Peak used memory as a share of total.
    pub peak_memory_percent: f64,
    /// Disk bytes read during the session.
    pub disk_read_bytes: u64,
    /// Disk bytes written during the session.
    pub disk_write_bytes: u64,
    /// Network bytes received during the session.
    pub net_rx_bytes: u64,
    /// Network bytes sent during the session.
    pub net_tx_bytes: u64,
    /// Per-process aggregates.
    pub processes: BTreeMap<u32, ProcessMetrics>,
    /// Down-sampled time series.
    pub samples: Vec<ResourceSnapshot>,
    /// 0-100, higher is better.
    pub score: u8,
    /// Detected bottlenecks.
    pub bottlenecks: Vec<Bottleneck>,
    /// Host characteristics.
    pub host: HostInfo,
}

impl PerformanceMetrics {
    /// Builds the record from raw samples.
    #[must_use]
    pub fn from_samples(
        test_id: impl Into<String>,
        started_at: DateTime<Utc>,
        duration_secs: f64,
        samples: &[ResourceSnapshot],
        processes: BTreeMap<u32, ProcessMetrics>,
        host: HostInfo,
        retained_points: usize,
    ) -> Self {
        let count = samples.len().max(1) as f64;
        let peak_cpu_percent = samples.iter().map(|s| s.cpu_percent).fold(0.0, f64::max);
        let avg_cpu_percent = samples.iter().map(|s| s.cpu_percent).sum::<f64>() / count;
        let peak_memory_bytes = samples.iter().map(|s| s.memory_used).max().unwrap_or(0);
        let avg_memory_bytes = (samples.iter().map(|s| s.memory_used as f64).sum::<f64>() / count) as u64;
        let peak_memory_percent = samples.iter().map(|s| s.memory_percent).fold(0.0, f64::max);
        let peak_load = samples.iter().map(|s| s.load_1).fold(0.0, f64::max);
        let last = samples.last().cloned().unwrap_or_default();

        let bottlenecks = detect_bottlenecks(&Observed {
            peak_cpu_percent,
            avg_cpu_percent,
            peak_memory_percent,
            disk_bytes: last.disk_read_bytes + last.disk_write_bytes,
            net_bytes: last.net_rx_bytes + last.net_tx_bytes,
            duration_secs,
            peak_load,
            cpu_count: host.cpu_count,
        });

        Self {
            test_id: test_id.into(),
            started_at,
            ended_at: started_at + chrono::Duration::milliseconds((duration_secs * 1000.0) as i64),
            duration_secs,
            peak_cpu_percent,
            avg_cpu_percent,
            peak_memory_bytes,
            avg_memory_bytes,
            peak_memory_percent,
            disk_read_bytes: last.disk_read_bytes,
            disk_write_bytes: last.disk_write_bytes,
            net_rx_bytes: last.net_rx_bytes,
            net_tx_bytes: last.net_tx_bytes,
            processes,
            samples: downsample(samples, retained_points),
            score: score(avg_cpu_percent, peak_memory_percent, duration_secs),
            bottlenecks,
            host,
        }
    }
}

/// 100 minus penalties for sustained CPU, peak memory and long runs.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn score(avg_cpu_percent: f64, peak_memory_percent: f64, duration_secs: f64) -> u8 {
    let mut penalty = 0.0;
    if avg_cpu_percent > 80.0 {
        penalty += 30.0;
    } else if avg_cpu_percent > 50.0 {
        penalty += 15.0;
    }
    if peak_memory_percent > 80.0 {
        penalty += 25.0;
    } else if peak_memory_percent > 50.0 {
        penalty += 10.0;
    }
    if duration_secs > SOFT_DURATION_CEILING_SECS {
        let extra_periods = ((duration_secs - SOFT_DURATION_CEILING_SECS) / 300.0).ceil();
        penalty += (extra_periods * 10.0).min(20.0);
    }
    (100.0 - penalty).clamp(0.0, 100.0) as u8
}

/// Inputs to bottleneck detection.
#[derive(Debug, Clone, Copy, Default)]
pub struct Observed {
    /// Peak host CPU.
    pub peak_cpu_percent: f64,
    /// Average host CPU.
    pub avg_cpu_percent: f64,
    /// Peak memory share.
    pub peak_memory_percent: f64,
    /// Disk bytes moved.
    pub disk_bytes: u64,
    /// Network bytes moved.
    pub net_bytes: u64,
    /// Session length.
    pub duration_secs: f64,
    /// Peak 1 minute load.
    pub peak_load: f64,
    /// Cores.
    pub cpu_count: u64,
}

/// Tags the resources that limited the run.
#[must_use]
pub fn detect_bottlenecks(observed: &Observed) -> Vec<Bottleneck> {
    let mut found = Vec::new();
    if observed.peak_cpu_percent >= 95.0 {
        found.push(Bottleneck::CpuSaturated);
    }
    if observed.avg_cpu_percent > 80.0 {
        found.push(Bottleneck::HighCpu);
    }
    if observed.peak_memory_percent > 90.0 {
        found.push(Bottleneck::MemoryPressure);
    } else if observed.peak_memory_percent > 80.0 {
        found.push(Bottleneck::HighMemory);
    }
    if observed.duration_secs > 0.0 {
        if observed.disk_bytes as f64 / observed.duration_secs > 50.0 * MIB {
            found.push(Bottleneck::HighDiskIo);
        }
        if observed.net_bytes as f64 / observed.duration_secs > 25.0 * MIB {
            found.push(Bottleneck::HighNetworkIo);
        }
    }
    if observed.cpu_count > 0 && observed.peak_load > 2.0 * observed.cpu_count as f64 {
        found.push(Bottleneck::SystemOverload);
    }
    found
}

/// Picks `points` evenly spaced samples, keeping the first and last.
#[must_use]
pub fn downsample<T: Clone>(samples: &[T], points: usize) -> Vec<T> {
    if points == 0 {
        return Vec::new();
    }
    if samples.len() <= points {
        return samples.to_vec();
    }
    if points == 1 {
        return samples.last().cloned().into_iter().collect();
    }
    let last = samples.len() - 1;
    (0..points)
        .map(|i| samples[i * last / (points - 1)].clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_penalties() {
        assert_eq!(score(10.0, 20.0, 60.0), 100);
        assert_eq!(score(60.0, 20.0, 60.0), 85);
        assert_eq!(score(90.0, 85.0, 60.0), 45);
        assert_eq!(score(10.0, 60.0, 301.0), 80);
        assert_eq!(score(10.0, 20.0, 3600.0), 80);
        assert_eq!(score(95.0, 95.0, 3600.0), 25);
    }

    #[test]
    fn test_bottlenecks() {
        let observed = Observed {
            peak_cpu_percent: 97.0,
            avg_cpu_percent: 85.0,
            peak_memory_percent: 85.0,
            disk_bytes: 600 * 1024 * 1024,
            net_bytes: 10 * 1024 * 1024,
            duration_secs: 10.0,
            peak_load: 9.0,
            cpu_count: 4,
        };
        assert_eq!(
            detect_bottlenecks(&observed),
            vec![
                Bottleneck::CpuSaturated,
                Bottleneck::HighCpu,
                Bottleneck::HighMemory,
                Bottleneck::HighDiskIo,
                Bottleneck::SystemOverload,
            ]
        );
        let calm = Observed {
            duration_secs: 10.0,
            cpu_count: 4,
            ..Observed::default()
        };
        assert!(detect_bottlenecks(&calm).is_empty());
        let pressured = Observed {
            peak_memory_percent: 95.0,
            ..calm
        };
        assert_eq!(detect_bottlenecks(&pressured), vec![Bottleneck::MemoryPressure]);
    }

    #[test]
    fn test_downsample_keeps_ends() {
        let samples: Vec<u32> = (0..1000).collect();
        let reduced = downsample(&samples, 100);
        assert_eq!(reduced.len(), 100);
        assert_eq!(reduced[0], 0);
        assert_eq!(reduced[99], 999);
        assert!(reduced.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(downsample(&samples[..5], 100), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_from_samples() {
        let samples: Vec<ResourceSnapshot> = (0..4)
            .map(|i| ResourceSnapshot {
                cpu_percent: f64::from(i) * 10.0,
                memory_used: 100 * u64::from(i as u8),
                memory_percent: f64::from(i) * 20.0,
                disk_read_bytes: u64::from(i as u8),
                ..ResourceSnapshot::default()
            })
            .collect();
        let metrics = PerformanceMetrics::from_samples(
            "t",
            Utc::now(),
            4.0,
            &samples,
            BTreeMap::new(),
            HostInfo::default(),
            2,
        );
        assert!((metrics.avg_cpu_percent - 15.0).abs() < 1e-9);
        assert!((metrics.peak_cpu_percent - 30.0).abs() < 1e-9);
        assert_eq!(metrics.peak_memory_bytes, 300);
        assert_eq!(metrics.disk_read_bytes, 3);
        assert_eq!(metrics.samples.len(), 2);
        assert_eq!(metrics.score, 90);
        assert!(metrics.ended_at > metrics.started_at);
    }
}
