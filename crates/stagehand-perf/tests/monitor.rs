//! Monitoring session tests against a scripted probe.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stagehand_perf::{
    Bottleneck, HostInfo, MonitorConfig, PerformanceMonitor, ProcProbe, ProcessCounters, ResourceProbe,
    SystemCounters,
};

const MIB: u64 = 1024 * 1024;

/// Every system read adds 100 CPU ticks (60 busy) and 1 MiB of disk reads;
/// memory sits at 95 %. Every process read adds half a CPU second.
#[derive(Default)]
struct ScriptedProbe {
    system_reads: Mutex<u64>,
    process_reads: Mutex<HashMap<u32, u64>>,
    /// Process id to number of reads before it disappears.
    lifetimes: HashMap<u32, u64>,
}

impl ResourceProbe for ScriptedProbe {
    fn system(&self) -> io::Result<SystemCounters> {
        let mut reads = self.system_reads.lock().unwrap();
        *reads += 1;
        Ok(SystemCounters {
            cpu_busy: 60 * *reads,
            cpu_total: 100 * *reads,
            memory_total: 1000,
            memory_available: 50,
            disk_read_bytes: MIB * *reads,
            process_count: 42,
            load: [0.5, 0.4, 0.3],
            ..SystemCounters::default()
        })
    }

    fn process(&self, pid: u32) -> io::Result<Option<ProcessCounters>> {
        let mut reads = self.process_reads.lock().unwrap();
        let count = reads.entry(pid).or_default();
        *count += 1;
        if self.lifetimes.get(&pid).is_some_and(|limit| *count > *limit) {
            return Ok(None);
        }
        #[allow(clippy::cast_precision_loss)]
        let cpu_seconds = *count as f64 * 0.5;
        Ok(Some(ProcessCounters {
            cpu_seconds,
            rss_bytes: 10 * MIB,
            threads: 3,
            ..ProcessCounters::default()
        }))
    }

    fn host(&self) -> HostInfo {
        HostInfo {
            architecture: "x86_64".into(),
            os: "linux".into(),
            cpu_count: 4,
            memory_total: 1000,
        }
    }
}

fn monitor(probe: ScriptedProbe, max_samples: usize) -> PerformanceMonitor {
    PerformanceMonitor::new(
        Arc::new(probe),
        MonitorConfig {
            interval_ms: 1000,
            max_samples,
            retained_points: 3,
        },
    )
}

#[tokio::test(start_paused = true)]
async fn test_session_metrics() {
    let probe = ScriptedProbe {
        lifetimes: [(2, 3)].into(),
        ..ScriptedProbe::default()
    };
    let monitor = monitor(probe, 5);

    monitor.start_monitoring("t1", &[1]).await.unwrap();
    assert!(monitor.is_monitoring());
    assert!(monitor.track_process(2));

    tokio::time::sleep(Duration::from_secs(10)).await;
    let metrics = monitor.stop_monitoring().await.unwrap().unwrap();

    assert!(!monitor.is_monitoring());
    assert_eq!(metrics.test_id, "t1");
    assert!(metrics.duration_secs >= 10.0);
    assert_eq!(metrics.samples.len(), 3);
    assert!((metrics.avg_cpu_percent - 60.0).abs() < 1e-9);
    assert!((metrics.peak_memory_percent - 95.0).abs() < 1e-9);
    assert!(metrics.disk_read_bytes >= 9 * MIB);
    assert_eq!(metrics.score, 60);
    assert_eq!(metrics.bottlenecks, vec![Bottleneck::MemoryPressure]);
    assert_eq!(metrics.host.cpu_count, 4);

    let main = &metrics.processes[&1];
    assert!(!main.exited);
    assert!((main.avg_cpu_percent - 50.0).abs() < 1e-9);
    assert_eq!(main.peak_rss_bytes, 10 * MIB);
    assert_eq!(main.max_threads, 3);

    let short_lived = &metrics.processes[&2];
    assert!(short_lived.exited);
    assert_eq!(short_lived.samples, 3);

    assert_eq!(monitor.metrics_for("t1"), Some(metrics));
    assert!(monitor.stop_monitoring().await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_new_session_stops_previous() {
    let monitor = monitor(ScriptedProbe::default(), 100);
    assert!(!monitor.track_process(7));

    monitor.start_monitoring("a", &[]).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    monitor.start_monitoring("b", &[]).await.unwrap();

    assert_eq!(monitor.current_test().as_deref(), Some("b"));
    let previous = monitor.metrics_for("a").unwrap();
    assert!(!previous.samples.is_empty());

    let current = monitor.stop_monitoring().await.unwrap().unwrap();
    assert_eq!(current.test_id, "b");
    assert!(monitor.metrics_for("b").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_stop_for_leaves_other_session_running() {
    let monitor = monitor(ScriptedProbe::default(), 100);

    monitor.start_monitoring("a", &[]).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    monitor.start_monitoring("b", &[]).await.unwrap();
    assert!(!monitor.track_process_for("a", 7));
    assert!(monitor.track_process_for("b", 7));
    tokio::time::sleep(Duration::from_secs(2)).await;

    let a = monitor.stop_monitoring_for("a").await.unwrap().unwrap();
    assert_eq!(a.test_id, "a");
    assert_eq!(monitor.current_test().as_deref(), Some("b"));

    let b = monitor.stop_monitoring_for("b").await.unwrap().unwrap();
    assert_eq!(b.test_id, "b");
    assert!(b.processes.contains_key(&7));
    assert!(!monitor.is_monitoring());
    assert!(monitor.stop_monitoring_for("c").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_release_finishes_in_background() {
    let monitor = monitor(ScriptedProbe::default(), 100);

    monitor.start_monitoring("dropped", &[]).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!monitor.release("other"));
    assert!(monitor.release("dropped"));
    assert!(!monitor.is_monitoring());

    for _ in 0..10 {
        if monitor.metrics_for("dropped").is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let metrics = monitor.metrics_for("dropped").unwrap();
    assert!(!metrics.samples.is_empty());
    assert!(!monitor.release("dropped"));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_proc_probe_session() {
    let monitor = PerformanceMonitor::new(
        Arc::new(ProcProbe::new()),
        MonitorConfig {
            interval_ms: 50,
            ..MonitorConfig::default()
        },
    );
    monitor
        .start_monitoring("live", &[std::process::id()])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let metrics = monitor.stop_monitoring().await.unwrap().unwrap();

    assert!(metrics.samples.len() >= 2);
    assert!(metrics.host.memory_total > 0);
    assert!(metrics.processes[&std::process::id()].peak_rss_bytes > 0);
    assert!(metrics.score <= 100);
}
