//! Sampling sessions.
//!
//! One session runs at a time. Its sampling loop owns all session state and
//! hands it back when cancelled, so stopping a session is a join rather than
//! a lock dance. Callers that run several tests stop and release sessions by
//! test id, which never touches another test's session.

#![allow(clippy::cast_precision_loss)]

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use stagehand_error::CommonError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::metrics::{PerformanceMetrics, ProcessMetrics, ResourceSnapshot};
use crate::probe::{HostInfo, ResourceProbe, SystemCounters};

/// Samples host and process resources while a test runs.
pub struct PerformanceMonitor {
    probe: Arc<dyn ResourceProbe>,
    config: MonitorConfig,
    active: Mutex<Option<Session>>,
    finished: Arc<Mutex<HashMap<String, PerformanceMetrics>>>,
}

struct Session {
    test_id: String,
    tracked: Arc<Mutex<BTreeSet<u32>>>,
    cancel: CancellationToken,
    handle: JoinHandle<Sampler>,
}

impl PerformanceMonitor {
    /// Creates a monitor.
    #[must_use]
    pub fn new(probe: Arc<dyn ResourceProbe>, config: MonitorConfig) -> Self {
        Self {
            probe,
            config,
            active: Mutex::new(None),
            finished: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts sampling for `test_id`, tracking `pids`.
    ///
    /// A session that is still running is stopped first; its metrics stay
    /// available through [`PerformanceMonitor::metrics_for`].
    ///
    /// # Errors
    ///
    /// Returns an error if the baseline sample cannot be taken.
    pub async fn start_monitoring(&self, test_id: &str, pids: &[u32]) -> Result<()> {
        let previous = lock(&self.active).take();
        if let Some(previous) = previous {
            warn!(previous = %previous.test_id, next = test_id, "replacing active monitoring session");
            self.finish(previous).await?;
        }

        let baseline = self.probe.system()?;
        let tracked = Arc::new(Mutex::new(pids.iter().copied().collect::<BTreeSet<u32>>()));
        let sampler = Sampler {
            probe: Arc::clone(&self.probe),
            max_samples: self.config.max_samples.max(1),
            started_at: Utc::now(),
            start: Instant::now(),
            baseline,
            prev: baseline,
            samples: VecDeque::new(),
            processes: HashMap::new(),
            tracked: Arc::clone(&tracked),
        };
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sampler.run(self.config.interval(), cancel.clone()));

        let session = Session {
            test_id: test_id.to_string(),
            tracked,
            cancel,
            handle,
        };
        let raced = lock(&self.active).replace(session);
        if let Some(raced) = raced {
            self.finish(raced).await?;
        }

        info!(test_id, pids = ?pids, interval_ms = self.config.interval_ms, "monitoring started");
        Ok(())
    }

    /// Adds a process to the active session. Returns false if none is active.
    pub fn track_process(&self, pid: u32) -> bool {
        lock(&self.active).as_ref().is_some_and(|session| {
            lock(&session.tracked).insert(pid);
            debug!(test_id = %session.test_id, pid, "tracking process");
            true
        })
    }

    /// Adds a process to `test_id`'s session. Returns false if that test
    /// has no running session.
    pub fn track_process_for(&self, test_id: &str, pid: u32) -> bool {
        lock(&self.active)
            .as_ref()
            .filter(|session| session.test_id == test_id)
            .is_some_and(|session| {
                lock(&session.tracked).insert(pid);
                debug!(test_id, pid, "tracking process");
                true
            })
    }

    /// Returns true while a session is running.
    pub fn is_monitoring(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// Test id of the running session.
    pub fn current_test(&self) -> Option<String> {
        lock(&self.active).as_ref().map(|s| s.test_id.clone())
    }

    /// Stops the running session and returns its metrics.
    ///
    /// # Errors
    ///
    /// Returns an error if the sampling task panicked.
    pub async fn stop_monitoring(&self) -> Result<Option<PerformanceMetrics>> {
        let session = lock(&self.active).take();
        match session {
            Some(session) => self.finish(session).await.map(Some),
            None => Ok(None),
        }
    }

    /// Stops `test_id`'s session and returns its metrics.
    ///
    /// When another test's session is running it is left alone, and the
    /// metrics recorded for `test_id` (if its session was replaced earlier)
    /// are returned instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the sampling task panicked.
    pub async fn stop_monitoring_for(&self, test_id: &str) -> Result<Option<PerformanceMetrics>> {
        let session = self.take_session(test_id);
        match session {
            Some(session) => self.finish(session).await.map(Some),
            None => Ok(self.metrics_for(test_id)),
        }
    }

    /// Cancels `test_id`'s session without waiting for it.
    ///
    /// Usable from `Drop`. The sampling task is joined in the background
    /// and its metrics land in [`PerformanceMonitor::metrics_for`]. Returns
    /// false if that test has no running session.
    pub fn release(&self, test_id: &str) -> bool {
        let Some(session) = self.take_session(test_id) else {
            return false;
        };
        session.cancel.cancel();
        warn!(test_id, "monitoring session released without being stopped");

        let Session { test_id, handle, .. } = session;
        let finished = Arc::clone(&self.finished);
        let host = self.probe.host();
        let retained_points = self.config.retained_points;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    match handle.await {
                        Ok(sampler) => {
                            let metrics = summarize(test_id.clone(), sampler, host, retained_points);
                            lock(&finished).insert(test_id, metrics);
                        }
                        Err(e) => warn!(%test_id, error = %e, "sampling task failed"),
                    }
                });
            }
            Err(_) => debug!(%test_id, "no runtime, released session metrics dropped"),
        }
        true
    }

    /// Metrics of a finished session.
    pub fn metrics_for(&self, test_id: &str) -> Option<PerformanceMetrics> {
        lock(&self.finished).get(test_id).cloned()
    }

    fn take_session(&self, test_id: &str) -> Option<Session> {
        let mut active = lock(&self.active);
        if active.as_ref().is_some_and(|session| session.test_id == test_id) {
            active.take()
        } else {
            None
        }
    }

    async fn finish(&self, session: Session) -> Result<PerformanceMetrics> {
        session.cancel.cancel();
        let sampler = session
            .handle
            .await
            .map_err(|e| CommonError::internal(format!("sampling task failed: {e}")))?;

        let metrics = summarize(
            session.test_id.clone(),
            sampler,
            self.probe.host(),
            self.config.retained_points,
        );
        lock(&self.finished).insert(session.test_id, metrics.clone());
        Ok(metrics)
    }
}

fn summarize(test_id: String, sampler: Sampler, host: HostInfo, retained_points: usize) -> PerformanceMetrics {
    let samples: Vec<ResourceSnapshot> = sampler.samples.into_iter().collect();
    let processes: BTreeMap<u32, ProcessMetrics> = sampler
        .processes
        .into_iter()
        .map(|(pid, state)| (pid, state.metrics))
        .collect();
    let metrics = PerformanceMetrics::from_samples(
        test_id,
        sampler.started_at,
        sampler.start.elapsed().as_secs_f64(),
        &samples,
        processes,
        host,
        retained_points,
    );

    info!(
        test_id = %metrics.test_id,
        samples = samples.len(),
        score = metrics.score,
        bottlenecks = ?metrics.bottlenecks,
        "monitoring stopped"
    );
    metrics
}

impl Drop for PerformanceMonitor {
    fn drop(&mut self) {
        if let Some(session) = lock(&self.active).take() {
            session.cancel.cancel();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Sampling loop
// ============================================================================

struct ProcessState {
    prev_cpu_seconds: f64,
    prev_at: Instant,
    cpu_sum: f64,
    rate_samples: u64,
    metrics: ProcessMetrics,
}

struct Sampler {
    probe: Arc<dyn ResourceProbe>,
    max_samples: usize,
    started_at: DateTime<Utc>,
    start: Instant,
    baseline: SystemCounters,
    prev: SystemCounters,
    samples: VecDeque<ResourceSnapshot>,
    processes: HashMap<u32, ProcessState>,
    tracked: Arc<Mutex<BTreeSet<u32>>>,
}

impl Sampler {
    async fn run(mut self, interval: Duration, cancel: CancellationToken) -> Self {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => self.sample(),
            }
        }
        self.sample();
        self
    }

    fn sample(&mut self) {
        match self.probe.system() {
            Ok(counters) => {
                let snapshot = self.snapshot(&counters);
                self.prev = counters;
                self.samples.push_back(snapshot);
                while self.samples.len() > self.max_samples {
                    self.samples.pop_front();
                }
            }
            Err(e) => debug!(error = %e, "system sample failed"),
        }

        let pids: Vec<u32> = lock(&self.tracked).iter().copied().collect();
        for pid in pids {
            match self.probe.process(pid) {
                Ok(Some(counters)) => self.observe_process(pid, &counters),
                Ok(None) | Err(_) => {
                    lock(&self.tracked).remove(&pid);
                    if let Some(state) = self.processes.get_mut(&pid) {
                        state.metrics.exited = true;
                    }
                    debug!(pid, "tracked process gone");
                }
            }
        }
    }

    fn snapshot(&self, counters: &SystemCounters) -> ResourceSnapshot {
        let busy = counters.cpu_busy.saturating_sub(self.prev.cpu_busy);
        let total = counters.cpu_total.saturating_sub(self.prev.cpu_total);
        let cpu_percent = if total > 0 {
            (busy as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };
        let memory_used = counters.memory_total.saturating_sub(counters.memory_available);
        let memory_percent = if counters.memory_total > 0 {
            memory_used as f64 / counters.memory_total as f64 * 100.0
        } else {
            0.0
        };

        ResourceSnapshot {
            timestamp: Utc::now(),
            elapsed_secs: self.start.elapsed().as_secs_f64(),
            cpu_percent,
            memory_used,
            memory_available: counters.memory_available,
            memory_percent,
            disk_read_bytes: counters.disk_read_bytes.saturating_sub(self.baseline.disk_read_bytes),
            disk_write_bytes: counters.disk_write_bytes.saturating_sub(self.baseline.disk_write_bytes),
            net_rx_bytes: counters.net_rx_bytes.saturating_sub(self.baseline.net_rx_bytes),
            net_tx_bytes: counters.net_tx_bytes.saturating_sub(self.baseline.net_tx_bytes),
            process_count: counters.process_count,
            load_1: counters.load[0],
            load_5: counters.load[1],
            load_15: counters.load[2],
        }
    }

    fn observe_process(&mut self, pid: u32, counters: &crate::probe::ProcessCounters) {
        let now = Instant::now();
        let state = self.processes.entry(pid).or_insert_with(|| ProcessState {
            prev_cpu_seconds: counters.cpu_seconds,
            prev_at: now,
            cpu_sum: 0.0,
            rate_samples: 0,
            metrics: ProcessMetrics {
                pid,
                ..ProcessMetrics::default()
            },
        });

        let elapsed = now.duration_since(state.prev_at).as_secs_f64();
        if elapsed > 0.0 {
            let cpu = ((counters.cpu_seconds - state.prev_cpu_seconds) / elapsed * 100.0).max(0.0);
            state.cpu_sum += cpu;
            state.rate_samples += 1;
            state.metrics.peak_cpu_percent = state.metrics.peak_cpu_percent.max(cpu);
            state.metrics.avg_cpu_percent = state.cpu_sum / state.rate_samples as f64;
        }
        state.prev_cpu_seconds = counters.cpu_seconds;
        state.prev_at = now;

        let metrics = &mut state.metrics;
        metrics.samples += 1;
        metrics.peak_rss_bytes = metrics.peak_rss_bytes.max(counters.rss_bytes);
        metrics.peak_vsz_bytes = metrics.peak_vsz_bytes.max(counters.vsz_bytes);
        metrics.max_threads = metrics.max_threads.max(counters.threads);
        metrics.max_open_fds = metrics.max_open_fds.max(counters.open_fds);
        metrics.read_bytes = counters.read_bytes;
        metrics.write_bytes = counters.write_bytes;
    }
}
