//! Test execution inside a disposable guest.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use stagehand_artifact::{ArtifactBundle, ArtifactCategory};
use stagehand_constants::console::{GUEST_ARTIFACT_DIR, MONITOR_QUIT};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::case::TestCase;
use crate::config::RunnerConfig;
use crate::console::{classify, ConsoleBuffer, ConsoleChunk, RunEnd, Stream};
use crate::disk;
use crate::error::{Result, RunnerError};
use crate::initramfs::{self, InitImage};
use crate::launcher::{EmulatorLauncher, LaunchSpec};
use crate::result::{FailureInfo, FailureKind, TestResult, TestStatus};
use crate::script::{render_init, TEST_SCRIPT_PATH};
use crate::workarea::WorkArea;

const READ_BUFFER_SIZE: usize = 4096;

/// Notified when the emulator process starts and exits.
pub trait ProcessObserver: Send + Sync {
    /// Called right after spawn.
    fn process_started(&self, test_id: &str, pid: u32);

    /// Called once the process has been reaped.
    fn process_exited(&self, test_id: &str, pid: u32) {
        let _ = (test_id, pid);
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Boots one guest per test and classifies the outcome.
pub struct TestRunner {
    launcher: Arc<dyn EmulatorLauncher>,
    config: RunnerConfig,
}

impl TestRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(launcher: Arc<dyn EmulatorLauncher>, config: RunnerConfig) -> Self {
        Self { launcher, config }
    }

    /// Runner configuration.
    #[must_use]
    pub const fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Rejects tests this runner cannot host. Returns the guest memory to use.
    ///
    /// # Errors
    ///
    /// Returns a capability rejection.
    pub fn check_capabilities(&self, case: &TestCase) -> Result<u64> {
        let target = &case.target;
        if !target.is_virtual {
            return Err(RunnerError::NotVirtual(target.environment_id.clone()));
        }
        if !self.config.architectures.contains(&target.architecture) {
            return Err(RunnerError::UnsupportedArchitecture(target.architecture));
        }
        let memory_mb = if target.memory_mb == 0 {
            self.config.memory_mb
        } else {
            target.memory_mb
        };
        if memory_mb > self.config.memory_ceiling_mb {
            return Err(RunnerError::MemoryCeiling {
                requested_mb: memory_mb,
                ceiling_mb: self.config.memory_ceiling_mb,
            });
        }
        Ok(memory_mb)
    }

    /// Runs `case` without cancellation or observer.
    ///
    /// # Errors
    ///
    /// See [`TestRunner::execute`].
    pub async fn run(&self, case: &TestCase) -> Result<TestResult> {
        self.execute(case, &CancellationToken::new(), None).await
    }

    /// Runs `case` in a fresh guest.
    ///
    /// Capability rejections and output directory failures are errors.
    /// Everything after that, including setup and boot failures, is reported
    /// in the returned result. The emulator, reader tasks and work area are
    /// released on every path.
    ///
    /// # Errors
    ///
    /// Returns an error if the test is rejected or no output directory can
    /// be created.
    pub async fn execute(
        &self,
        case: &TestCase,
        cancel: &CancellationToken,
        observer: Option<&dyn ProcessObserver>,
    ) -> Result<TestResult> {
        let memory_mb = self.check_capabilities(case)?;

        let run_id = Uuid::new_v4().to_string();
        let run = RunContext {
            output_dir: self.config.output_dir.join(&case.id).join(&run_id),
            run_id,
            started_at: Utc::now(),
            start: Instant::now(),
        };
        tokio::fs::create_dir_all(&run.output_dir).await?;

        info!(
            test_id = %case.id,
            run_id = %run.run_id,
            arch = %case.target.architecture,
            timeout_secs = case.timeout_secs,
            launcher = self.launcher.name(),
            "starting test"
        );

        let work = match WorkArea::new(&self.config.work_dir, &case.id) {
            Ok(work) => work,
            Err(e) => return Ok(run.setup_failure(case, format!("cannot create work area: {e}"))),
        };

        let result = match self.prepare(case, &work, memory_mb).await {
            Ok(spec) => self.boot(case, &spec, &run, cancel, observer).await,
            Err(e) => {
                warn!(test_id = %case.id, error = %e, "test setup failed");
                run.setup_failure(case, e.to_string())
            }
        };

        if let Err(e) = work.close() {
            warn!(test_id = %case.id, error = %e, "failed to remove work area");
        }

        info!(
            test_id = %case.id,
            run_id = %result.run_id,
            status = %result.status,
            exit_code = ?result.exit_code,
            duration_secs = result.duration_secs,
            "test finished"
        );
        Ok(result)
    }

    /// Builds the init image and optional disk, and resolves the kernel.
    async fn prepare(&self, case: &TestCase, work: &WorkArea, memory_mb: u64) -> Result<LaunchSpec> {
        let arch = case.target.architecture;
        let kernel = self.config.kernel_for(arch);
        if !tokio::fs::try_exists(&kernel).await.unwrap_or(false) {
            return Err(RunnerError::BootImage(kernel.display().to_string()));
        }

        let base = match &self.config.base_initramfs {
            Some(path) => Some(
                tokio::fs::read(path)
                    .await
                    .map_err(|e| RunnerError::BootImage(format!("{}: {e}", path.display())))?,
            ),
            None => None,
        };

        let mut image = InitImage::new();
        for dir in ["/proc", "/sys", "/dev", "/tmp", GUEST_ARTIFACT_DIR] {
            image.add_dir(dir, 0o755);
        }
        image.add_file("/init", render_init(case), 0o755);
        image.add_file(TEST_SCRIPT_PATH, case.script.as_bytes(), 0o755);
        for file in &case.files {
            image.add_file(&file.path, file.content.clone(), file.mode);
        }
        let payload = image
            .to_gzip()
            .map_err(|e| RunnerError::Image(format!("init image compression: {e}")))?;
        let initrd = work.join("initrd.img");
        tokio::fs::write(&initrd, initramfs::assemble(base.as_deref(), &payload)).await?;

        let disk = if case.export_artifacts {
            let path = work.join("artifacts.img");
            let formatted = disk::create_artifact_disk(&path, self.config.artifact_disk_mb).await?;
            if !formatted {
                warn!(test_id = %case.id, "running without an export disk");
                let _ = tokio::fs::remove_file(&path).await;
            }
            formatted.then_some(path)
        } else {
            None
        };

        debug!(
            test_id = %case.id,
            kernel = %kernel.display(),
            entries = image.len(),
            export = case.export_artifacts,
            "guest prepared"
        );

        Ok(LaunchSpec {
            test_id: case.id.clone(),
            arch,
            kernel,
            initrd,
            disk,
            memory_mb,
            monitor_socket: work.join("monitor.sock"),
            extra_append: Vec::new(),
        })
    }

    /// Spawns the emulator and drives it to a classified result.
    async fn boot(
        &self,
        case: &TestCase,
        spec: &LaunchSpec,
        run: &RunContext,
        cancel: &CancellationToken,
        observer: Option<&dyn ProcessObserver>,
    ) -> TestResult {
        let mut cmd = self.launcher.command(spec);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                let e = RunnerError::Spawn {
                    binary: self.launcher.name().to_string(),
                    source,
                };
                warn!(test_id = %case.id, error = %e, "emulator spawn failed");
                return run.setup_failure(case, e.to_string());
            }
        };
        let pid = child.id();
        if let (Some(observer), Some(pid)) = (observer, pid) {
            observer.process_started(&case.id, pid);
        }
        debug!(test_id = %case.id, pid = ?pid, "emulator started");

        let capacity = self.config.console_channel_capacity.max(1);
        let (tx, mut rx) = mpsc::channel(capacity);
        let mut readers = ReaderGuard::default();
        if let Some(stdout) = child.stdout.take() {
            readers.0.push(spawn_reader(stdout, Stream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.0.push(spawn_reader(stderr, Stream::Stderr, tx.clone()));
        }
        drop(tx);

        let deadline = Instant::now() + case.timeout();
        let mut console = ConsoleBuffer::new();
        let mut channel_open = true;

        let mut end = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break RunEnd::Cancelled,
                () = tokio::time::sleep_until(deadline) => break RunEnd::TimedOut,
                chunk = rx.recv(), if channel_open => match chunk {
                    Some(chunk) => {
                        console.push(&chunk);
                        if let Some(code) = console.completion() {
                            break RunEnd::Completed(code);
                        }
                    }
                    None => channel_open = false,
                },
                status = child.wait() => break RunEnd::Exited(status_code(status)),
            }
        };

        match &end {
            RunEnd::TimedOut => {
                warn!(test_id = %case.id, timeout_secs = case.timeout_secs, "test timed out");
            }
            RunEnd::Cancelled => info!(test_id = %case.id, "test cancelled"),
            RunEnd::Completed(code) => debug!(test_id = %case.id, exit_code = code, "completion marker seen"),
            RunEnd::Exited(code) => debug!(test_id = %case.id, exit_code = ?code, "emulator exited"),
        }

        let monitor = self.launcher.has_monitor().then_some(spec.monitor_socket.as_path());
        let shutdown_started = Instant::now();
        let emulator_code = self.shutdown(&mut child, &end, monitor).await;
        if let (Some(observer), Some(pid)) = (observer, pid) {
            observer.process_exited(&case.id, pid);
        }

        // Console collection shares the grace window with shutdown.
        let drain_budget = self
            .config
            .grace_period()
            .saturating_sub(shutdown_started.elapsed());
        drain(&mut rx, &mut console, drain_budget).await;
        drop(readers);
        console.finish();

        if let RunEnd::Exited(code) = end {
            end = console
                .completion()
                .map_or(RunEnd::Exited(code.or(emulator_code)), RunEnd::Completed);
        }

        let mut artifacts = ArtifactBundle::default();
        let console_log = run.output_dir.join("console.log");
        match tokio::fs::write(&console_log, console.transcript()).await {
            Ok(()) => artifacts.push(ArtifactCategory::Log, console_log),
            Err(e) => warn!(test_id = %case.id, error = %e, "failed to write console log"),
        }
        if let Some(image) = &spec.disk {
            let exported = disk::extract_artifacts(image, &run.output_dir.join("exported")).await;
            for (category, path) in exported.iter() {
                artifacts.push(category, path.clone());
            }
        }

        let (status, exit_code, failure) = classify(&end, console.transcript());
        if let Some(failure) = &failure {
            if failure.kernel_panic {
                warn!(test_id = %case.id, signature = ?failure.signature, "guest crash detected");
            }
        }

        TestResult {
            test_id: case.id.clone(),
            run_id: run.run_id.clone(),
            status,
            stdout: console.stdout().to_string(),
            stderr: console.stderr().to_string(),
            exit_code,
            duration_secs: run.start.elapsed().as_secs_f64(),
            started_at: run.started_at,
            artifacts,
            failure,
            output_dir: Some(run.output_dir.clone()),
        }
    }

    /// Stops the emulator. Returns its exit code if it exited normally.
    ///
    /// After the completion marker the guest powers itself off, so it gets a
    /// full grace window first. Otherwise the grace window is split between
    /// the monitor `quit` request and SIGTERM before SIGKILL.
    async fn shutdown(&self, child: &mut Child, end: &RunEnd, monitor: Option<&Path>) -> Option<i32> {
        let grace = self.config.grace_period();

        if let Ok(Some(status)) = child.try_wait() {
            return status.code();
        }
        if matches!(end, RunEnd::Completed(_)) {
            if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
                return status_code(status);
            }
        }

        let step = grace / 2;
        if let Some(socket) = monitor {
            if request_quit(socket).await {
                if let Ok(status) = tokio::time::timeout(step, child.wait()).await {
                    return status_code(status);
                }
            }
        }

        terminate_process_group(child, step).await;
        None
    }
}

struct RunContext {
    run_id: String,
    started_at: DateTime<Utc>,
    start: Instant,
    output_dir: PathBuf,
}

impl RunContext {
    fn setup_failure(&self, case: &TestCase, message: String) -> TestResult {
        TestResult {
            test_id: case.id.clone(),
            run_id: self.run_id.clone(),
            status: TestStatus::Error,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            duration_secs: self.start.elapsed().as_secs_f64(),
            started_at: self.started_at,
            artifacts: ArtifactBundle::default(),
            failure: Some(FailureInfo::new(FailureKind::Setup, message)),
            output_dir: Some(self.output_dir.clone()),
        }
    }
}

// ============================================================================
// Console readers
// ============================================================================

/// Aborts reader tasks on drop.
#[derive(Default)]
struct ReaderGuard(Vec<JoinHandle<()>>);

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

fn spawn_reader<R>(mut reader: R, stream: Stream, tx: mpsc::Sender<ConsoleChunk>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = ConsoleChunk {
                        stream,
                        data: buf[..n].to_vec(),
                    };
                    if tx.send(chunk).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(?stream, error = %e, "console read failed");
                    break;
                }
            }
        }
    })
}

/// Collects console output still in flight, for at most `budget`.
/// Chunks already queued are kept even when the budget is spent.
async fn drain(rx: &mut mpsc::Receiver<ConsoleChunk>, console: &mut ConsoleBuffer, budget: Duration) {
    let collect = async {
        while let Some(chunk) = rx.recv().await {
            console.push(&chunk);
        }
    };
    if tokio::time::timeout(budget, collect).await.is_err() {
        while let Ok(chunk) = rx.try_recv() {
            console.push(&chunk);
        }
        debug!(budget_ms = budget.as_millis(), "console drain cut short");
    }
}

// ============================================================================
// Process teardown
// ============================================================================

fn status_code(status: std::io::Result<ExitStatus>) -> Option<i32> {
    match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(error = %e, "failed to wait for emulator");
            None
        }
    }
}

#[cfg(unix)]
async fn request_quit(socket: &Path) -> bool {
    use tokio::io::AsyncWriteExt;

    match tokio::net::UnixStream::connect(socket).await {
        Ok(mut stream) => match stream.write_all(MONITOR_QUIT.as_bytes()).await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "monitor quit failed");
                false
            }
        },
        Err(e) => {
            debug!(socket = %socket.display(), error = %e, "monitor unavailable");
            false
        }
    }
}

#[cfg(not(unix))]
async fn request_quit(_socket: &Path) -> bool {
    false
}

/// SIGTERM to the process group, wait `grace`, then SIGKILL and reap.
#[cfg(unix)]
async fn terminate_process_group(child: &mut Child, grace: Duration) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        let _ = child.wait().await;
        return;
    };
    let pgid = Pid::from_raw(pid);

    if let Err(e) = killpg(pgid, Signal::SIGTERM) {
        if e != Errno::ESRCH {
            warn!(pid, error = ?e, "SIGTERM to emulator process group failed");
        }
    }
    if tokio::time::timeout(grace, child.wait()).await.is_ok() {
        return;
    }

    warn!(pid, "emulator ignored SIGTERM, killing");
    if let Err(e) = killpg(pgid, Signal::SIGKILL) {
        if e != Errno::ESRCH {
            warn!(pid, error = ?e, "SIGKILL to emulator process group failed");
        }
    }
    let _ = child.wait().await;
}

#[cfg(not(unix))]
async fn terminate_process_group(child: &mut Child, _grace: Duration) {
    let _ = child.kill().await;
}
