//! Runner integration tests against a shell stand-in for the emulator.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use stagehand_runner::{
    Architecture, EmulatorLauncher, FailureKind, LaunchSpec, ProcessObserver, RunnerConfig,
    RunnerError, TestCase, TestRunner, TestStatus,
};
use tempfile::TempDir;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Runs a fixed shell script in place of the emulator.
struct ShellLauncher {
    script: String,
    monitor: bool,
    specs: Mutex<Vec<LaunchSpec>>,
}

impl ShellLauncher {
    fn new(script: &str) -> Self {
        Self {
            script: script.to_string(),
            monitor: false,
            specs: Mutex::new(Vec::new()),
        }
    }
}

impl EmulatorLauncher for ShellLauncher {
    fn name(&self) -> &str {
        "sh"
    }

    fn command(&self, spec: &LaunchSpec) -> Command {
        self.specs.lock().unwrap().push(spec.clone());
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&self.script);
        cmd
    }

    fn has_monitor(&self) -> bool {
        self.monitor
    }
}

#[derive(Default)]
struct PidRecorder {
    started: Mutex<Vec<u32>>,
    exited: Mutex<Vec<u32>>,
}

impl ProcessObserver for PidRecorder {
    fn process_started(&self, _test_id: &str, pid: u32) {
        self.started.lock().unwrap().push(pid);
    }

    fn process_exited(&self, _test_id: &str, pid: u32) {
        self.exited.lock().unwrap().push(pid);
    }
}

fn config(dir: &TempDir) -> RunnerConfig {
    let images = dir.path().join("images");
    std::fs::create_dir_all(&images).unwrap();
    std::fs::write(images.join("vmlinuz-x86_64"), b"kernel").unwrap();
    RunnerConfig {
        boot_image_dir: images,
        work_dir: dir.path().join("work"),
        output_dir: dir.path().join("runs"),
        grace_period_ms: 1000,
        architectures: vec![Architecture::X86_64],
        ..RunnerConfig::default()
    }
}

fn runner(dir: &TempDir, launcher: ShellLauncher) -> (Arc<ShellLauncher>, TestRunner) {
    let launcher = Arc::new(launcher);
    let runner = TestRunner::new(launcher.clone(), config(dir));
    (launcher, runner)
}

fn case() -> TestCase {
    TestCase::new("smoke", "echo hi", Architecture::X86_64).with_timeout(Duration::from_secs(10))
}

#[tokio::test]
async fn test_zero_exit_passes() {
    let dir = tempfile::tempdir().unwrap();
    let (launcher, runner) = runner(&dir, ShellLauncher::new("echo booting; echo STAGEHAND_TEST_COMPLETE:0"));

    let result = runner.run(&case()).await.unwrap();
    assert_eq!(result.status, TestStatus::Passed);
    assert_eq!(result.exit_code, Some(0));
    assert!(result.failure.is_none());
    assert!(result.stdout.contains("booting"));

    let console_log = &result.artifacts.logs[0];
    assert!(std::fs::read_to_string(console_log).unwrap().contains("STAGEHAND_TEST_COMPLETE:0"));

    let spec = launcher.specs.lock().unwrap()[0].clone();
    assert_eq!(spec.memory_mb, 512);
    assert!(spec.disk.is_none());
    // Scratch directory is gone, output directory is kept.
    assert!(!spec.initrd.exists());
    assert!(result.output_dir.unwrap().exists());
}

#[tokio::test]
async fn test_nonzero_exit_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (_, runner) = runner(&dir, ShellLauncher::new("echo STAGEHAND_TEST_COMPLETE:3"));

    let result = runner.run(&case()).await.unwrap();
    assert_eq!(result.status, TestStatus::Failed);
    assert_eq!(result.exit_code, Some(3));
    assert_eq!(result.failure.unwrap().kind, FailureKind::NonZeroExit);
}

#[tokio::test]
async fn test_kernel_panic_overrides_zero_exit() {
    let dir = tempfile::tempdir().unwrap();
    let (_, runner) = runner(
        &dir,
        ShellLauncher::new("echo 'Kernel panic - not syncing: Fatal exception'; echo STAGEHAND_TEST_COMPLETE:0"),
    );

    let result = runner.run(&case()).await.unwrap();
    assert_eq!(result.status, TestStatus::Failed);
    assert!(result.kernel_panic());
    assert_eq!(result.exit_code, Some(0));
}

#[tokio::test]
async fn test_exit_without_marker_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let (_, runner) = runner(&dir, ShellLauncher::new("echo 'qemu: fatal' >&2; exit 1"));

    let result = runner.run(&case()).await.unwrap();
    assert_eq!(result.status, TestStatus::Error);
    assert_eq!(result.exit_code, Some(1));
    assert!(result.stderr.contains("qemu: fatal"));
    assert_eq!(result.failure.unwrap().kind, FailureKind::MissingCompletion);
}

#[tokio::test]
async fn test_boot_failure_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let (_, runner) = runner(&dir, ShellLauncher::new("echo 'Kernel: No working init found.'"));

    let result = runner.run(&case()).await.unwrap();
    assert_eq!(result.status, TestStatus::Error);
    assert_eq!(result.failure.unwrap().kind, FailureKind::BootFailure);
}

#[tokio::test]
async fn test_hung_guest_times_out_and_is_killed() {
    let dir = tempfile::tempdir().unwrap();
    let mut launcher = ShellLauncher::new("echo started; sleep 30");
    launcher.monitor = true;
    let (_, runner) = runner(&dir, launcher);
    let recorder = PidRecorder::default();
    let case = case().with_timeout(Duration::from_secs(1));

    let start = Instant::now();
    let result = runner
        .execute(&case, &CancellationToken::new(), Some(&recorder))
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(result.status, TestStatus::Timeout);
    assert!(result.stdout.contains("started"));
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(1) + runner.config().grace_period());

    let pid = recorder.started.lock().unwrap()[0];
    assert_eq!(*recorder.exited.lock().unwrap(), vec![pid]);
    let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(i32::try_from(pid).unwrap()), None);
    assert!(alive.is_err(), "emulator process still exists");
}

#[tokio::test]
async fn test_cancel_stops_run() {
    let dir = tempfile::tempdir().unwrap();
    let (_, runner) = runner(&dir, ShellLauncher::new("sleep 30"));
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let result = runner.execute(&case(), &token, None).await.unwrap();
    assert_eq!(result.status, TestStatus::Cancelled);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_marker_then_hang_still_passes() {
    let dir = tempfile::tempdir().unwrap();
    let (_, runner) = runner(&dir, ShellLauncher::new("echo STAGEHAND_TEST_COMPLETE:0; sleep 30"));

    let start = Instant::now();
    let result = runner.run(&case()).await.unwrap();
    assert_eq!(result.status, TestStatus::Passed);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_capability_rejections() {
    let dir = tempfile::tempdir().unwrap();
    let (launcher, runner) = runner(&dir, ShellLauncher::new("true"));

    let mut physical = case();
    physical.target.is_virtual = false;
    let err = runner.run(&physical).await.unwrap_err();
    assert!(matches!(err, RunnerError::NotVirtual(_)));

    let arm = TestCase::new("arm", "true", Architecture::Aarch64);
    let err = runner.run(&arm).await.unwrap_err();
    assert!(matches!(err, RunnerError::UnsupportedArchitecture(Architecture::Aarch64)));

    let mut big = case();
    big.target.memory_mb = 1024 * 1024;
    let err = runner.run(&big).await.unwrap_err();
    assert!(err.is_rejection());

    assert!(launcher.specs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_kernel_is_setup_error() {
    let dir = tempfile::tempdir().unwrap();
    let (launcher, runner) = runner(&dir, ShellLauncher::new("true"));
    std::fs::remove_file(dir.path().join("images/vmlinuz-x86_64")).unwrap();

    let result = runner.run(&case()).await.unwrap();
    assert_eq!(result.status, TestStatus::Error);
    assert_eq!(result.failure.unwrap().kind, FailureKind::Setup);
    assert!(launcher.specs.lock().unwrap().is_empty());
}
