//! Emulator command construction.

use std::path::PathBuf;
use std::process::Stdio;

use stagehand_constants::cmdline::{CONSOLE_KEY, OOPS_PANIC, PANIC_REBOOT, RDINIT, ROOT_RW, TEST_ID_KEY};
use tokio::process::Command;

use crate::arch::Architecture;

/// Everything needed to boot one guest.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Test id, passed on the kernel command line.
    pub test_id: String,
    /// Guest architecture.
    pub arch: Architecture,
    /// Kernel image.
    pub kernel: PathBuf,
    /// Init image (base initramfs plus payload).
    pub initrd: PathBuf,
    /// Optional artifact export disk.
    pub disk: Option<PathBuf>,
    /// Guest memory in MiB.
    pub memory_mb: u64,
    /// Monitor socket path.
    pub monitor_socket: PathBuf,
    /// Extra kernel command line tokens.
    pub extra_append: Vec<String>,
}

impl LaunchSpec {
    /// Full kernel command line.
    #[must_use]
    pub fn kernel_cmdline(&self) -> String {
        let mut tokens = vec![
            format!("{CONSOLE_KEY}{}", self.arch.console_device()),
            RDINIT.to_string(),
            PANIC_REBOOT.to_string(),
            OOPS_PANIC.to_string(),
            ROOT_RW.to_string(),
            format!("{TEST_ID_KEY}{}", self.test_id),
        ];
        tokens.extend(self.extra_append.iter().cloned());
        tokens.join(" ")
    }
}

/// Builds the process that boots a guest.
///
/// The runner owns stdio, process group and `kill_on_drop`; implementations
/// only choose the program and its arguments.
pub trait EmulatorLauncher: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Builds the command for `spec`.
    fn command(&self, spec: &LaunchSpec) -> Command;

    /// True if the emulator exposes a monitor socket that accepts `quit`.
    fn has_monitor(&self) -> bool {
        true
    }
}

/// QEMU system emulator.
#[derive(Debug, Clone, Default)]
pub struct QemuLauncher {
    binary_override: Option<PathBuf>,
}

impl QemuLauncher {
    /// Creates a launcher using `qemu-system-<arch>` from `PATH`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            binary_override: None,
        }
    }

    /// Uses a specific emulator binary for every architecture.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary_override = Some(binary.into());
        self
    }

    /// Program for `arch`.
    #[must_use]
    pub fn program(&self, arch: Architecture) -> PathBuf {
        self.binary_override
            .clone()
            .unwrap_or_else(|| PathBuf::from(arch.emulator_binary()))
    }

    /// Argument vector for `spec`.
    #[must_use]
    pub fn args(&self, spec: &LaunchSpec) -> Vec<String> {
        let mut args: Vec<String> = ["-smp", "1", "-nographic", "-no-reboot"]
            .iter()
            .map(ToString::to_string)
            .collect();
        args.push("-m".into());
        args.push(spec.memory_mb.to_string());
        args.extend(spec.arch.machine_args().iter().map(ToString::to_string));
        args.push("-monitor".into());
        args.push(format!("unix:{},server,nowait", spec.monitor_socket.display()));
        args.push("-kernel".into());
        args.push(spec.kernel.display().to_string());
        args.push("-initrd".into());
        args.push(spec.initrd.display().to_string());
        if let Some(disk) = &spec.disk {
            args.push("-drive".into());
            args.push(format!("file={},format=raw,if=virtio", disk.display()));
        }
        args.push("-append".into());
        args.push(spec.kernel_cmdline());
        args
    }
}

impl EmulatorLauncher for QemuLauncher {
    fn name(&self) -> &str {
        "qemu"
    }

    fn command(&self, spec: &LaunchSpec) -> Command {
        let mut cmd = Command::new(self.program(spec.arch));
        cmd.args(self.args(spec)).stdin(Stdio::null());
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(disk: Option<PathBuf>) -> LaunchSpec {
        LaunchSpec {
            test_id: "t-1".into(),
            arch: Architecture::Aarch64,
            kernel: "/images/Image-aarch64".into(),
            initrd: "/work/initrd.img".into(),
            disk,
            memory_mb: 256,
            monitor_socket: "/work/monitor.sock".into(),
            extra_append: vec!["quiet".into()],
        }
    }

    #[test]
    fn test_qemu_args() {
        let launcher = QemuLauncher::new();
        let args = launcher.args(&spec(Some("/work/artifacts.img".into())));
        assert_eq!(&args[..4], &["-smp", "1", "-nographic", "-no-reboot"]);
        let joined = args.join(" ");
        assert!(joined.contains("-m 256"));
        assert!(joined.contains("-machine virt -cpu max"));
        assert!(joined.contains("-monitor unix:/work/monitor.sock,server,nowait"));
        assert!(joined.contains("-drive file=/work/artifacts.img,format=raw,if=virtio"));
        assert_eq!(
            args.last().unwrap(),
            "console=ttyAMA0 rdinit=/init panic=-1 oops=panic rw stagehand.test_id=t-1 quiet"
        );
        assert_eq!(launcher.program(Architecture::Aarch64), PathBuf::from("qemu-system-aarch64"));
    }

    #[test]
    fn test_no_drive_without_disk() {
        let args = QemuLauncher::new().with_binary("/opt/qemu").args(&spec(None));
        assert!(!args.iter().any(|a| a == "-drive"));
    }
}
