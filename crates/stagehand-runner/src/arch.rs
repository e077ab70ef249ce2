//! Guest architectures and their emulator parameters.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Guest CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Architecture {
    /// 64-bit x86.
    #[serde(rename = "x86_64", alias = "amd64")]
    X86_64,
    /// 64-bit ARM.
    #[serde(rename = "aarch64", alias = "arm64")]
    Aarch64,
    /// 64-bit RISC-V.
    #[serde(rename = "riscv64")]
    Riscv64,
}

impl Architecture {
    /// Every supported architecture.
    pub const ALL: [Self; 3] = [Self::X86_64, Self::Aarch64, Self::Riscv64];

    /// Canonical name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Aarch64 => "aarch64",
            Self::Riscv64 => "riscv64",
        }
    }

    /// Emulator binary for this architecture.
    #[must_use]
    pub const fn emulator_binary(&self) -> &'static str {
        match self {
            Self::X86_64 => "qemu-system-x86_64",
            Self::Aarch64 => "qemu-system-aarch64",
            Self::Riscv64 => "qemu-system-riscv64",
        }
    }

    /// Machine and CPU flags.
    #[must_use]
    pub const fn machine_args(&self) -> &'static [&'static str] {
        match self {
            Self::X86_64 => &["-machine", "q35,accel=kvm:tcg", "-cpu", "max"],
            Self::Aarch64 => &["-machine", "virt", "-cpu", "max"],
            Self::Riscv64 => &["-machine", "virt", "-cpu", "rv64"],
        }
    }

    /// Serial console device the kernel should write to.
    #[must_use]
    pub const fn console_device(&self) -> &'static str {
        match self {
            Self::X86_64 | Self::Riscv64 => "ttyS0",
            Self::Aarch64 => "ttyAMA0",
        }
    }

    /// File name of the default kernel in the boot image directory.
    #[must_use]
    pub const fn default_kernel_name(&self) -> &'static str {
        match self {
            Self::X86_64 => "vmlinuz-x86_64",
            Self::Aarch64 => "Image-aarch64",
            Self::Riscv64 => "Image-riscv64",
        }
    }

    /// Architecture of the host running this process, if supported.
    #[must_use]
    pub fn host() -> Option<Self> {
        std::env::consts::ARCH.parse().ok()
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "x86_64" | "amd64" | "x86-64" => Ok(Self::X86_64),
            "aarch64" | "arm64" => Ok(Self::Aarch64),
            "riscv64" | "riscv64gc" => Ok(Self::Riscv64),
            other => Err(format!("unknown architecture: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("amd64".parse::<Architecture>().unwrap(), Architecture::X86_64);
        assert_eq!("ARM64".parse::<Architecture>().unwrap(), Architecture::Aarch64);
        assert!("mips".parse::<Architecture>().is_err());
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&Architecture::X86_64).unwrap(), "\"x86_64\"");
        let arch: Architecture = serde_json::from_str("\"arm64\"").unwrap();
        assert_eq!(arch, Architecture::Aarch64);
    }

    #[test]
    fn test_console_devices() {
        assert_eq!(Architecture::Aarch64.console_device(), "ttyAMA0");
        assert_eq!(Architecture::X86_64.emulator_binary(), "qemu-system-x86_64");
    }
}
