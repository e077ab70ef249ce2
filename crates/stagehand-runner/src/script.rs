//! Guest init script rendering.

use std::fmt::Write;

use stagehand_constants::console::{COMPLETION_MARKER, EXIT_CODE_SEPARATOR, GUEST_ARTIFACT_DEVICE, GUEST_ARTIFACT_DIR};

use crate::case::TestCase;

/// Guest path of the test body.
pub const TEST_SCRIPT_PATH: &str = "/stagehand/test.sh";

/// Quotes a value for POSIX `sh`.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn is_valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Renders `/init`: mount pseudo filesystems, optionally mount the artifact
/// disk, run the test body, print the completion marker, power off.
#[must_use]
pub fn render_init(case: &TestCase) -> String {
    let mut script = String::from("#!/bin/sh\n");
    script.push_str("mount -t proc proc /proc 2>/dev/null\n");
    script.push_str("mount -t sysfs sysfs /sys 2>/dev/null\n");
    script.push_str("mount -t devtmpfs devtmpfs /dev 2>/dev/null\n");
    script.push_str("mkdir -p /tmp\n");

    if case.export_artifacts {
        let _ = writeln!(script, "mkdir -p {GUEST_ARTIFACT_DIR}");
        let _ = writeln!(
            script,
            "mount -t ext4 {GUEST_ARTIFACT_DEVICE} {GUEST_ARTIFACT_DIR} || echo 'stagehand: artifact disk unavailable'"
        );
        let _ = writeln!(script, "export STAGEHAND_ARTIFACT_DIR={GUEST_ARTIFACT_DIR}");
    }

    let _ = writeln!(script, "export STAGEHAND_TEST_ID={}", shell_quote(&case.id));
    for (key, value) in &case.env {
        if is_valid_env_name(key) {
            let _ = writeln!(script, "export {key}={}", shell_quote(value));
        }
    }

    let _ = writeln!(script, "cd /tmp");
    let _ = writeln!(script, "/bin/sh {TEST_SCRIPT_PATH}");
    script.push_str("rc=$?\n");
    script.push_str("cd /\n");
    script.push_str("sync\n");
    if case.export_artifacts {
        let _ = writeln!(script, "umount {GUEST_ARTIFACT_DIR} 2>/dev/null");
    }
    let _ = writeln!(script, "echo \"{COMPLETION_MARKER}{EXIT_CODE_SEPARATOR}$rc\"");
    script.push_str("poweroff -f 2>/dev/null || echo o > /proc/sysrq-trigger\n");
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Architecture;

    #[test]
    fn test_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_render_init() {
        let case = TestCase::new("t", "echo hi", Architecture::X86_64)
            .with_env("MODE", "fast path")
            .with_env("bad-name", "ignored")
            .with_artifact_export();
        let init = render_init(&case);

        assert!(init.starts_with("#!/bin/sh\n"));
        assert!(init.contains("export MODE='fast path'"));
        assert!(!init.contains("bad-name"));
        assert!(init.contains("mount -t ext4 /dev/vda /artifacts"));
        assert!(init.contains("echo \"STAGEHAND_TEST_COMPLETE:$rc\""));
        let run = init.find("/bin/sh /stagehand/test.sh").unwrap();
        let marker = init.find("STAGEHAND_TEST_COMPLETE").unwrap();
        assert!(run < marker);
    }
}
