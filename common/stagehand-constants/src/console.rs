/// Sentinel printed by the guest payload once the test script returns.
///
/// Followed by `:` and the decimal exit code, e.g. `STAGEHAND_TEST_COMPLETE:0`.
pub const COMPLETION_MARKER: &str = "STAGEHAND_TEST_COMPLETE";

/// Separator between the completion marker and the exit code.
pub const EXIT_CODE_SEPARATOR: char = ':';

/// Mount point of the artifact export disk inside the guest.
pub const GUEST_ARTIFACT_DIR: &str = "/artifacts";

/// Guest block device the artifact disk appears as (first virtio disk).
pub const GUEST_ARTIFACT_DEVICE: &str = "/dev/vda";

/// Command written to the emulator monitor to request a clean exit.
pub const MONITOR_QUIT: &str = "quit\n";
