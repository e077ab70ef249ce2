/// Kernel cmdline token that selects the injected init script.
pub const RDINIT: &str = "rdinit=/init";

/// Reboot immediately on panic so the emulator exits (paired with `-no-reboot`).
pub const PANIC_REBOOT: &str = "panic=-1";

/// Escalate oopses into panics.
pub const OOPS_PANIC: &str = "oops=panic";

/// Mount the root filesystem read-write.
pub const ROOT_RW: &str = "rw";

/// Kernel cmdline key for the console device.
pub const CONSOLE_KEY: &str = "console=";

/// Kernel cmdline key carrying the test id into the guest.
pub const TEST_ID_KEY: &str = "stagehand.test_id=";
