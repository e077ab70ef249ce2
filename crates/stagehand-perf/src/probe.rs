//! Host resource probes.
//!
//! A probe returns raw cumulative counters; the monitor turns them into
//! rates and percentages.

use std::io;

use serde::{Deserialize, Serialize};

/// Cumulative host counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemCounters {
    /// Busy CPU ticks across all cores.
    pub cpu_busy: u64,
    /// Total CPU ticks across all cores.
    pub cpu_total: u64,
    /// Physical memory in bytes.
    pub memory_total: u64,
    /// Available memory in bytes.
    pub memory_available: u64,
    /// Bytes read from physical disks.
    pub disk_read_bytes: u64,
    /// Bytes written to physical disks.
    pub disk_write_bytes: u64,
    /// Bytes received on non-loopback interfaces.
    pub net_rx_bytes: u64,
    /// Bytes sent on non-loopback interfaces.
    pub net_tx_bytes: u64,
    /// Processes on the host.
    pub process_count: u64,
    /// 1, 5 and 15 minute load averages.
    pub load: [f64; 3],
}

/// Cumulative counters of one process.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessCounters {
    /// User plus system CPU time in seconds.
    pub cpu_seconds: f64,
    /// Resident set size in bytes.
    pub rss_bytes: u64,
    /// Virtual size in bytes.
    pub vsz_bytes: u64,
    /// Threads.
    pub threads: u64,
    /// Open file descriptors.
    pub open_fds: u64,
    /// Bytes read from storage.
    pub read_bytes: u64,
    /// Bytes written to storage.
    pub write_bytes: u64,
}

/// Host characteristics captured with each metrics record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    /// CPU architecture.
    pub architecture: String,
    /// Operating system.
    pub os: String,
    /// Online CPU cores.
    pub cpu_count: u64,
    /// Physical memory in bytes.
    pub memory_total: u64,
}

/// Source of resource counters.
pub trait ResourceProbe: Send + Sync {
    /// Host-wide counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the counters cannot be read.
    fn system(&self) -> io::Result<SystemCounters>;

    /// Counters of `pid`, or `None` if it no longer exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the process exists but cannot be read.
    fn process(&self, pid: u32) -> io::Result<Option<ProcessCounters>>;

    /// Host characteristics.
    fn host(&self) -> HostInfo;
}

/// Probe backed by `/proc` and libc. Reports zeros on hosts without `/proc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcProbe;

impl ProcProbe {
    /// Creates the probe.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ResourceProbe for ProcProbe {
    #[cfg(target_os = "linux")]
    fn system(&self) -> io::Result<SystemCounters> {
        use std::fs;

        let (cpu_busy, cpu_total) = fs::read_to_string("/proc/stat")?
            .lines()
            .find(|line| line.starts_with("cpu "))
            .map_or((0, 0), parse_cpu_line);
        let (memory_total, memory_available) = parse_meminfo(&fs::read_to_string("/proc/meminfo")?);
        let (disk_read_bytes, disk_write_bytes) =
            fs::read_to_string("/proc/diskstats").map_or((0, 0), |s| parse_diskstats(&s));
        let (net_rx_bytes, net_tx_bytes) =
            fs::read_to_string("/proc/net/dev").map_or((0, 0), |s| parse_net_dev(&s));
        let process_count = fs::read_to_string("/proc/loadavg").map_or(0, |s| parse_process_count(&s));

        Ok(SystemCounters {
            cpu_busy,
            cpu_total,
            memory_total,
            memory_available,
            disk_read_bytes,
            disk_write_bytes,
            net_rx_bytes,
            net_tx_bytes,
            process_count,
            load: load_average(),
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn system(&self) -> io::Result<SystemCounters> {
        Ok(SystemCounters {
            load: load_average(),
            ..SystemCounters::default()
        })
    }

    #[cfg(target_os = "linux")]
    fn process(&self, pid: u32) -> io::Result<Option<ProcessCounters>> {
        use std::fs;

        let base = std::path::PathBuf::from(format!("/proc/{pid}"));
        let stat = match fs::read_to_string(base.join("stat")) {
            Ok(stat) => stat,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let Some((ticks, vsz_bytes, threads)) = parse_pid_stat(&stat) else {
            return Ok(None);
        };
        let rss_bytes = fs::read_to_string(base.join("status")).map_or(0, |s| parse_vm_rss(&s));
        let (read_bytes, write_bytes) = fs::read_to_string(base.join("io")).map_or((0, 0), |s| parse_pid_io(&s));
        let open_fds = fs::read_dir(base.join("fd")).map_or(0, |entries| entries.count() as u64);

        #[allow(clippy::cast_precision_loss)]
        let cpu_seconds = ticks as f64 / clock_ticks_per_second();

        Ok(Some(ProcessCounters {
            cpu_seconds,
            rss_bytes,
            vsz_bytes,
            threads,
            open_fds,
            read_bytes,
            write_bytes,
        }))
    }

    #[cfg(not(target_os = "linux"))]
    fn process(&self, _pid: u32) -> io::Result<Option<ProcessCounters>> {
        Ok(Some(ProcessCounters::default()))
    }

    fn host(&self) -> HostInfo {
        HostInfo {
            architecture: std::env::consts::ARCH.to_string(),
            os: std::env::consts::OS.to_string(),
            cpu_count: cpu_count(),
            memory_total: self.system().map_or(0, |c| c.memory_total),
        }
    }
}

fn load_average() -> [f64; 3] {
    let mut load = [0.0f64; 3];
    #[cfg(unix)]
    {
        // SAFETY: the buffer holds exactly the three values requested.
        let n = unsafe { libc::getloadavg(load.as_mut_ptr(), 3) };
        if n != 3 {
            load = [0.0; 3];
        }
    }
    load
}

fn cpu_count() -> u64 {
    #[cfg(unix)]
    {
        // SAFETY: sysconf has no preconditions.
        let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        if n > 0 {
            return n.unsigned_abs() as u64;
        }
    }
    std::thread::available_parallelism().map_or(1, |n| n.get() as u64)
}

#[cfg(target_os = "linux")]
#[allow(clippy::cast_precision_loss)]
fn clock_ticks_per_second() -> f64 {
    // SAFETY: sysconf has no preconditions.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as f64
    } else {
        100.0
    }
}

// ============================================================================
// /proc parsers
// ============================================================================

/// Parses the aggregate `cpu` line of `/proc/stat` into (busy, total) ticks.
fn parse_cpu_line(line: &str) -> (u64, u64) {
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|s| s.parse().ok())
        .collect();
    if fields.len() < 4 {
        return (0, 0);
    }
    // user nice system idle iowait irq softirq steal
    let total: u64 = fields.iter().take(8).sum();
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    (total.saturating_sub(idle), total)
}

/// Returns (`MemTotal`, `MemAvailable`) in bytes.
fn parse_meminfo(meminfo: &str) -> (u64, u64) {
    let mut total = 0;
    let mut available = 0;
    for line in meminfo.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let bytes = value.parse::<u64>().unwrap_or(0) * 1024;
        match key {
            "MemTotal:" => total = bytes,
            "MemAvailable:" => available = bytes,
            _ => {}
        }
    }
    (total, available)
}

fn is_physical_disk(name: &str) -> bool {
    let whole_sd = name.starts_with("sd") && !name.ends_with(|c: char| c.is_ascii_digit());
    let whole_nvme = name.starts_with("nvme") && !name.contains('p');
    let whole_vd = (name.starts_with("vd") || name.starts_with("hd") || name.starts_with("xvd"))
        && !name.ends_with(|c: char| c.is_ascii_digit());
    whole_sd || whole_nvme || whole_vd
}

/// Returns bytes (read, written) across whole physical disks.
fn parse_diskstats(diskstats: &str) -> (u64, u64) {
    let mut read = 0;
    let mut written = 0;
    for line in diskstats.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 10 || !is_physical_disk(parts[2]) {
            continue;
        }
        read += parts[5].parse::<u64>().unwrap_or(0) * 512;
        written += parts[9].parse::<u64>().unwrap_or(0) * 512;
    }
    (read, written)
}

/// Returns bytes (received, sent) across non-loopback interfaces.
fn parse_net_dev(netdev: &str) -> (u64, u64) {
    let mut rx = 0;
    let mut tx = 0;
    for line in netdev.lines().skip(2) {
        let Some((iface, counters)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            continue;
        }
        let fields: Vec<u64> = counters
            .split_whitespace()
            .filter_map(|s| s.parse().ok())
            .collect();
        if fields.len() >= 9 {
            rx += fields[0];
            tx += fields[8];
        }
    }
    (rx, tx)
}

/// Total process count from `/proc/loadavg` (`0.1 0.2 0.3 2/345 6789`).
fn parse_process_count(loadavg: &str) -> u64 {
    loadavg
        .split_whitespace()
        .nth(3)
        .and_then(|field| field.split_once('/'))
        .and_then(|(_, total)| total.parse().ok())
        .unwrap_or(0)
}

/// Returns (utime + stime ticks, vsize bytes, threads) from `/proc/<pid>/stat`.
fn parse_pid_stat(stat: &str) -> Option<(u64, u64, u64)> {
    // The command name may contain spaces; fields resume after the last ')'.
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // fields[0] is the state (field 3 of the full line).
    let field = |n: usize| fields.get(n - 3).and_then(|s| s.parse::<u64>().ok());
    Some((field(14)? + field(15)?, field(23)?, field(20)?))
}

fn parse_vm_rss(status: &str) -> u64 {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map_or(0, |kb| kb * 1024)
}

fn parse_pid_io(io: &str) -> (u64, u64) {
    let mut read = 0;
    let mut written = 0;
    for line in io.lines() {
        if let Some(value) = line.strip_prefix("read_bytes:") {
            read = value.trim().parse().unwrap_or(0);
        } else if let Some(value) = line.strip_prefix("write_bytes:") {
            written = value.trim().parse().unwrap_or(0);
        }
    }
    (read, written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_line() {
        let (busy, total) = parse_cpu_line("cpu  100 0 50 800 50 0 0 0 0 0");
        assert_eq!(total, 1000);
        assert_eq!(busy, 150);
    }

    #[test]
    fn test_parse_meminfo() {
        let meminfo = "MemTotal:       16384 kB\nMemFree:         1024 kB\nMemAvailable:    8192 kB\n";
        assert_eq!(parse_meminfo(meminfo), (16384 * 1024, 8192 * 1024));
    }

    #[test]
    fn test_parse_diskstats_skips_partitions() {
        let stats = "\
   8       0 sda 100 0 2000 0 50 0 4000 0 0 0 0
   8       1 sda1 90 0 1800 0 40 0 3000 0 0 0 0
 259       0 nvme0n1 10 0 20 0 5 0 40 0 0 0 0
 259       1 nvme0n1p1 10 0 20 0 5 0 40 0 0 0 0
   7       0 loop0 1 0 8 0 0 0 0 0 0 0 0";
        assert_eq!(parse_diskstats(stats), (2020 * 512, 4040 * 512));
    }

    #[test]
    fn test_parse_net_dev() {
        let netdev = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 5000 10 0 0 0 0 0 0 5000 10 0 0 0 0 0 0
  eth0:1000 5 0 0 0 0 0 0 300 3 0 0 0 0 0 0";
        assert_eq!(parse_net_dev(netdev), (1000, 300));
    }

    #[test]
    fn test_parse_pid_stat_with_spaces_in_name() {
        let stat = "1234 (qemu system) S 1 1234 1234 0 -1 4194560 500 0 0 0 70 30 0 0 20 0 4 0 100 1048576 256 18446744073709551615";
        assert_eq!(parse_pid_stat(stat), Some((100, 1_048_576, 4)));
    }

    #[test]
    fn test_parse_status_and_io() {
        assert_eq!(parse_vm_rss("Name:\tqemu\nVmRSS:\t  2048 kB\n"), 2048 * 1024);
        assert_eq!(parse_pid_io("rchar: 1\nread_bytes: 4096\nwrite_bytes: 512\n"), (4096, 512));
        assert_eq!(parse_process_count("0.52 0.58 0.59 3/467 12345"), 467);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_proc_probe_reads_self() {
        let probe = ProcProbe::new();
        let system = probe.system().unwrap();
        assert!(system.memory_total > 0);
        assert!(system.cpu_total > 0);
        let me = probe.process(std::process::id()).unwrap().unwrap();
        assert!(me.threads >= 1);
        assert!(me.rss_bytes > 0);
        assert!(probe.host().cpu_count >= 1);
    }
}
