#[cfg(target_os = "linux")]
use std::fs;

/// Raw memory figures in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

impl MemoryUsage {
    pub fn used_mb(&self) -> u64 {
        (self.used_bytes as f64 / BYTES_PER_MB).round() as u64
    }

    pub fn total_mb(&self) -> u64 {
        (self.total_bytes as f64 / BYTES_PER_MB).round() as u64
    }

    /// `used / total * 100`, rounded to the nearest integer. Zero when total is unknown.
    pub fn percentage(&self) -> u32 {
        if self.total_bytes == 0 {
            return 0;
        }
        (self.used_bytes as f64 / self.total_bytes as f64 * 100.0).round() as u32
    }
}

/// Where the aggregator reads process memory from.
pub trait MemorySource: Send + Sync {
    fn sample(&self) -> MemoryUsage;
}

/// Resident set size of this process over total system memory, read from `/proc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcMemorySource;

impl MemorySource for ProcMemorySource {
    #[cfg(target_os = "linux")]
    fn sample(&self) -> MemoryUsage {
        let used_bytes = fs::read_to_string("/proc/self/status")
            .ok()
            .and_then(|status| parse_kb_field(&status, "VmRSS:"))
            .unwrap_or(0);
        let total_bytes = fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|meminfo| parse_kb_field(&meminfo, "MemTotal:"))
            .unwrap_or(0);

        if total_bytes == 0 {
            tracing::debug!("Could not read total memory from /proc/meminfo");
        }
        MemoryUsage { used_bytes, total_bytes }
    }

    #[cfg(not(target_os = "linux"))]
    fn sample(&self) -> MemoryUsage {
        MemoryUsage::default()
    }
}

/// Finds `field` in a `/proc` key-value listing and returns its `kB` value in bytes.
fn parse_kb_field(contents: &str, field: &str) -> Option<u64> {
    contents
        .lines()
        .find(|line| line.starts_with(field))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}
