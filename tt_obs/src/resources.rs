//! ABOUTME: Process resource sampling for metrics snapshots
//! ABOUTME: Reads /proc/self on Linux; reports zeros elsewhere

use std::time::Instant;

/// Kernel USER_HZ; /proc/self/stat cpu times are in these ticks
#[cfg(target_os = "linux")]
const CLOCK_TICKS_PER_SEC: f64 = 100.0;

/// Resident set size of this process, in bytes; 0 when unavailable
pub fn rss_bytes() -> u64 {
    read_rss_kb().map(|kb| kb * 1024).unwrap_or(0)
}

#[cfg(target_os = "linux")]
fn read_rss_kb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|line| line.starts_with("VmRSS:"))?;
    line.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(not(target_os = "linux"))]
fn read_rss_kb() -> Option<u64> {
    None
}

#[cfg(target_os = "linux")]
fn read_cpu_ticks() -> Option<u64> {
    let stat = std::fs::read_to_string("/proc/self/stat").ok()?;
    // The comm field may contain spaces; everything after the closing
    // paren is whitespace-delimited. utime and stime are fields 14 and
    // 15 of the full line, indexes 11 and 12 after the paren.
    let (_, rest) = stat.rsplit_once(')')?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}

#[cfg(not(target_os = "linux"))]
fn read_cpu_ticks() -> Option<u64> {
    None
}

/// Tracks cpu time between samples to derive a usage percentage.
///
/// The first call establishes the baseline and returns zero.
#[derive(Debug, Default)]
pub struct CpuTracker {
    last: Option<(u64, Instant)>,
}

impl CpuTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cpu usage since the previous sample as a percentage of one core
    pub fn sample_percent(&mut self) -> f64 {
        let Some(ticks) = read_cpu_ticks() else {
            return 0.0;
        };
        let now = Instant::now();
        let percent = match self.last {
            Some((previous_ticks, previous_at)) => {
                let elapsed = now.duration_since(previous_at).as_secs_f64();
                if elapsed > 0.0 {
                    let delta = ticks.saturating_sub(previous_ticks) as f64;
                    cpu_percent_from_ticks(delta, elapsed)
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        self.last = Some((ticks, now));
        percent
    }
}

#[cfg(target_os = "linux")]
fn cpu_percent_from_ticks(delta_ticks: f64, elapsed_secs: f64) -> f64 {
    (delta_ticks / CLOCK_TICKS_PER_SEC) / elapsed_secs * 100.0
}

#[cfg(not(target_os = "linux"))]
fn cpu_percent_from_ticks(_delta_ticks: f64, _elapsed_secs: f64) -> f64 {
    0.0
}
