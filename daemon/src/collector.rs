//! Process table access (reads /proc on Linux)

mod linux;

pub use linux::LinuxProcessCollector;

use crate::error::SampleError;

pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One process observed during a sampling pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub memory_mb: f64,
    pub cpu_percent: Option<f64>,
}

impl ProcessSample {
    /// Builds a sample from raw readings, applying the "Unknown" name default
    /// and clamping negative readings to zero.
    pub fn new(pid: u32, name: &str, rss_bytes: u64, cpu_percent: Option<f64>) -> Self {
        let name = name.trim();
        Self {
            pid,
            name: if name.is_empty() {
                "Unknown".to_string()
            } else {
                name.to_string()
            },
            memory_mb: rss_bytes as f64 / BYTES_PER_MB,
            cpu_percent: cpu_percent.map(|c| if c.is_finite() { c.max(0.0) } else { 0.0 }),
        }
    }
}

/// Result of reading a single PID. The process table changes under us, so
/// every variant except `Sampled` is an expected outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Sampled(ProcessSample),
    SkippedNoMemoryInfo,
    SkippedAccessDenied,
    SkippedVanished,
}

pub trait ProcessCollector: Send + Sync {
    /// Lists every PID currently visible. Failing here fails the whole pass.
    fn list_pids(&self) -> Result<Vec<u32>, SampleError>;

    /// Reads one process. With `with_cpu`, CPU usage is computed against the
    /// PID's stored baseline, and the baseline is moved forward.
    fn probe(&self, pid: u32, with_cpu: bool) -> ProbeOutcome;

    /// Records a CPU baseline for `pid` without producing a reading.
    /// Returns false if the process could not be read.
    fn prime_cpu(&self, pid: u32) -> bool;

    /// Drops every stored CPU baseline.
    fn reset_cpu(&self);

    /// Drops baselines for PIDs not in `active_pids`.
    fn retain_cpu(&self, _active_pids: &[u32]) {}
}
