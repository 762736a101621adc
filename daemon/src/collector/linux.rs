use super::{ProbeOutcome, ProcessCollector, ProcessSample};
use crate::error::SampleError;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

/// Longest name the kernel keeps in `comm`; longer names are cut.
const COMM_LEN: usize = 15;

#[derive(Clone)]
struct CpuSample {
    total_ticks: u64, // utime + stime
    timestamp: Instant,
}

/// Fields we need from /proc/<pid>/stat.
struct StatFields {
    name: String,
    state: char,
    total_ticks: u64,
    rss_pages: Option<u64>,
}

enum StatError {
    Vanished,
    AccessDenied,
    Malformed,
}

pub struct LinuxProcessCollector {
    proc_root: PathBuf,
    page_size: u64,
    clock_ticks: u64,
    cpu_samples: Mutex<HashMap<u32, CpuSample>>,
}

impl LinuxProcessCollector {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Reads from an alternate procfs mount.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let clock_ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        Self {
            proc_root: root.into(),
            page_size: if page_size > 0 { page_size as u64 } else { 4096 },
            clock_ticks: if clock_ticks > 0 { clock_ticks as u64 } else { 100 },
            cpu_samples: Mutex::new(HashMap::new()),
        }
    }

    fn samples(&self) -> MutexGuard<'_, HashMap<u32, CpuSample>> {
        match self.cpu_samples.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn read_stat(&self, pid: u32) -> Result<StatFields, StatError> {
        let path = self.proc_root.join(pid.to_string()).join("stat");
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StatError::Vanished,
            ErrorKind::PermissionDenied => StatError::AccessDenied,
            // ESRCH shows up when the task exits mid-read
            _ if e.raw_os_error() == Some(libc::ESRCH) => StatError::Vanished,
            _ => StatError::Malformed,
        })?;
        parse_stat(&content).ok_or(StatError::Malformed)
    }

    /// A `comm` at the kernel limit is probably truncated; take the full
    /// program name from argv[0] when it starts with the same text.
    fn full_name(&self, pid: u32, comm: String) -> String {
        if comm.len() < COMM_LEN {
            return comm;
        }
        let Ok(cmdline) = fs::read(self.proc_root.join(pid.to_string()).join("cmdline")) else {
            return comm;
        };
        let argv0 = cmdline.split(|&b| b == 0).next().unwrap_or_default();
        let argv0 = String::from_utf8_lossy(argv0);
        match argv0.rsplit('/').next() {
            Some(base) if base.len() > comm.len() && base.starts_with(comm.as_str()) => base.to_string(),
            _ => comm,
        }
    }

    /// CPU% since the stored baseline, then moves the baseline to now.
    fn cpu_percent(&self, pid: u32, total_ticks: u64) -> f64 {
        let now = Instant::now();
        let mut samples = self.samples();
        let percent = match samples.get(&pid) {
            Some(prev) => {
                let tick_delta = total_ticks.saturating_sub(prev.total_ticks);
                let time_delta = now.duration_since(prev.timestamp).as_secs_f64();
                if time_delta > 0.0 {
                    let cpu_seconds = tick_delta as f64 / self.clock_ticks as f64;
                    (cpu_seconds / time_delta) * 100.0
                } else {
                    0.0
                }
            }
            None => 0.0, // cold start
        };
        samples.insert(
            pid,
            CpuSample {
                total_ticks,
                timestamp: now,
            },
        );
        percent
    }
}

impl Default for LinuxProcessCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessCollector for LinuxProcessCollector {
    fn list_pids(&self) -> Result<Vec<u32>, SampleError> {
        let entries = fs::read_dir(&self.proc_root).map_err(|source| SampleError::Enumeration {
            path: self.proc_root.clone(),
            source,
        })?;
        let mut pids: Vec<u32> = entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }

    fn probe(&self, pid: u32, with_cpu: bool) -> ProbeOutcome {
        let stat = match self.read_stat(pid) {
            Ok(stat) => stat,
            Err(StatError::Vanished) => return ProbeOutcome::SkippedVanished,
            Err(StatError::AccessDenied) => return ProbeOutcome::SkippedAccessDenied,
            Err(StatError::Malformed) => return ProbeOutcome::SkippedNoMemoryInfo,
        };
        if stat.state == 'Z' || stat.state == 'X' {
            return ProbeOutcome::SkippedVanished;
        }
        let Some(rss_pages) = stat.rss_pages else {
            return ProbeOutcome::SkippedNoMemoryInfo;
        };
        let cpu = with_cpu.then(|| self.cpu_percent(pid, stat.total_ticks));
        let name = self.full_name(pid, stat.name);
        ProbeOutcome::Sampled(ProcessSample::new(
            pid,
            &name,
            rss_pages.saturating_mul(self.page_size),
            cpu,
        ))
    }

    fn prime_cpu(&self, pid: u32) -> bool {
        match self.read_stat(pid) {
            Ok(stat) => {
                self.cpu_percent(pid, stat.total_ticks);
                true
            }
            Err(_) => false,
        }
    }

    fn reset_cpu(&self) {
        self.samples().clear();
    }

    fn retain_cpu(&self, active_pids: &[u32]) {
        let active: HashSet<u32> = active_pids.iter().copied().collect();
        self.samples().retain(|pid, _| active.contains(pid));
    }
}

/// Parses /proc/<pid>/stat. The comm field is wrapped in parentheses and may
/// itself contain spaces or parentheses, so split on the last ')'.
fn parse_stat(content: &str) -> Option<StatFields> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    if close < open {
        return None;
    }
    let name = content[open + 1..close].to_string();
    // rest[0] is field 3 (state); field N lives at rest[N - 3]
    let rest: Vec<&str> = content[close + 1..].split_whitespace().collect();
    let state = rest.first()?.chars().next()?;
    let utime: u64 = rest.get(11)?.parse().ok()?;
    let stime: u64 = rest.get(12)?.parse().ok()?;
    let rss_pages = rest.get(21).and_then(|v| v.parse::<i64>().ok()).map(|v| v.max(0) as u64);
    Some(StatFields {
        name,
        state,
        total_ticks: utime + stime,
        rss_pages,
    })
}
