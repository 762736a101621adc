//! Scripted process table for tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use taskmon_daemon::collector::{ProbeOutcome, ProcessCollector, ProcessSample};
use taskmon_daemon::error::SampleError;

#[derive(Clone)]
pub enum Entry {
    Proc { name: &'static str, rss: u64, cpu: f64 },
    NoMemory,
    Denied,
    Vanished,
}

pub const MB: u64 = 1024 * 1024;

pub struct ScriptedCollector {
    entries: Vec<(u32, Entry)>,
    fail_enumeration: bool,
    scan_delay: Duration,
    baselines: Mutex<HashSet<u32>>,
    resets: Mutex<usize>,
}

impl ScriptedCollector {
    pub fn new(entries: Vec<(u32, Entry)>) -> Self {
        Self {
            entries,
            fail_enumeration: false,
            scan_delay: Duration::ZERO,
            baselines: Mutex::new(HashSet::new()),
            resets: Mutex::new(0),
        }
    }

    pub fn broken() -> Self {
        Self {
            fail_enumeration: true,
            ..Self::new(Vec::new())
        }
    }

    /// Every enumeration blocks the calling thread for `delay`.
    pub fn slow(entries: Vec<(u32, Entry)>, delay: Duration) -> Self {
        Self {
            scan_delay: delay,
            ..Self::new(entries)
        }
    }

    pub fn baseline_count(&self) -> usize {
        self.baselines.lock().unwrap().len()
    }

    pub fn reset_count(&self) -> usize {
        *self.resets.lock().unwrap()
    }

    fn entry(&self, pid: u32) -> Option<&Entry> {
        self.entries.iter().find(|(p, _)| *p == pid).map(|(_, e)| e)
    }
}

impl ProcessCollector for ScriptedCollector {
    fn list_pids(&self) -> Result<Vec<u32>, SampleError> {
        if !self.scan_delay.is_zero() {
            std::thread::sleep(self.scan_delay);
        }
        if self.fail_enumeration {
            return Err(SampleError::Enumeration {
                path: "/proc".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "procfs unavailable"),
            });
        }
        Ok(self.entries.iter().map(|(pid, _)| *pid).collect())
    }

    fn probe(&self, pid: u32, with_cpu: bool) -> ProbeOutcome {
        match self.entry(pid) {
            Some(Entry::Proc { name, rss, cpu }) => {
                let cpu = with_cpu.then(|| {
                    // First reading of an unprimed pid is a cold start.
                    if self.baselines.lock().unwrap().insert(pid) {
                        0.0
                    } else {
                        *cpu
                    }
                });
                ProbeOutcome::Sampled(ProcessSample::new(pid, name, *rss, cpu))
            }
            Some(Entry::NoMemory) => ProbeOutcome::SkippedNoMemoryInfo,
            Some(Entry::Denied) => ProbeOutcome::SkippedAccessDenied,
            Some(Entry::Vanished) | None => ProbeOutcome::SkippedVanished,
        }
    }

    fn prime_cpu(&self, pid: u32) -> bool {
        match self.entry(pid) {
            Some(Entry::Proc { .. }) | Some(Entry::NoMemory) => {
                self.baselines.lock().unwrap().insert(pid);
                true
            }
            _ => false,
        }
    }

    fn reset_cpu(&self) {
        self.baselines.lock().unwrap().clear();
        *self.resets.lock().unwrap() += 1;
    }

    fn retain_cpu(&self, active_pids: &[u32]) {
        self.baselines.lock().unwrap().retain(|pid| active_pids.contains(pid));
    }
}

/// Three readable processes plus one of every failure kind.
pub fn mixed_table() -> Vec<(u32, Entry)> {
    vec![
        (1, Entry::Proc { name: "init", rss: 10 * MB, cpu: 0.5 }),
        (2, Entry::Vanished),
        (3, Entry::Proc { name: "postgres", rss: 300 * MB, cpu: 12.0 }),
        (4, Entry::Denied),
        (5, Entry::NoMemory),
        (6, Entry::Proc { name: "", rss: 50 * MB, cpu: 3.0 }),
    ]
}
