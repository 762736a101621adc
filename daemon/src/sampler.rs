//! One sampling pass over the process table

use crate::collector::{ProbeOutcome, ProcessCollector, ProcessSample};
use crate::error::SampleError;
use crate::logging::LogContext;
use crate::primer::PrimedCpu;
use crate::ranking::{select_top_n, Metric, SampleBatch};
use tracing::{debug, info, Span};

/// Outcome counters of the most recent pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleStats {
    pub sampled: usize,
    pub no_memory_info: usize,
    pub access_denied: usize,
    pub vanished: usize,
}

impl SampleStats {
    pub fn errors(&self) -> usize {
        self.no_memory_info + self.access_denied + self.vanished
    }

    fn record(&mut self, pid: u32, outcome: ProbeOutcome) -> Option<ProcessSample> {
        match outcome {
            ProbeOutcome::Sampled(sample) => {
                self.sampled += 1;
                return Some(sample);
            }
            ProbeOutcome::SkippedNoMemoryInfo => {
                self.no_memory_info += 1;
                debug!(pid, "process has no memory info");
            }
            ProbeOutcome::SkippedAccessDenied => {
                self.access_denied += 1;
                debug!(pid, "access denied");
            }
            ProbeOutcome::SkippedVanished => {
                self.vanished += 1;
                debug!(pid, "process vanished");
            }
        }
        None
    }
}

pub struct ProcessSampler<C> {
    collector: C,
    stats: SampleStats,
    span: Span,
}

impl<C: ProcessCollector> ProcessSampler<C> {
    pub fn new(collector: C, log: &LogContext) -> Self {
        Self {
            collector,
            stats: SampleStats::default(),
            span: log.component("process_monitor"),
        }
    }

    pub fn collector(&self) -> &C {
        &self.collector
    }

    pub fn last_stats(&self) -> SampleStats {
        self.stats
    }

    /// Top `limit` processes by resident memory.
    pub fn sample_memory(&mut self, limit: usize) -> Result<SampleBatch, SampleError> {
        self.pass(limit, false)
    }

    /// Top `limit` processes by resident memory, each with CPU usage since
    /// its previous reading.
    pub fn sample_memory_and_cpu(
        &mut self,
        _primed: &PrimedCpu,
        limit: usize,
    ) -> Result<SampleBatch, SampleError> {
        self.pass(limit, true)
    }

    fn pass(&mut self, limit: usize, with_cpu: bool) -> Result<SampleBatch, SampleError> {
        let _enter = self.span.clone().entered();
        self.stats = SampleStats::default();
        debug!(limit, with_cpu, "collecting top processes");

        let pids = self.collector.list_pids()?;
        let mut samples = Vec::with_capacity(pids.len());
        for &pid in &pids {
            let outcome = self.collector.probe(pid, with_cpu);
            if let Some(sample) = self.stats.record(pid, outcome) {
                samples.push(sample);
            }
        }
        if with_cpu {
            self.collector.retain_cpu(&pids);
        }

        let top = select_top_n(samples, limit, Metric::Memory).with_cpu(with_cpu);
        info!(
            collected = self.stats.sampled,
            errors = self.stats.errors(),
            returned = top.len(),
            "sampling pass complete"
        );
        Ok(top)
    }
}
