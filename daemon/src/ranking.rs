//! Top-N selection over a sampling pass

use crate::collector::ProcessSample;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Memory,
    Cpu,
}

impl Metric {
    /// Value used for ranking. A sample without CPU data ranks as 0%.
    pub fn value(self, sample: &ProcessSample) -> f64 {
        match self {
            Metric::Memory => sample.memory_mb,
            Metric::Cpu => sample.cpu_percent.unwrap_or(0.0),
        }
    }
}

/// Samples of one pass, ordered by the metric they were ranked on.
///
/// The batch remembers whether it was sampled in CPU mode, so an empty pass
/// still maps to the right log schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleBatch {
    samples: Vec<ProcessSample>,
    with_cpu: bool,
}

impl SampleBatch {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProcessSample> {
        self.samples.iter()
    }

    pub fn as_slice(&self) -> &[ProcessSample] {
        &self.samples
    }

    pub fn into_vec(self) -> Vec<ProcessSample> {
        self.samples
    }

    /// True when the batch was sampled in CPU mode.
    pub fn has_cpu(&self) -> bool {
        self.with_cpu
    }

    /// Marks the sampling mode explicitly, regardless of the rows kept.
    pub fn with_cpu(mut self, with_cpu: bool) -> Self {
        self.with_cpu = with_cpu;
        self
    }
}

impl<'a> IntoIterator for &'a SampleBatch {
    type Item = &'a ProcessSample;
    type IntoIter = std::slice::Iter<'a, ProcessSample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

/// Sorts descending by `metric` and keeps the first `n`.
///
/// The sort is stable: equal values keep their enumeration order, so running
/// this twice over the same input yields the same batch.
pub fn select_top_n(mut samples: Vec<ProcessSample>, n: usize, metric: Metric) -> SampleBatch {
    samples.sort_by(|a, b| metric.value(b).total_cmp(&metric.value(a)));
    let with_cpu = samples.iter().any(|s| s.cpu_percent.is_some());
    samples.truncate(n);
    SampleBatch { samples, with_cpu }
}
