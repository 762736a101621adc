//! Snapshot and continuous monitoring runs

use crate::collector::ProcessCollector;
use crate::error::RunError;
use crate::logging::LogContext;
use crate::primer::{prime_baselines, warm_up, PrimedCpu};
use crate::sampler::{ProcessSampler, SampleStats};
use crate::sink::{timestamp_now, SampleRecordSink};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, Instrument, Span};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub limit: usize,
    pub interval: Duration,
    pub warmup: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotReport {
    pub rows: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorReport {
    pub passes: u64,
    pub rows: u64,
}

/// One memory-only pass written over the snapshot log.
pub fn take_snapshot<C, S>(
    sampler: &mut ProcessSampler<C>,
    sink: &S,
    limit: usize,
) -> Result<SnapshotReport, RunError>
where
    C: ProcessCollector,
    S: SampleRecordSink + ?Sized,
{
    let batch = sampler.sample_memory(limit)?;
    sink.write_snapshot(&timestamp_now(), &batch)?;
    Ok(SnapshotReport {
        rows: batch.len(),
        errors: sampler.last_stats().errors(),
    })
}

pub struct Monitor<C, S> {
    sampler: Arc<Mutex<ProcessSampler<C>>>,
    sink: Arc<S>,
    config: MonitorConfig,
    span: Span,
}

impl<C, S> Monitor<C, S>
where
    C: ProcessCollector + 'static,
    S: SampleRecordSink + Send + Sync + 'static,
{
    pub fn new(sampler: ProcessSampler<C>, sink: S, config: MonitorConfig, log: &LogContext) -> Self {
        Self {
            sampler: Arc::new(Mutex::new(sampler)),
            sink: Arc::new(sink),
            config,
            span: log.component("monitor"),
        }
    }

    /// Counters of the most recent pass.
    pub fn last_stats(&self) -> SampleStats {
        lock(&self.sampler).last_stats()
    }

    /// Primes CPU accounting once, then samples, appends and sleeps until
    /// `shutdown` turns true (or its sender is dropped).
    ///
    /// Cancellation is checked before every pass and interrupts the warm-up
    /// and the sleep immediately. A pass always finishes writing before the
    /// run returns. Process scans and log writes run on the blocking pool.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<MonitorReport, RunError> {
        let span = self.span.clone();
        self.run_inner(&mut shutdown).instrument(span).await
    }

    async fn run_inner(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<MonitorReport, RunError> {
        let mut report = MonitorReport::default();
        info!(
            limit = self.config.limit,
            interval_secs = self.config.interval.as_secs_f64(),
            "starting continuous monitoring"
        );

        let sampler = Arc::clone(&self.sampler);
        let baselines = on_blocking_pool(move || Ok(prime_baselines(lock(&sampler).collector())?)).await?;
        info!(primed = baselines.primed(), skipped = baselines.skipped(), "cpu counters primed");
        let Some(primed) = warm_up(baselines, self.config.warmup, shutdown).await else {
            info!("monitoring stopped during warm-up");
            return Ok(report);
        };
        let primed = Arc::new(primed);

        loop {
            if *shutdown.borrow() {
                break;
            }
            let rows = self.pass(&primed).await?;
            report.passes += 1;
            report.rows += rows as u64;

            if wait_or_cancel(self.config.interval, shutdown).await {
                break;
            }
        }

        info!(passes = report.passes, rows = report.rows, "monitoring stopped, log saved");
        Ok(report)
    }

    /// Samples with CPU and appends the batch. Returns the rows written.
    async fn pass(&self, primed: &Arc<PrimedCpu>) -> Result<usize, RunError> {
        let sampler = Arc::clone(&self.sampler);
        let sink = Arc::clone(&self.sink);
        let primed = Arc::clone(primed);
        let limit = self.config.limit;
        let span = Span::current();
        on_blocking_pool(move || {
            let _enter = span.entered();
            let timestamp = timestamp_now();
            let batch = lock(&sampler)
                .sample_memory_and_cpu(&primed, limit)
                .inspect_err(|e| error!(error = %e, "sampling failed"))?;
            sink.append_sample(&timestamp, &batch)
                .inspect_err(|e| error!(error = %e, "append failed"))?;
            Ok(batch.len())
        })
        .await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn on_blocking_pool<T, F>(work: F) -> Result<T, RunError>
where
    F: FnOnce() -> Result<T, RunError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await?
}

/// Sleeps for `duration`; returns true if shutdown was requested first.
/// A dropped sender counts as a shutdown request.
pub(crate) async fn wait_or_cancel(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let deadline = tokio::time::Instant::now() + duration;
    loop {
        if *shutdown.borrow_and_update() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return *shutdown.borrow(),
            changed = shutdown.changed() => {
                if changed.is_err() {
                    return true;
                }
            }
        }
    }
}
