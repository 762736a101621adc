//! CPU accounting warm-up
//!
//! A CPU percentage is a delta between two readings, so the first reading of
//! any process is meaningless. Priming takes that first reading for every
//! visible process, then waits long enough for the next one to be useful.

use crate::collector::ProcessCollector;
use crate::error::SampleError;
use crate::monitor::wait_or_cancel;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::debug;

pub const DEFAULT_WARMUP: Duration = Duration::from_secs(1);

/// Proof that CPU baselines were established. CPU sampling requires one.
#[derive(Debug)]
pub struct PrimedCpu {
    primed: usize,
    skipped: usize,
    at: Instant,
}

impl PrimedCpu {
    /// Processes that received a baseline.
    pub fn primed(&self) -> usize {
        self.primed
    }

    /// Processes that vanished or could not be read while priming.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn at(&self) -> Instant {
        self.at
    }
}

/// Records baselines without waiting. Callers must let time pass before the
/// first CPU reading; `prime_all` does that for them.
pub fn prime_baselines<C: ProcessCollector + ?Sized>(collector: &C) -> Result<PrimedCpu, SampleError> {
    collector.reset_cpu();
    let pids = collector.list_pids()?;
    let mut primed = 0;
    for &pid in &pids {
        if collector.prime_cpu(pid) {
            primed += 1;
        }
    }
    let skipped = pids.len() - primed;
    debug!(primed, skipped, "cpu baselines recorded");
    Ok(PrimedCpu {
        primed,
        skipped,
        at: Instant::now(),
    })
}

/// Hands `primed` back once `warmup` has passed, or `None` if `shutdown`
/// turned true (or its sender dropped) first.
pub async fn warm_up(
    primed: PrimedCpu,
    warmup: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<PrimedCpu> {
    if wait_or_cancel(warmup, shutdown).await {
        debug!("warm-up cancelled");
        return None;
    }
    Some(primed)
}

/// Primes every visible process and sleeps `warmup` before returning.
///
/// For one-shot callers without a shutdown signal. Long runs call
/// `prime_baselines` followed by `warm_up` instead.
pub async fn prime_all<C: ProcessCollector + ?Sized>(
    collector: &C,
    warmup: Duration,
) -> Result<PrimedCpu, SampleError> {
    let token = prime_baselines(collector)?;
    tokio::time::sleep(warmup).await;
    Ok(token)
}
