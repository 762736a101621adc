mod common;

use common::{mixed_table, Entry, ScriptedCollector, MB};
use std::time::Duration;
use taskmon_daemon::error::SampleError;
use taskmon_daemon::logging::LogContext;
use taskmon_daemon::primer::{prime_all, prime_baselines, warm_up};
use taskmon_daemon::sampler::{ProcessSampler, SampleStats};
use tokio::sync::watch;

#[test]
fn test_failures_are_counted_and_excluded() {
    let mut sampler = ProcessSampler::new(ScriptedCollector::new(mixed_table()), &LogContext::default());
    let batch = sampler.sample_memory(20).unwrap();

    let pids: Vec<u32> = batch.iter().map(|s| s.pid).collect();
    assert_eq!(pids, vec![3, 6, 1]);
    assert_eq!(
        sampler.last_stats(),
        SampleStats {
            sampled: 3,
            no_memory_info: 1,
            access_denied: 1,
            vanished: 1,
        }
    );
    assert_eq!(sampler.last_stats().errors(), 3);
    assert!(batch.iter().all(|s| s.memory_mb > 0.0));
    assert!(!batch.has_cpu());
}

#[test]
fn test_empty_name_defaults_to_unknown() {
    let mut sampler = ProcessSampler::new(ScriptedCollector::new(mixed_table()), &LogContext::default());
    let batch = sampler.sample_memory(20).unwrap();
    let unnamed = batch.iter().find(|s| s.pid == 6).unwrap();
    assert_eq!(unnamed.name, "Unknown");
    assert_eq!(unnamed.memory_mb, 50.0);
}

#[test]
fn test_limit_truncates_and_counters_reset() {
    let mut sampler = ProcessSampler::new(ScriptedCollector::new(mixed_table()), &LogContext::default());
    let batch = sampler.sample_memory(1).unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch.as_slice()[0].name, "postgres");

    sampler.sample_memory(1).unwrap();
    assert_eq!(sampler.last_stats().sampled, 3, "counters are per pass");
}

#[test]
fn test_enumeration_failure_is_fatal() {
    let mut sampler = ProcessSampler::new(ScriptedCollector::broken(), &LogContext::default());
    assert!(matches!(
        sampler.sample_memory(5),
        Err(SampleError::Enumeration { .. })
    ));
    assert!(prime_baselines(&ScriptedCollector::broken()).is_err());
}

#[test]
fn test_primed_cpu_sampling_reports_usage() {
    let collector = ScriptedCollector::new(mixed_table());
    let primed = prime_baselines(&collector).unwrap();
    assert_eq!(primed.primed(), 3 + 1); // readable processes plus the one without memory info
    assert_eq!(primed.skipped(), 2);
    assert_eq!(collector.reset_count(), 1);

    let mut sampler = ProcessSampler::new(collector, &LogContext::default());
    let batch = sampler.sample_memory_and_cpu(&primed, 10).unwrap();
    assert!(batch.has_cpu());
    let postgres = batch.iter().find(|s| s.name == "postgres").unwrap();
    assert_eq!(postgres.cpu_percent, Some(12.0));
    // Sorted by memory, not CPU.
    let pids: Vec<u32> = batch.iter().map(|s| s.pid).collect();
    assert_eq!(pids, vec![3, 6, 1]);
    // Every pid still listed keeps its baseline.
    assert_eq!(sampler.collector().baseline_count(), 4);
}

#[test]
fn test_cpu_pass_keeping_no_rows_stays_in_cpu_mode() {
    let collector = ScriptedCollector::new(mixed_table());
    let primed = prime_baselines(&collector).unwrap();
    let mut sampler = ProcessSampler::new(collector, &LogContext::default());

    let batch = sampler.sample_memory_and_cpu(&primed, 0).unwrap();
    assert!(batch.is_empty());
    assert!(batch.has_cpu());
    assert!(!sampler.sample_memory(0).unwrap().has_cpu());
}

#[test]
fn test_process_started_after_priming_is_a_cold_start() {
    let collector = ScriptedCollector::new(vec![(7, Entry::Proc { name: "late", rss: MB, cpu: 40.0 })]);
    let mut sampler = ProcessSampler::new(collector, &LogContext::default());
    let primed = prime_baselines(&ScriptedCollector::new(Vec::new())).unwrap();

    let first = sampler.sample_memory_and_cpu(&primed, 5).unwrap();
    assert_eq!(first.as_slice()[0].cpu_percent, Some(0.0));
    let second = sampler.sample_memory_and_cpu(&primed, 5).unwrap();
    assert_eq!(second.as_slice()[0].cpu_percent, Some(40.0));
}

#[tokio::test]
async fn test_prime_all_waits_for_warmup() {
    let collector = ScriptedCollector::new(mixed_table());
    let started = std::time::Instant::now();
    let primed = prime_all(&collector, Duration::from_millis(50)).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(primed.primed(), 4);
    assert!(primed.at() >= started);
    assert_eq!(collector.baseline_count(), 4);
}

#[tokio::test]
async fn test_warm_up_returns_token_after_waiting() {
    let primed = prime_baselines(&ScriptedCollector::new(mixed_table())).unwrap();
    let (_tx, mut rx) = watch::channel(false);
    let started = std::time::Instant::now();
    let primed = warm_up(primed, Duration::from_millis(30), &mut rx).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert_eq!(primed.primed(), 4);
}

#[tokio::test]
async fn test_warm_up_gives_up_on_shutdown() {
    let primed = prime_baselines(&ScriptedCollector::new(mixed_table())).unwrap();
    let (tx, mut rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = tx.send(true);
    });
    let started = std::time::Instant::now();
    assert!(warm_up(primed, Duration::from_secs(30), &mut rx).await.is_none());
    assert!(started.elapsed() < Duration::from_secs(5));

    // A dropped sender also ends the wait.
    let primed = prime_baselines(&ScriptedCollector::new(mixed_table())).unwrap();
    let (tx, mut rx) = watch::channel(false);
    drop(tx);
    assert!(warm_up(primed, Duration::from_secs(30), &mut rx).await.is_none());
}
