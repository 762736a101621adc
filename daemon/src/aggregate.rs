//! Per-name aggregation of the sample log

use crate::ranking::Metric;
use crate::sink::{read_log, LogRow};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// Rows kept by `aggregate_by_name`, independent of the sampling limit.
pub const REPORT_CAP: usize = 15;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRow {
    pub name: String,
    #[serde(rename = "avg_memory")]
    pub avg_memory_mb: f64,
    #[serde(rename = "avg_cpu", skip_serializing_if = "Option::is_none")]
    pub avg_cpu_percent: Option<f64>,
    #[serde(rename = "count")]
    pub sample_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub name: String,
    pub value: f64,
}

#[derive(Default)]
struct Group {
    memory_sum: f64,
    cpu_sum: f64,
    cpu_rows: usize,
    rows: usize,
}

/// Rounds to two decimals exactly as `{:.2}` prints the value.
///
/// The decision is made on the stored binary value, so 150.005 (stored as
/// 150.00499...) becomes 150.0 while 12.345 (stored as 12.34500...) becomes
/// 12.35. Chart values therefore always match the CSV text.
pub fn round2(value: f64) -> f64 {
    if !value.is_finite() {
        return value;
    }
    format!("{value:.2}").parse().unwrap_or(value)
}

/// One row per distinct name, sorted by average memory (descending, ties by
/// name). Nothing is dropped.
pub fn summarize_by_name(rows: &[LogRow]) -> Vec<AggregateRow> {
    let mut groups: BTreeMap<&str, Group> = BTreeMap::new();
    for row in rows {
        let group = groups.entry(row.name.as_str()).or_default();
        group.rows += 1;
        group.memory_sum += row.memory_mb;
        if let Some(cpu) = row.cpu_percent {
            group.cpu_sum += cpu;
            group.cpu_rows += 1;
        }
    }

    let mut out: Vec<AggregateRow> = groups
        .into_iter()
        .map(|(name, g)| AggregateRow {
            name: name.to_string(),
            avg_memory_mb: g.memory_sum / g.rows as f64,
            avg_cpu_percent: (g.cpu_rows > 0).then(|| g.cpu_sum / g.cpu_rows as f64),
            sample_count: g.rows,
        })
        .collect();
    // BTreeMap order is by name, and the sort is stable.
    out.sort_by(|a, b| b.avg_memory_mb.total_cmp(&a.avg_memory_mb));
    out
}

/// `summarize_by_name` cut to the top `REPORT_CAP` names.
pub fn aggregate_by_name(rows: &[LogRow]) -> Vec<AggregateRow> {
    let mut out = summarize_by_name(rows);
    out.truncate(REPORT_CAP);
    out
}

/// Aggregates the log at `path`. A missing or unreadable log means no data.
pub fn aggregate_log(path: &Path) -> Vec<AggregateRow> {
    match read_log(path) {
        Ok(rows) => {
            let out = aggregate_by_name(&rows);
            debug!(path = %path.display(), rows = rows.len(), names = out.len(), "log aggregated");
            out
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "no sample data");
            Vec::new()
        }
    }
}

pub fn to_chart_series(rows: &[AggregateRow], metric: Metric) -> Vec<ChartPoint> {
    match metric {
        Metric::Memory => rows
            .iter()
            .map(|r| ChartPoint {
                name: r.name.clone(),
                value: round2(r.avg_memory_mb),
            })
            .collect(),
        Metric::Cpu => {
            let mut points: Vec<ChartPoint> = rows
                .iter()
                .filter_map(|r| {
                    let value = round2(r.avg_cpu_percent?);
                    (value > 0.0).then(|| ChartPoint {
                        name: r.name.clone(),
                        value,
                    })
                })
                .collect();
            points.sort_by(|a, b| b.value.total_cmp(&a.value));
            points
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, mem: f64, cpu: Option<f64>) -> LogRow {
        LogRow {
            timestamp: "2024-01-01 00:00:00".to_string(),
            pid: 1,
            name: name.to_string(),
            memory_mb: mem,
            cpu_percent: cpu,
        }
    }

    fn agg(name: &str, mem: f64, cpu: Option<f64>) -> AggregateRow {
        AggregateRow {
            name: name.to_string(),
            avg_memory_mb: mem,
            avg_cpu_percent: cpu,
            sample_count: 1,
        }
    }

    #[test]
    fn mean_of_two_samples() {
        let out = aggregate_by_name(&[row("db", 100.0, None), row("db", 200.0, None)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].avg_memory_mb, 150.0);
        assert_eq!(out[0].sample_count, 2);
        assert_eq!(out[0].avg_cpu_percent, None);
    }

    #[test]
    fn cpu_mean_and_ordering() {
        let rows = [
            row("a", 10.0, Some(1.0)),
            row("b", 30.0, Some(4.0)),
            row("a", 20.0, Some(3.0)),
            row("c", 30.0, Some(0.0)),
        ];
        let out = aggregate_by_name(&rows);
        let names: Vec<&str> = out.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "a"]);
        assert_eq!(out[2].avg_cpu_percent, Some(2.0));
        assert_eq!(out[2].avg_memory_mb, 15.0);
    }

    #[test]
    fn capped_at_fifteen_names() {
        let rows: Vec<LogRow> = (0..20).map(|i| row(&format!("p{i}"), i as f64, None)).collect();
        let out = aggregate_by_name(&rows);
        assert_eq!(out.len(), REPORT_CAP);
        assert_eq!(out[0].name, "p19");
        assert_eq!(summarize_by_name(&rows).len(), 20);
    }

    #[test]
    fn cpu_series_drops_non_positive() {
        let rows = [
            agg("A", 1.0, Some(5.0)),
            agg("B", 2.0, Some(0.0)),
            agg("C", 3.0, Some(-1.0)),
        ];
        assert_eq!(
            to_chart_series(&rows, Metric::Cpu),
            vec![ChartPoint {
                name: "A".to_string(),
                value: 5.0
            }]
        );
    }

    #[test]
    fn cpu_series_resorts_and_skips_rows_without_cpu() {
        let rows = [
            agg("big", 900.0, Some(0.5)),
            agg("mid", 50.0, None),
            agg("busy", 10.0, Some(42.126)),
            agg("idle", 5.0, Some(0.001)),
        ];
        let series = to_chart_series(&rows, Metric::Cpu);
        let names: Vec<&str> = series.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["busy", "big"]);
        assert_eq!(series[0].value, 42.13);
    }

    #[test]
    fn memory_series_keeps_order_and_rounds() {
        let rows = [agg("x", 150.005, None), agg("y", 12.345, None)];
        let series = to_chart_series(&rows, Metric::Memory);
        assert_eq!(series[0].value, 150.0);
        assert_eq!(series[1].value, 12.35);
    }

    #[test]
    fn round2_matches_csv_formatting() {
        assert_eq!(round2(150.005), 150.0);
        assert_eq!(round2(2.675), 2.67);
        assert_eq!(round2(12.345), 12.35);
        assert_eq!(round2(1.0), 1.0);
        for v in [150.005, 2.675, 12.345, 0.1 + 0.2, 99.999] {
            assert_eq!(format!("{:.2}", round2(v)), format!("{:.2}", v));
        }
    }

    #[test]
    fn missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(aggregate_log(&dir.path().join("absent.csv")).is_empty());
    }
}
