//! JSON bodies served by the reporting API

use crate::aggregate::AggregateRow;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ApiResponse {
    Success {
        success: bool,
        data: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        timestamp: String,
    },
    Failure {
        success: bool,
        error: String,
    },
}

impl ApiResponse {
    pub fn ok(data: serde_json::Value, title: Option<&str>) -> Self {
        ApiResponse::Success {
            success: true,
            data,
            title: title.map(str::to_string),
            timestamp: chrono::Local::now().to_rfc3339(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        ApiResponse::Failure {
            success: false,
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ApiResponse::Success { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitoringSummary {
    pub total_processes: usize,
    pub total_memory: f64,
    pub total_cpu: f64,
    pub top_memory_process: Option<AggregateRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotSummary {
    pub total_processes: usize,
    pub total_memory: f64,
    pub top_memory_process: Option<AggregateRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessSummary {
    pub monitoring: MonitoringSummary,
    pub snapshot: SnapshotSummary,
}

impl ProcessSummary {
    /// Builds the summary from already-aggregated monitoring and snapshot rows.
    pub fn from_aggregates(monitoring: &[AggregateRow], snapshot: &[AggregateRow]) -> Self {
        ProcessSummary {
            monitoring: MonitoringSummary {
                total_processes: monitoring.len(),
                total_memory: monitoring.iter().map(|r| r.avg_memory_mb).sum(),
                total_cpu: monitoring.iter().filter_map(|r| r.avg_cpu_percent).sum(),
                top_memory_process: top_by_memory(monitoring),
            },
            snapshot: SnapshotSummary {
                total_processes: snapshot.len(),
                total_memory: snapshot.iter().map(|r| r.avg_memory_mb).sum(),
                top_memory_process: top_by_memory(snapshot),
            },
        }
    }
}

/// First row with the highest average memory.
fn top_by_memory(rows: &[AggregateRow]) -> Option<AggregateRow> {
    rows.iter()
        .fold(None::<&AggregateRow>, |best, r| match best {
            Some(b) if b.avg_memory_mb >= r.avg_memory_mb => Some(b),
            _ => Some(r),
        })
        .cloned()
}
