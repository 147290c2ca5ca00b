//! Segmentation job state machine
//!
//! The runner is `IDLE` or `RUNNING`; each finished run ends `SUCCEEDED` or
//! `FAILED` and the runner returns to `IDLE`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Segmentation job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    /// No run in flight
    Idle,
    /// A run holds the single-flight guard
    Running,
    /// Run finished and replaced the segment store
    Succeeded,
    /// Run aborted; segment store untouched
    Failed,
}

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunTrigger {
    /// Admin action over HTTP
    Manual,
    /// Daily schedule
    Scheduled,
    /// Initial run when the service starts
    Startup,
    /// `--run-once` command line invocation
    Cli,
}

/// Customers per cluster for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCount {
    pub cluster_id: i64,
    pub count: usize,
}

/// Outcome of one segmentation run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub trigger: RunTrigger,
    /// `SUCCEEDED` or `FAILED`
    pub state: JobState,
    pub success: bool,
    pub message: String,
    /// Human-readable progress lines, newline separated
    pub logs: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<String>,
    /// Customers with at least one qualifying order
    pub customers: usize,
    pub outliers: usize,
    /// Sorted by cluster id, outlier bucket included
    pub clusters: Vec<ClusterCount>,
    /// Outliers per sub-segment; empty when sub-clustering is disabled
    pub outlier_segments: Vec<ClusterCount>,
    pub converged: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Snapshot of the runner for status queries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerStatus {
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_run: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<RunReport>,
}

impl Default for RunnerStatus {
    fn default() -> Self {
        Self {
            state: JobState::Idle,
            current_run: None,
            last_run: None,
        }
    }
}
