//! Segmentation Job Runner
//!
//! Runs one full pass: anchor "now" → extract RFM features → partition
//! outliers → cluster → replace the segment store. At most one run is in
//! flight; a second trigger is rejected immediately. Nothing is persisted
//! unless every upstream step succeeded, and a run that exceeds its deadline
//! is abandoned (an open replace transaction rolls back when dropped).
//!
//! Status sits behind a std mutex that is never held across an await, so the
//! run guard can restore it from `Drop` when a run panics or its future is
//! dropped.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::SegmentationConfig;
use crate::db::SegmentStore;
use crate::error::SegmentationError;
use crate::models::{
    ClusterCount, JobState, RunReport, RunTrigger, RunnerStatus, SegmentAssignment,
};
use crate::services::{OrderHistoryReader, OutlierDetector, SegmentationEngine};

fn lock_status(status: &Mutex<RunnerStatus>) -> MutexGuard<'_, RunnerStatus> {
    status.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Single-flight flag held for one run
///
/// On drop the flag is released, and a status still marked running (the run
/// never reached `finish`) goes back to idle.
struct RunGuard<'a> {
    flag: &'a AtomicBool,
    status: &'a Mutex<RunnerStatus>,
}

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool, status: &'a Mutex<RunnerStatus>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag, status })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        {
            let mut status = lock_status(self.status);
            if status.state == JobState::Running {
                if let Some(run_id) = status.current_run.take() {
                    tracing::warn!(run_id = %run_id, "Segmentation run abandoned before completion");
                }
                status.state = JobState::Idle;
            }
        }
        self.flag.store(false, Ordering::Release);
    }
}

/// Progress lines and warnings captured for the run report
struct RunLog {
    run_id: Uuid,
    lines: Vec<String>,
    warnings: Vec<String>,
}

impl RunLog {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            lines: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn info(&mut self, message: String) {
        tracing::info!(run_id = %self.run_id, "{}", message);
        self.lines.push(message);
    }

    fn warn(&mut self, message: String) {
        tracing::warn!(run_id = %self.run_id, "{}", message);
        self.lines.push(format!("WARNING: {}", message));
        self.warnings.push(message);
    }
}

/// Counts gathered while the pipeline runs
struct PipelineSummary {
    customers: usize,
    outliers: usize,
    clusters: Vec<ClusterCount>,
    outlier_segments: Vec<ClusterCount>,
    converged: bool,
}

struct Inner {
    orders: OrderHistoryReader,
    store: SegmentStore,
    config: SegmentationConfig,
    running: AtomicBool,
    status: Mutex<RunnerStatus>,
}

/// Cloneable handle; all clones share the single-flight guard
#[derive(Clone)]
pub struct JobRunner {
    inner: Arc<Inner>,
    timeout: Duration,
}

impl JobRunner {
    pub fn new(orders: OrderHistoryReader, store: SegmentStore, config: SegmentationConfig) -> Self {
        let timeout = config.timeout();
        Self {
            inner: Arc::new(Inner {
                orders,
                store,
                config,
                running: AtomicBool::new(false),
                status: Mutex::new(RunnerStatus::default()),
            }),
            timeout,
        }
    }

    /// Override the run deadline taken from the config
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn config(&self) -> &SegmentationConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn status(&self) -> RunnerStatus {
        lock_status(&self.inner.status).clone()
    }

    /// Message of the last failed run, if the last run failed
    pub fn last_error(&self) -> Option<String> {
        let status = lock_status(&self.inner.status);
        status
            .last_run
            .as_ref()
            .filter(|report| !report.success)
            .map(|report| report.message.clone())
    }

    /// Execute one run to completion
    ///
    /// Returns `ConcurrentRunRejected` without touching any state when a run
    /// is already in flight.
    pub async fn trigger(&self, trigger: RunTrigger) -> Result<RunReport, SegmentationError> {
        let Some(_guard) = RunGuard::acquire(&self.inner.running, &self.inner.status) else {
            tracing::warn!(?trigger, "Segmentation trigger rejected: run already in progress");
            return Err(SegmentationError::ConcurrentRunRejected);
        };

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();

        {
            let mut status = lock_status(&self.inner.status);
            status.state = JobState::Running;
            status.current_run = Some(run_id);
        }

        let mut log = RunLog::new(run_id);
        log.info(format!("Segmentation run started ({:?})", trigger));

        let outcome = match tokio::time::timeout(
            self.timeout,
            self.execute(started_at, &mut log),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SegmentationError::Timeout(self.timeout.as_secs())),
        };

        let finished_at = Utc::now();
        let duration_ms = clock.elapsed().as_millis() as u64;

        let (report, result) = match outcome {
            Ok(summary) => {
                log.info(format!(
                    "Segmentation completed: {} customers, {} outliers, {} ms",
                    summary.customers, summary.outliers, duration_ms
                ));
                let report = build_report(
                    run_id,
                    trigger,
                    started_at,
                    finished_at,
                    duration_ms,
                    Some(&summary),
                    None,
                    log,
                );
                (report.clone(), Ok(report))
            }
            Err(err) => {
                tracing::error!(run_id = %run_id, error = %err, "Segmentation run failed");
                log.lines.push(format!("ERROR: {}", err));
                let report = build_report(
                    run_id,
                    trigger,
                    started_at,
                    finished_at,
                    duration_ms,
                    None,
                    Some(&err),
                    log,
                );
                (report, Err(err))
            }
        };

        self.finish(report);
        result
    }

    fn finish(&self, report: RunReport) {
        let mut status = lock_status(&self.inner.status);
        status.state = JobState::Idle;
        status.current_run = None;
        status.last_run = Some(report);
    }

    async fn execute(
        &self,
        now: DateTime<Utc>,
        log: &mut RunLog,
    ) -> Result<PipelineSummary, SegmentationError> {
        let config = &self.inner.config;

        // Step 1: RFM features from order history
        let features = self.inner.orders.extract(now).await?;
        log.info(format!(
            "Extracted RFM features for {} customers (anchor {})",
            features.len(),
            now.to_rfc3339()
        ));
        if features.is_empty() {
            log.warn("No customers with qualifying orders; segment store will be emptied".to_string());
        }

        // Steps 2-3: CPU-bound work off the async workers
        let detector = OutlierDetector::new(config.outliers.clone());
        let engine = SegmentationEngine::new(config);
        let outlier_clusters = config.outlier_clusters;
        let (partition, clustering, sub_clustering) = tokio::task::spawn_blocking(move || {
            let partition = detector.partition(&features);
            let clustering = engine.cluster(&partition.normal)?;
            let sub_clustering = if outlier_clusters > 0 && !partition.outliers.is_empty() {
                Some(engine.with_clusters(outlier_clusters).cluster(&partition.outliers)?)
            } else {
                None
            };
            Ok::<_, SegmentationError>((partition, clustering, sub_clustering))
        })
        .await
        .map_err(|e| SegmentationError::Internal(format!("clustering task failed: {}", e)))??;

        for fence in &partition.fences {
            log.info(format!(
                "Outlier bounds for {}: {} .. {}",
                fence.dimension.as_str(),
                fence.lower.map_or("-inf".to_string(), |v| format!("{:.2}", v)),
                fence.upper.map_or("+inf".to_string(), |v| format!("{:.2}", v)),
            ));
        }
        log.info(format!(
            "{} normal customers, {} outliers",
            partition.normal.len(),
            partition.outliers.len()
        ));

        if !partition.normal.is_empty() && clustering.k < config.clusters {
            log.warn(format!(
                "Only {} distinct customer profiles; formed {} of {} clusters",
                clustering.k, clustering.k, config.clusters
            ));
        }
        if !clustering.converged {
            log.warn(format!(
                "k-means did not converge within {} iterations; using best partition found",
                config.max_iterations
            ));
        }
        if let Some(sub) = &sub_clustering {
            log.info(format!("Outliers split into {} sub-segments", sub.k));
            if !sub.converged {
                log.warn(format!(
                    "Outlier k-means did not converge within {} iterations",
                    config.max_iterations
                ));
            }
        }

        // Step 4: assignments stamped with one computation time
        let computed_at = Utc::now();
        let labels = clustering.label_map();
        let mut assignments = Vec::with_capacity(partition.normal.len() + partition.outliers.len());
        for features in &partition.normal {
            let cluster = labels.get(features.customer_id.as_str()).copied().ok_or_else(|| {
                SegmentationError::Internal(format!(
                    "customer {} missing from clustering output",
                    features.customer_id
                ))
            })?;
            assignments.push(SegmentAssignment::clustered(features, cluster, computed_at));
        }
        let sub_labels = sub_clustering.as_ref().map(|sub| sub.label_map());
        for features in &partition.outliers {
            let segment = sub_labels
                .as_ref()
                .and_then(|labels| labels.get(features.customer_id.as_str()).copied());
            assignments.push(SegmentAssignment::outlier(features, segment, computed_at));
        }

        // Step 5: atomic swap
        let written = self
            .inner
            .store
            .replace_all(&assignments)
            .await
            .map_err(|e| SegmentationError::PersistenceFailure(e.to_string()))?;
        log.info(format!("Stored {} segment assignments", written));

        let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
        let mut segment_counts: BTreeMap<i64, usize> = BTreeMap::new();
        for assignment in &assignments {
            *counts.entry(assignment.cluster).or_insert(0) += 1;
            if let Some(segment) = assignment.outlier_segment {
                *segment_counts.entry(segment).or_insert(0) += 1;
            }
        }
        for (cluster, count) in &counts {
            log.info(format!("Cluster {}: {} customers", cluster, count));
        }
        for (segment, count) in &segment_counts {
            log.info(format!("Outlier segment {}: {} customers", segment, count));
        }

        Ok(PipelineSummary {
            customers: assignments.len(),
            outliers: partition.outliers.len(),
            clusters: to_counts(counts),
            outlier_segments: to_counts(segment_counts),
            converged: clustering.converged,
        })
    }
}

fn to_counts(counts: BTreeMap<i64, usize>) -> Vec<ClusterCount> {
    counts
        .into_iter()
        .map(|(cluster_id, count)| ClusterCount { cluster_id, count })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn build_report(
    run_id: Uuid,
    trigger: RunTrigger,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    duration_ms: u64,
    summary: Option<&PipelineSummary>,
    error: Option<&SegmentationError>,
    log: RunLog,
) -> RunReport {
    let warnings = if log.warnings.is_empty() {
        None
    } else {
        Some(log.warnings.join("\n"))
    };

    let (state, success, message) = match error {
        None => (
            JobState::Succeeded,
            true,
            "Segmentation executed successfully".to_string(),
        ),
        Some(err) => (JobState::Failed, false, format!("Segmentation failed: {}", err)),
    };

    RunReport {
        run_id,
        trigger,
        state,
        success,
        message,
        logs: log.lines.join("\n"),
        warnings,
        customers: summary.map_or(0, |s| s.customers),
        outliers: summary.map_or(0, |s| s.outliers),
        clusters: summary.map_or_else(Vec::new, |s| s.clusters.clone()),
        outlier_segments: summary.map_or_else(Vec::new, |s| s.outlier_segments.clone()),
        converged: summary.map_or(false, |s| s.converged),
        started_at,
        finished_at,
        duration_ms,
    }
}
