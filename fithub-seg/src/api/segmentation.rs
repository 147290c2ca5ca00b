//! Admin segmentation API handlers
//!
//! POST /api/admin/segmentation/run, GET /api/admin/segmentation/status,
//! GET /api/admin/segments, GET /api/admin/segments/:cluster_id

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::{
    error::{ApiError, ApiResult},
    models::{ClusterSummary, RunReport, RunTrigger, RunnerStatus, SegmentAssignment, OUTLIER_CLUSTER},
    AppState,
};

/// POST /api/admin/segmentation/run response
#[derive(Debug, Serialize)]
pub struct RunSegmentationResponse {
    pub success: bool,
    pub message: String,
    pub logs: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<String>,
    pub report: RunReport,
}

/// POST /api/admin/segmentation/run
///
/// Runs a full segmentation pass and waits for it to finish. 409 while
/// another run is in flight.
pub async fn run_segmentation(
    State(state): State<AppState>,
) -> ApiResult<Json<RunSegmentationResponse>> {
    // Detached so a dropped client connection cannot abandon a run midway
    let runner = state.runner.clone();
    let report = tokio::spawn(async move { runner.trigger(RunTrigger::Manual).await })
        .await
        .map_err(|e| ApiError::Internal(format!("segmentation task failed: {}", e)))??;

    Ok(Json(RunSegmentationResponse {
        success: report.success,
        message: report.message.clone(),
        logs: report.logs.clone(),
        warnings: report.warnings.clone(),
        report,
    }))
}

/// GET /api/admin/segmentation/status
pub async fn get_status(State(state): State<AppState>) -> Json<RunnerStatus> {
    Json(state.runner.status())
}

/// GET /api/admin/segments
///
/// Per-cluster counts and averages, outlier bucket first. Empty list when no
/// run has stored segments yet.
pub async fn get_segments(State(state): State<AppState>) -> ApiResult<Json<Vec<ClusterSummary>>> {
    let summaries = state.summaries.summarize().await?;
    Ok(Json(summaries))
}

/// GET /api/admin/segments/:cluster_id
pub async fn get_cluster_members(
    State(state): State<AppState>,
    Path(cluster_id): Path<i64>,
) -> ApiResult<Json<Vec<SegmentAssignment>>> {
    if cluster_id < OUTLIER_CLUSTER {
        return Err(ApiError::BadRequest(format!(
            "Invalid cluster id: {}",
            cluster_id
        )));
    }

    let members = state.store.query_by_cluster(cluster_id).await?;
    if members.is_empty() {
        return Err(ApiError::NotFound(format!(
            "No customers in cluster {}",
            cluster_id
        )));
    }

    Ok(Json(members))
}

/// Build admin segmentation routes
pub fn segmentation_routes() -> Router<AppState> {
    Router::new()
        .route("/api/admin/segmentation/run", post(run_segmentation))
        .route("/api/admin/segmentation/status", get(get_status))
        .route("/api/admin/segments", get(get_segments))
        .route("/api/admin/segments/:cluster_id", get(get_cluster_members))
}
