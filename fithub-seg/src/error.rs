//! Error types for fithub-seg
//!
//! `SegmentationError` is what a run can fail with; `ApiError` is what the
//! HTTP layer turns into a structured JSON body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failure of a segmentation run
///
/// Empty populations and non-convergence are not errors; the runner records
/// them as warnings on the report.
#[derive(Debug, Error)]
pub enum SegmentationError {
    /// Order history could not be read; nothing was persisted
    #[error("Order data source unavailable: {0}")]
    DataSourceUnavailable(String),

    /// Another run holds the single-flight guard
    #[error("A segmentation run is already in progress")]
    ConcurrentRunRejected,

    /// Replacing the segment store failed; previous segments remain
    #[error("Failed to persist segments: {0}")]
    PersistenceFailure(String),

    /// Run exceeded its deadline; previous segments remain
    #[error("Segmentation run timed out after {0} s")]
    Timeout(u64),

    /// Worker task failure
    #[error("Internal segmentation error: {0}")]
    Internal(String),
}

impl SegmentationError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            SegmentationError::DataSourceUnavailable(_) => "DATA_SOURCE_UNAVAILABLE",
            SegmentationError::ConcurrentRunRejected => "CONFLICT",
            SegmentationError::PersistenceFailure(_) => "PERSISTENCE_FAILURE",
            SegmentationError::Timeout(_) => "TIMEOUT",
            SegmentationError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            SegmentationError::DataSourceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            SegmentationError::ConcurrentRunRejected => StatusCode::CONFLICT,
            SegmentationError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            SegmentationError::PersistenceFailure(_) | SegmentationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Segmentation run failure
    #[error(transparent)]
    Segmentation(#[from] SegmentationError),

    /// Segment store read failure
    #[error("Storage error: {0}")]
    Common(#[from] fithub_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
            ApiError::Segmentation(ref err) => (err.status(), err.code(), err.to_string()),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "success": false,
            "message": message,
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
