//! fithub-seg library interface
//!
//! RFM customer segmentation: order history → features → outliers →
//! k-means clusters → segment store, plus the admin HTTP surface.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult, SegmentationError};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::SegmentationConfig;
use crate::db::{SegmentStore, SegmentSummaryReader};
use crate::services::{JobRunner, OrderHistoryReader};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Persisted segment assignments
    pub store: SegmentStore,
    /// Per-cluster aggregates over the store
    pub summaries: SegmentSummaryReader,
    /// Single-flight segmentation runner
    pub runner: JobRunner,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Orders and segments in the same database
    pub fn new(db: SqlitePool, config: &SegmentationConfig) -> Self {
        Self::with_order_pool(db.clone(), db, config)
    }

    /// Orders read from a separate pool (e.g. a replica of the order system)
    pub fn with_order_pool(
        orders_db: SqlitePool,
        segments_db: SqlitePool,
        config: &SegmentationConfig,
    ) -> Self {
        let store = SegmentStore::new(segments_db.clone());
        let reader = OrderHistoryReader::new(orders_db, config.qualifying.clone());
        let runner = JobRunner::new(reader, store.clone(), config.clone());
        Self::from_parts(store, SegmentSummaryReader::new(segments_db), runner)
    }

    /// Assemble state around an already configured runner
    pub fn from_parts(store: SegmentStore, summaries: SegmentSummaryReader, runner: JobRunner) -> Self {
        Self {
            store,
            summaries,
            runner,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::segmentation_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
