//! Segmentation pipeline components
//!
//! order history → RFM features → outlier partition → clustering → segment store

pub mod job_runner;
pub mod order_history;
pub mod outlier_detector;
pub mod scheduler;
pub mod segmentation_engine;

pub use job_runner::JobRunner;
pub use order_history::{aggregate_rfm, OrderHistoryReader};
pub use outlier_detector::{DimensionFence, OutlierDetector, OutlierPartition};
pub use scheduler::{next_run_after, Scheduler};
pub use segmentation_engine::{ClusteringOutcome, SegmentationEngine};
