//! Data models for the segmentation service

pub mod features;
pub mod job;
pub mod segment;

pub use features::{Dimension, FeatureVector};
pub use job::{ClusterCount, JobState, RunReport, RunTrigger, RunnerStatus};
pub use segment::{ClusterSummary, SegmentAssignment, OUTLIER_CLUSTER};
