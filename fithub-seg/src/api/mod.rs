//! HTTP API handlers for fithub-seg

pub mod health;
pub mod segmentation;

pub use health::health_routes;
pub use segmentation::segmentation_routes;
