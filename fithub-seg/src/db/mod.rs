//! Database access for fithub-seg
//!
//! The service owns `customer_segments`; order rows are read through
//! `fithub_common::db`.

pub mod segments;
pub mod summary;

pub use segments::{SegmentStore, StagedReplace};
pub use summary::SegmentSummaryReader;
