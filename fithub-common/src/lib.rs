//! # FitHub Common Library
//!
//! Shared code for the FitHub back-office services:
//! - Error and result types
//! - Configuration file and root folder resolution
//! - SQLite pool initialisation and the order/segment schema
//! - Order row models read by analytics jobs
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
