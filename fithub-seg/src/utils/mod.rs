//! Utility modules for fithub-seg

pub mod db_retry;

pub use db_retry::{retry_on_lock, LockRetry};
