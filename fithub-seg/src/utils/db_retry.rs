//! Lock-contention retry for SQLite writes
//!
//! WAL lets readers proceed during a segment swap, but a second writer (the
//! order system, a manual fix-up) can still hold the write lock for longer
//! than the connection's busy timeout. Writes are retried with doubling
//! pauses until a wall-clock budget is spent.

use std::future::Future;
use std::time::{Duration, Instant};

use fithub_common::{Error, Result};

/// SQLITE_BUSY and SQLITE_LOCKED primary result codes
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Backoff schedule for one write operation
#[derive(Debug, Clone, Copy)]
pub struct LockRetry {
    pub budget: Duration,
    pub first_pause: Duration,
    pub max_pause: Duration,
}

impl LockRetry {
    pub fn within(budget: Duration) -> Self {
        Self {
            budget,
            first_pause: Duration::from_millis(10),
            max_pause: Duration::from_secs(1),
        }
    }

    /// Run `write` until it succeeds, fails for a reason other than lock
    /// contention, or the budget is spent
    pub async fn run<F, Fut, T>(&self, label: &str, mut write: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let mut pause = self.first_pause;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let err = match write().await {
                Ok(value) => {
                    if attempts > 1 {
                        tracing::debug!(
                            operation = label,
                            attempts,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Write went through after lock contention"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !is_lock_contention(&err) {
                return Err(err);
            }
            if started.elapsed() >= self.budget {
                tracing::error!(
                    operation = label,
                    attempts,
                    budget_ms = self.budget.as_millis() as u64,
                    "Giving up on write: database stayed locked"
                );
                return Err(err);
            }

            tracing::warn!(
                operation = label,
                attempts,
                pause_ms = pause.as_millis() as u64,
                "Database locked; retrying write"
            );
            tokio::time::sleep(pause).await;
            pause = (pause * 2).min(self.max_pause);
        }
    }
}

/// Retry `write` on lock contention for at most `max_wait_ms`
pub async fn retry_on_lock<F, Fut, T>(label: &str, max_wait_ms: u64, write: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    LockRetry::within(Duration::from_millis(max_wait_ms))
        .run(label, write)
        .await
}

fn is_lock_contention(err: &Error) -> bool {
    let Error::Database(db_err) = err else {
        return false;
    };

    let by_code = db_err
        .as_database_error()
        .and_then(|e| e.code())
        .and_then(|code| code.parse::<i32>().ok())
        .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
        .unwrap_or(false);

    by_code || {
        let text = db_err.to_string();
        text.contains("database is locked") || text.contains("database is busy")
    }
}
