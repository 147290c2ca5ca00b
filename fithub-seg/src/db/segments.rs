//! Segment Store
//!
//! Holds exactly one current assignment per customer. A run swaps the whole
//! set inside one SQLite transaction, so readers observe either the previous
//! set or the new one, never a mix.

use fithub_common::time::{parse_db_timestamp, to_db_timestamp};
use fithub_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::HashSet;

use crate::models::SegmentAssignment;
use crate::utils::retry_on_lock;

/// Default upper bound on waiting for the write lock
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

#[derive(Clone)]
pub struct SegmentStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SegmentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    pub fn with_max_lock_wait(mut self, max_lock_wait_ms: u64) -> Self {
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Atomically replace every stored assignment with `assignments`
    ///
    /// Duplicate customer ids are rejected before anything is written. Any
    /// failure rolls the transaction back and leaves the previous set intact.
    pub async fn replace_all(&self, assignments: &[SegmentAssignment]) -> Result<usize> {
        retry_on_lock("replace_segments", self.max_lock_wait_ms, || {
            self.replace_once(assignments)
        })
        .await
    }

    async fn replace_once(&self, assignments: &[SegmentAssignment]) -> Result<usize> {
        self.stage(assignments).await?.commit().await
    }

    /// Write the replacement set inside a transaction without committing it
    ///
    /// Until [`StagedReplace::commit`], readers on other connections keep
    /// seeing the previous set. Dropping the staged write rolls it back.
    pub async fn stage(&self, assignments: &[SegmentAssignment]) -> Result<StagedReplace> {
        let mut seen = HashSet::with_capacity(assignments.len());
        for assignment in assignments {
            if !seen.insert(assignment.customer_id.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "Duplicate segment assignment for customer {}",
                    assignment.customer_id
                )));
            }
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM customer_segments")
            .execute(&mut *tx)
            .await?;

        for assignment in assignments {
            sqlx::query(
                r#"
                INSERT INTO customer_segments (
                    customer_id, recency, frequency, sales, is_outlier, cluster,
                    outlier_segment, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&assignment.customer_id)
            .bind(assignment.recency)
            .bind(assignment.frequency)
            .bind(assignment.sales)
            .bind(assignment.is_outlier)
            .bind(assignment.cluster)
            .bind(assignment.outlier_segment)
            .bind(to_db_timestamp(assignment.updated_at))
            .execute(&mut *tx)
            .await?;
        }

        Ok(StagedReplace {
            tx,
            rows: assignments.len(),
        })
    }

    /// All assignments ordered by customer id
    pub async fn query_all(&self) -> Result<Vec<SegmentAssignment>> {
        let rows = sqlx::query(
            r#"
            SELECT customer_id, recency, frequency, sales, is_outlier, cluster,
                   outlier_segment, updated_at
            FROM customer_segments
            ORDER BY customer_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_assignment).collect()
    }

    /// Assignments of one cluster ordered by customer id
    pub async fn query_by_cluster(&self, cluster: i64) -> Result<Vec<SegmentAssignment>> {
        let rows = sqlx::query(
            r#"
            SELECT customer_id, recency, frequency, sales, is_outlier, cluster,
                   outlier_segment, updated_at
            FROM customer_segments
            WHERE cluster = ?
            ORDER BY customer_id
            "#,
        )
        .bind(cluster)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_assignment).collect()
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM customer_segments")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn row_to_assignment(row: &SqliteRow) -> Result<SegmentAssignment> {
    let updated_at: String = row.try_get("updated_at")?;

    Ok(SegmentAssignment {
        customer_id: row.try_get("customer_id")?,
        recency: row.try_get("recency")?,
        frequency: row.try_get("frequency")?,
        sales: row.try_get("sales")?,
        is_outlier: row.try_get("is_outlier")?,
        cluster: row.try_get("cluster")?,
        outlier_segment: row.try_get("outlier_segment")?,
        updated_at: parse_db_timestamp(&updated_at)?,
    })
}

/// Replacement set written but not yet committed
pub struct StagedReplace {
    tx: Transaction<'static, Sqlite>,
    rows: usize,
}

impl StagedReplace {
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Publish the staged set to readers
    pub async fn commit(self) -> Result<usize> {
        self.tx.commit().await?;
        tracing::debug!(rows = self.rows, "Segment store replaced");
        Ok(self.rows)
    }
}
