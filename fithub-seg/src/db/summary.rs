//! Segment Aggregation Reader
//!
//! Per-cluster statistics for the analytics dashboard, computed on demand
//! from the current segment set. Read-only.

use fithub_common::time::parse_db_timestamp;
use fithub_common::Result;
use sqlx::{Row, SqlitePool};

use crate::models::ClusterSummary;

#[derive(Clone)]
pub struct SegmentSummaryReader {
    pool: SqlitePool,
}

impl SegmentSummaryReader {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Group assignments by cluster, ascending cluster id
    ///
    /// Returns an empty list when nothing has been stored yet.
    pub async fn summarize(&self) -> Result<Vec<ClusterSummary>> {
        // Stored timestamps are fixed-width UTC, so MAX() is the latest
        let rows = sqlx::query(
            r#"
            SELECT cluster,
                   COUNT(*) AS count,
                   AVG(sales) AS avg_sales,
                   AVG(frequency) AS avg_frequency,
                   AVG(recency) AS avg_recency,
                   MAX(updated_at) AS last_update
            FROM customer_segments
            GROUP BY cluster
            ORDER BY cluster ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ClusterSummary> {
                let last_update: String = row.try_get("last_update")?;
                Ok(ClusterSummary {
                    cluster_id: row.try_get("cluster")?,
                    count: row.try_get("count")?,
                    avg_sales: row.try_get("avg_sales")?,
                    avg_frequency: row.try_get("avg_frequency")?,
                    avg_recency: row.try_get("avg_recency")?,
                    last_update: parse_db_timestamp(&last_update)?,
                })
            })
            .collect()
    }
}
