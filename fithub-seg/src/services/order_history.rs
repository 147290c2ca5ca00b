//! Order History Reader
//!
//! Reads order rows and folds them into one RFM feature vector per customer
//! with at least one qualifying order.

use chrono::{DateTime, Utc};
use fithub_common::db::{fetch_orders, OrderRecord};
use fithub_common::time::whole_days_between;
use sqlx::SqlitePool;
use std::collections::BTreeMap;

use crate::config::QualifyingPolicy;
use crate::error::SegmentationError;
use crate::models::FeatureVector;

/// Read-only view over the storefront's order table
#[derive(Clone)]
pub struct OrderHistoryReader {
    pool: SqlitePool,
    policy: QualifyingPolicy,
}

impl OrderHistoryReader {
    pub fn new(pool: SqlitePool, policy: QualifyingPolicy) -> Self {
        Self { pool, policy }
    }

    /// Extract feature vectors for a run anchored at `now`
    ///
    /// Any read failure aborts the extraction; partial results are never
    /// returned.
    pub async fn extract(&self, now: DateTime<Utc>) -> Result<Vec<FeatureVector>, SegmentationError> {
        let orders = fetch_orders(&self.pool, self.policy.since(now))
            .await
            .map_err(|e| SegmentationError::DataSourceUnavailable(e.to_string()))?;

        tracing::debug!(orders = orders.len(), "Order history loaded");

        Ok(aggregate_rfm(&orders, &self.policy, now))
    }
}

struct Accumulator {
    latest: DateTime<Utc>,
    frequency: i64,
    sales: f64,
}

/// Fold orders into RFM vectors, sorted by customer id
///
/// Recency counts whole days from the latest qualifying order to `now`;
/// orders stamped after `now` count as recency 0.
pub fn aggregate_rfm(
    orders: &[OrderRecord],
    policy: &QualifyingPolicy,
    now: DateTime<Utc>,
) -> Vec<FeatureVector> {
    let mut per_customer: BTreeMap<&str, Accumulator> = BTreeMap::new();

    for order in orders.iter().filter(|o| policy.admits(o, now)) {
        per_customer
            .entry(order.customer_id.as_str())
            .and_modify(|acc| {
                acc.latest = acc.latest.max(order.created_at);
                acc.frequency += 1;
                acc.sales += order.total_amount;
            })
            .or_insert(Accumulator {
                latest: order.created_at,
                frequency: 1,
                sales: order.total_amount,
            });
    }

    per_customer
        .into_iter()
        .map(|(customer_id, acc)| FeatureVector {
            customer_id: customer_id.to_string(),
            recency: whole_days_between(acc.latest, now),
            frequency: acc.frequency,
            sales: acc.sales.max(0.0),
        })
        .collect()
}
