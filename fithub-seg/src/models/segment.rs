//! Persisted segment assignments and derived cluster summaries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::FeatureVector;

/// Reserved cluster id for customers excluded as outliers
pub const OUTLIER_CLUSTER: i64 = -1;

/// The current segment of one customer
///
/// At most one per customer. Each run replaces the full set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentAssignment {
    pub customer_id: String,
    pub recency: i64,
    pub frequency: i64,
    pub sales: f64,
    pub is_outlier: bool,
    /// 0..k-1 for normal customers, [`OUTLIER_CLUSTER`] for outliers
    pub cluster: i64,
    /// Sub-segment among the outliers; `None` for normal customers and when
    /// outlier sub-clustering is disabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outlier_segment: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl SegmentAssignment {
    /// Assignment of a customer that took part in clustering
    pub fn clustered(features: &FeatureVector, cluster: i64, updated_at: DateTime<Utc>) -> Self {
        Self {
            customer_id: features.customer_id.clone(),
            recency: features.recency,
            frequency: features.frequency,
            sales: features.sales,
            is_outlier: false,
            cluster,
            outlier_segment: None,
            updated_at,
        }
    }

    /// Assignment of a customer placed in the outlier bucket
    pub fn outlier(
        features: &FeatureVector,
        outlier_segment: Option<i64>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            customer_id: features.customer_id.clone(),
            recency: features.recency,
            frequency: features.frequency,
            sales: features.sales,
            is_outlier: true,
            cluster: OUTLIER_CLUSTER,
            outlier_segment,
            updated_at,
        }
    }
}

/// Per-cluster statistics for the analytics dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSummary {
    pub cluster_id: i64,
    pub count: i64,
    pub avg_sales: f64,
    pub avg_frequency: f64,
    pub avg_recency: f64,
    /// Most recent assignment timestamp within the cluster
    pub last_update: DateTime<Utc>,
}
