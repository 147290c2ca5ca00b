//! Per-customer RFM feature vectors

use serde::{Deserialize, Serialize};

/// Recency / frequency / monetary features for one customer
///
/// Computed fresh for every run against a single "now" anchor; never stored
/// directly (the segment assignment keeps a snapshot of these values).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Opaque reference to the customer account
    pub customer_id: String,
    /// Whole days since the most recent qualifying order (>= 0)
    pub recency: i64,
    /// Number of qualifying orders (>= 1)
    pub frequency: i64,
    /// Sum of qualifying order totals (>= 0)
    pub sales: f64,
}

impl FeatureVector {
    /// Features in clustering order: sales, frequency, recency
    pub fn as_point(&self) -> [f64; 3] {
        [self.sales, self.frequency as f64, self.recency as f64]
    }
}

/// One axis of the RFM space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Sales,
    Frequency,
    Recency,
}

impl Dimension {
    pub fn value(&self, features: &FeatureVector) -> f64 {
        match self {
            Dimension::Sales => features.sales,
            Dimension::Frequency => features.frequency as f64,
            Dimension::Recency => features.recency as f64,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Sales => "sales",
            Dimension::Frequency => "frequency",
            Dimension::Recency => "recency",
        }
    }
}
