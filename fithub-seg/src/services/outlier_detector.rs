//! Outlier Detector
//!
//! Splits a run's population into normal customers (clustered) and outliers
//! (placed in the reserved outlier bucket). Bounds are derived from sorted
//! columns so the result does not depend on input order.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::config::{Bounds, OutlierRule};
use crate::models::{Dimension, FeatureVector};

/// Effective bounds applied to one dimension during a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DimensionFence {
    pub dimension: Dimension,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl DimensionFence {
    fn admits(&self, features: &FeatureVector) -> bool {
        let bounds = Bounds {
            lower: self.lower,
            upper: self.upper,
        };
        bounds.contains(self.dimension.value(features))
    }
}

/// Result of partitioning a population
#[derive(Debug, Clone, Default)]
pub struct OutlierPartition {
    /// Sorted by customer id
    pub normal: Vec<FeatureVector>,
    /// Sorted by customer id
    pub outliers: Vec<FeatureVector>,
    /// Bounds that were applied (empty when nothing could be flagged)
    pub fences: Vec<DimensionFence>,
}

#[derive(Debug, Clone)]
pub struct OutlierDetector {
    rule: OutlierRule,
}

impl OutlierDetector {
    pub fn new(rule: OutlierRule) -> Self {
        Self { rule }
    }

    pub fn partition(&self, population: &[FeatureVector]) -> OutlierPartition {
        let fences = self.fences_for(population);

        let mut sorted: Vec<&FeatureVector> = population.iter().collect();
        sorted.sort_by(|a, b| a.customer_id.cmp(&b.customer_id));

        let mut partition = OutlierPartition {
            fences,
            ..OutlierPartition::default()
        };

        for features in sorted {
            if partition.fences.iter().all(|fence| fence.admits(features)) {
                partition.normal.push(features.clone());
            } else {
                partition.outliers.push(features.clone());
            }
        }

        partition
    }

    fn fences_for(&self, population: &[FeatureVector]) -> Vec<DimensionFence> {
        match &self.rule {
            OutlierRule::Fences {
                multiplier,
                dimensions,
                min_population,
            } => {
                if population.is_empty() || population.len() < *min_population {
                    return Vec::new();
                }

                let unique: BTreeSet<Dimension> = dimensions.iter().copied().collect();
                unique
                    .into_iter()
                    .filter_map(|dimension| {
                        let mut column: Vec<f64> =
                            population.iter().map(|f| dimension.value(f)).collect();
                        column.sort_by(|a, b| a.total_cmp(b));

                        let q1 = quantile(&column, 0.25);
                        let q3 = quantile(&column, 0.75);
                        let iqr = q3 - q1;

                        // A collapsed spread would flag every value off the median
                        if iqr <= 0.0 {
                            return None;
                        }

                        Some(DimensionFence {
                            dimension,
                            lower: Some(q1 - multiplier * iqr),
                            upper: Some(q3 + multiplier * iqr),
                        })
                    })
                    .collect()
            }
            OutlierRule::Thresholds {
                sales,
                frequency,
                recency,
            } => [
                (Dimension::Sales, sales),
                (Dimension::Frequency, frequency),
                (Dimension::Recency, recency),
            ]
            .into_iter()
            .filter(|(_, bounds)| bounds.lower.is_some() || bounds.upper.is_some())
            .map(|(dimension, bounds)| DimensionFence {
                dimension,
                lower: bounds.lower,
                upper: bounds.upper,
            })
            .collect(),
        }
    }
}

/// Linear-interpolated quantile of a sorted, non-empty column
fn quantile(sorted: &[f64], p: f64) -> f64 {
    let position = p * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}
