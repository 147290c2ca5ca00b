//! Segmentation Engine
//!
//! Seeded k-means (linfa) over standardised (sales, frequency, recency) points.
//!
//! **Determinism:** input is processed in customer-id order and linfa's
//! k-means++ initialisation draws from `StdRng::seed_from_u64(seed)`, so a
//! fixed population and config always produce the same labels. Labels are then
//! renumbered by ascending centroid (sales, frequency, recency) in original
//! units, so cluster 0 is the lowest-spending segment.

use linfa::prelude::*;
use linfa_clustering::KMeans;
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::config::SegmentationConfig;
use crate::error::SegmentationError;
use crate::models::FeatureVector;

const DIMS: usize = 3;

type Point = [f64; DIMS];

/// Result of clustering one population
#[derive(Debug, Clone, PartialEq)]
pub struct ClusteringOutcome {
    /// `(customer_id, cluster)` sorted by customer id
    pub labels: Vec<(String, i64)>,
    /// Centroids in original units, indexed by cluster id
    pub centroids: Vec<Point>,
    /// Clusters actually formed (configured k, reduced for small populations)
    pub k: usize,
    /// False when k-means hit the iteration cap before settling
    pub converged: bool,
    /// Sum of squared scaled distances to assigned centroids
    pub inertia: f64,
}

impl ClusteringOutcome {
    fn empty() -> Self {
        Self {
            labels: Vec::new(),
            centroids: Vec::new(),
            k: 0,
            converged: true,
            inertia: 0.0,
        }
    }

    pub fn label_map(&self) -> HashMap<&str, i64> {
        self.labels
            .iter()
            .map(|(customer, cluster)| (customer.as_str(), *cluster))
            .collect()
    }

    /// Members per cluster id
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.k];
        for (_, cluster) in &self.labels {
            sizes[*cluster as usize] += 1;
        }
        sizes
    }
}

/// Labels for the scaled rows, before canonical renumbering
struct Partition {
    labels: Vec<usize>,
    converged: bool,
    inertia: f64,
}

#[derive(Debug, Clone)]
pub struct SegmentationEngine {
    clusters: usize,
    seed: u64,
    max_iterations: usize,
    tolerance: f64,
    restarts: usize,
}

impl SegmentationEngine {
    pub fn new(config: &SegmentationConfig) -> Self {
        Self {
            clusters: config.clusters.max(1),
            seed: config.seed,
            max_iterations: config.max_iterations.max(1),
            tolerance: config.tolerance.max(f64::MIN_POSITIVE),
            restarts: config.restarts.max(1),
        }
    }

    /// Same engine with a different cluster count
    pub fn with_clusters(mut self, clusters: usize) -> Self {
        self.clusters = clusters.max(1);
        self
    }

    /// Assign every vector to one of `0..k` clusters
    pub fn cluster(&self, population: &[FeatureVector]) -> Result<ClusteringOutcome, SegmentationError> {
        if population.is_empty() {
            return Ok(ClusteringOutcome::empty());
        }

        let mut members: Vec<&FeatureVector> = population.iter().collect();
        members.sort_by(|a, b| a.customer_id.cmp(&b.customer_id));

        let raw: Vec<Point> = members.iter().map(|f| f.as_point()).collect();
        let scaled = standardise(&raw);
        let points: Vec<Point> = scaled
            .rows()
            .into_iter()
            .map(|row| [row[0], row[1], row[2]])
            .collect();

        let distinct = distinct_points(&points);
        let k = self.clusters.min(distinct.len());
        if k < self.clusters {
            tracing::info!(
                configured = self.clusters,
                effective = k,
                "Population has fewer distinct customers than clusters; reducing k"
            );
        }

        let partition = if k == distinct.len() {
            // Every distinct point is its own cluster
            Partition {
                labels: points
                    .iter()
                    .map(|p| {
                        distinct
                            .binary_search_by(|d| compare_points(d, p))
                            .unwrap_or_else(|index| index)
                    })
                    .collect(),
                converged: true,
                inertia: 0.0,
            }
        } else {
            self.fit_kmeans(&scaled, k)?
        };

        let (labels, centroids) = canonicalise(&raw, &partition.labels, k);
        let k = centroids.len();

        Ok(ClusteringOutcome {
            labels: members
                .iter()
                .zip(labels)
                .map(|(f, cluster)| (f.customer_id.clone(), cluster as i64))
                .collect(),
            centroids,
            k,
            converged: partition.converged,
            inertia: partition.inertia,
        })
    }

    /// Best of `restarts` seeded k-means runs
    ///
    /// linfa rejects a fit whose best run hit the iteration cap; that case is
    /// refitted with a single Lloyd step and reported as not converged.
    fn fit_kmeans(&self, scaled: &Array2<f64>, k: usize) -> Result<Partition, SegmentationError> {
        let dataset = DatasetBase::new(scaled.clone(), Array1::<usize>::zeros(scaled.nrows()));
        let params = |max_iterations: u64, tolerance: f64| {
            KMeans::params_with_rng(k, StdRng::seed_from_u64(self.seed))
                .n_runs(self.restarts)
                .max_n_iterations(max_iterations)
                .tolerance(tolerance)
        };

        let fitted = params(self.max_iterations as u64, self.tolerance).fit(&dataset);
        let (model, converged) = match fitted {
            Ok(model) => (model, true),
            Err(err) => {
                tracing::debug!(k, error = %err, "k-means fit rejected; refitting with a single step");
                let model = params(1, f64::MAX).fit(&dataset).map_err(|e| {
                    SegmentationError::Internal(format!("k-means failed for k={}: {}", k, e))
                })?;
                (model, false)
            }
        };

        let mut assignments = Array1::<usize>::zeros(scaled.nrows());
        model.predict_inplace(scaled, &mut assignments);

        let centroids = model.centroids();
        let inertia: f64 = scaled
            .rows()
            .into_iter()
            .zip(assignments.iter())
            .map(|(row, &cluster)| (&row - &centroids.row(cluster)).mapv(|v| v * v).sum())
            .sum();

        Ok(Partition {
            labels: assignments.to_vec(),
            converged,
            inertia,
        })
    }
}

/// Per-dimension z-scores; a zero-variance dimension is only centred
fn standardise(raw: &[Point]) -> Array2<f64> {
    let data = Array2::from_shape_fn((raw.len(), DIMS), |(i, d)| raw[i][d]);
    let mean = data
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(DIMS));
    let scale = data
        .std_axis(Axis(0), 0.0)
        .mapv(|std| if std > f64::EPSILON { std } else { 1.0 });
    (&data - &mean) / &scale
}

fn compare_points(a: &Point, b: &Point) -> Ordering {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| x.total_cmp(y))
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

fn distinct_points(points: &[Point]) -> Vec<Point> {
    let mut sorted = points.to_vec();
    sorted.sort_by(compare_points);
    sorted.dedup_by(|a, b| compare_points(a, b) == Ordering::Equal);
    sorted
}

fn mean_of<'a>(points: impl Iterator<Item = &'a Point>) -> Point {
    let mut sum = [0.0; DIMS];
    let mut count = 0usize;
    for point in points {
        for d in 0..DIMS {
            sum[d] += point[d];
        }
        count += 1;
    }
    if count > 0 {
        for value in sum.iter_mut() {
            *value /= count as f64;
        }
    }
    sum
}

/// Renumber clusters by ascending original-unit centroid and drop empty ones
fn canonicalise(raw: &[Point], labels: &[usize], k: usize) -> (Vec<usize>, Vec<Point>) {
    let mut groups: Vec<(usize, Point)> = (0..k)
        .filter(|c| labels.contains(c))
        .map(|c| {
            let centroid = mean_of(
                raw.iter()
                    .zip(labels)
                    .filter(|(_, label)| **label == c)
                    .map(|(p, _)| p),
            );
            (c, centroid)
        })
        .collect();

    groups.sort_by(|a, b| compare_points(&a.1, &b.1).then(a.0.cmp(&b.0)));

    let mut renumber = vec![0usize; k];
    for (new_label, (old_label, _)) in groups.iter().enumerate() {
        renumber[*old_label] = new_label;
    }

    let relabelled = labels.iter().map(|label| renumber[*label]).collect();
    let centroids = groups.into_iter().map(|(_, centroid)| centroid).collect();
    (relabelled, centroids)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fv(id: &str, recency: i64, frequency: i64, sales: f64) -> FeatureVector {
        FeatureVector {
            customer_id: id.to_string(),
            recency,
            frequency,
            sales,
        }
    }

    fn engine(clusters: usize) -> SegmentationEngine {
        SegmentationEngine::new(&SegmentationConfig {
            clusters,
            ..SegmentationConfig::default()
        })
    }

    /// Three well separated behaviour groups
    fn three_groups() -> Vec<FeatureVector> {
        let mut population = Vec::new();
        for i in 0..6 {
            population.push(fv(&format!("low{}", i), 200 + i, 1, 20.0 + i as f64));
            population.push(fv(&format!("mid{}", i), 40 + i, 5, 400.0 + 3.0 * i as f64));
            population.push(fv(&format!("top{}", i), 3 + i, 12, 2_000.0 + 10.0 * i as f64));
        }
        population
    }

    fn label_of(outcome: &ClusteringOutcome, customer: &str) -> i64 {
        outcome.label_map()[customer]
    }

    #[test]
    fn test_separates_obvious_groups() {
        let outcome = engine(3).cluster(&three_groups()).unwrap();

        assert_eq!(outcome.k, 3);
        assert!(outcome.converged);
        for i in 0..6 {
            assert_eq!(label_of(&outcome, &format!("low{}", i)), 0);
            assert_eq!(label_of(&outcome, &format!("mid{}", i)), 1);
            assert_eq!(label_of(&outcome, &format!("top{}", i)), 2);
        }
        assert_eq!(outcome.cluster_sizes(), vec![6, 6, 6]);
    }

    #[test]
    fn test_centroids_are_in_original_units_and_ordered() {
        let outcome = engine(3).cluster(&three_groups()).unwrap();

        assert_eq!(outcome.centroids.len(), 3);
        assert!((outcome.centroids[0][0] - 22.5).abs() < 1e-9);
        assert!(outcome.centroids[0][0] < outcome.centroids[1][0]);
        assert!(outcome.centroids[1][0] < outcome.centroids[2][0]);
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let population = three_groups();
        let first = engine(4).cluster(&population).unwrap();
        let second = engine(4).cluster(&population).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let population = three_groups();
        let mut shuffled = population.clone();
        shuffled.reverse();
        shuffled.swap(0, 7);

        assert_eq!(
            engine(4).cluster(&population).unwrap(),
            engine(4).cluster(&shuffled).unwrap()
        );
    }

    #[test]
    fn test_small_population_becomes_singletons() {
        let population = vec![fv("a", 5, 1, 10.0), fv("b", 50, 3, 300.0)];

        let outcome = engine(4).cluster(&population).unwrap();

        assert_eq!(outcome.k, 2);
        assert_eq!(label_of(&outcome, "a"), 0);
        assert_eq!(label_of(&outcome, "b"), 1);
    }

    #[test]
    fn test_identical_points_share_cluster_zero() {
        let population = vec![fv("a", 10, 1, 50.0), fv("b", 10, 1, 50.0)];

        let outcome = engine(2).cluster(&population).unwrap();

        assert_eq!(outcome.k, 1);
        assert_eq!(outcome.labels, vec![("a".to_string(), 0), ("b".to_string(), 0)]);
    }

    #[test]
    fn test_iteration_cap_still_returns_partition() {
        let engine = SegmentationEngine::new(&SegmentationConfig {
            clusters: 3,
            max_iterations: 1,
            tolerance: 1e-12,
            restarts: 1,
            ..SegmentationConfig::default()
        });

        let outcome = engine.cluster(&three_groups()).unwrap();

        assert_eq!(outcome.labels.len(), 18);
        assert!(outcome.labels.iter().all(|(_, c)| (*c as usize) < outcome.k));
    }

    #[test]
    fn test_scaling_keeps_sales_from_dominating() {
        // Sales spread (2000) dwarfs recency (300) in raw units but carries no group signal
        let mut population = Vec::new();
        for i in 0..5 {
            let sales = 10_000.0 + 500.0 * i as f64;
            population.push(fv(&format!("recent{}", i), 1 + i, 8, sales));
            population.push(fv(&format!("lapsed{}", i), 300 + i, 1, sales));
        }

        let outcome = engine(2).cluster(&population).unwrap();
        let recent = label_of(&outcome, "recent0");
        let lapsed = label_of(&outcome, "lapsed0");

        assert_ne!(recent, lapsed);
        for i in 0..5 {
            assert_eq!(label_of(&outcome, &format!("recent{}", i)), recent);
            assert_eq!(label_of(&outcome, &format!("lapsed{}", i)), lapsed);
        }
    }

    #[test]
    fn test_empty_population() {
        let outcome = engine(3).cluster(&[]).unwrap();
        assert!(outcome.labels.is_empty());
        assert_eq!(outcome.k, 0);
    }
}
