//! Configuration for fithub-seg
//!
//! Bootstrap settings come from an optional TOML file
//! (`<config_dir>/fithub/fithub-seg.toml` unless overridden); every key has a
//! built-in default so the service starts with no file at all.

use chrono::{DateTime, Duration, Utc};
use fithub_common::config::LoggingConfig;
use fithub_common::db::{OrderRecord, OrderStatus, PaymentStatus};
use fithub_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::Dimension;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "FITHUB_SEG_CONFIG";

/// Config file name under the per-user config directory
pub const CONFIG_FILE_NAME: &str = "fithub-seg.toml";

/// Longest accepted order lookback (100 years)
pub const MAX_LOOKBACK_DAYS: u32 = 36_500;

/// Top-level service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Folder holding `fithub.db`
    pub root_folder: Option<PathBuf>,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub segmentation: SegmentationConfig,
    pub schedule: ScheduleConfig,
}

impl ServiceConfig {
    /// Reject values the job could not run with
    pub fn validate(&self) -> Result<()> {
        self.segmentation.validate()?;
        self.schedule.validate()
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5730,
        }
    }
}

/// Segmentation job parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Target number of normal clusters (k)
    pub clusters: usize,
    /// Seed for k-means++ initialisation
    pub seed: u64,
    /// Lloyd iteration cap per restart
    pub max_iterations: usize,
    /// Centroid shift (scaled units) below which a run counts as converged
    pub tolerance: f64,
    /// Independently seeded initialisations; lowest inertia wins
    pub restarts: usize,
    /// Sub-segments formed among the outliers; 0 leaves them unclustered
    pub outlier_clusters: usize,
    /// Whole-run deadline
    pub timeout_secs: u64,
    pub qualifying: QualifyingPolicy,
    pub outliers: OutlierRule,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            clusters: 4,
            seed: 42,
            max_iterations: 300,
            tolerance: 1e-4,
            restarts: 10,
            outlier_clusters: 2,
            timeout_secs: 300,
            qualifying: QualifyingPolicy::default(),
            outliers: OutlierRule::default(),
        }
    }
}

impl SegmentationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.clusters == 0 {
            return Err(Error::Config("segmentation.clusters must be at least 1".to_string()));
        }
        if self.max_iterations == 0 {
            return Err(Error::Config(
                "segmentation.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.restarts == 0 {
            return Err(Error::Config("segmentation.restarts must be at least 1".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "segmentation.timeout_secs must be at least 1".to_string(),
            ));
        }
        if !(self.tolerance > 0.0) || !self.tolerance.is_finite() {
            return Err(Error::Config(format!(
                "segmentation.tolerance must be a positive number, got {}",
                self.tolerance
            )));
        }
        self.qualifying.validate()?;
        self.outliers.validate()
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

/// Which orders count toward a customer's RFM features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualifyingPolicy {
    /// Admitted fulfilment statuses; empty admits all
    pub statuses: Vec<OrderStatus>,
    /// Admitted payment statuses; empty admits all
    pub payment_statuses: Vec<PaymentStatus>,
    /// Only orders from the last N days
    pub lookback_days: Option<u32>,
}

impl Default for QualifyingPolicy {
    fn default() -> Self {
        Self {
            statuses: vec![OrderStatus::Delivered],
            payment_statuses: Vec::new(),
            lookback_days: None,
        }
    }
}

impl QualifyingPolicy {
    /// Policy admitting every order regardless of status
    pub fn any_order() -> Self {
        Self {
            statuses: Vec::new(),
            payment_statuses: Vec::new(),
            lookback_days: None,
        }
    }

    fn validate(&self) -> Result<()> {
        match self.lookback_days {
            Some(days) if days > MAX_LOOKBACK_DAYS => Err(Error::Config(format!(
                "segmentation.qualifying.lookback_days must be at most {}, got {}",
                MAX_LOOKBACK_DAYS, days
            ))),
            _ => Ok(()),
        }
    }

    /// Earliest admitted order time for a run anchored at `now`
    ///
    /// A window reaching past the earliest representable time has no lower bound.
    pub fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.lookback_days
            .and_then(|days| now.checked_sub_signed(Duration::days(i64::from(days))))
    }

    pub fn admits(&self, order: &OrderRecord, now: DateTime<Utc>) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&order.status) {
            return false;
        }
        if !self.payment_statuses.is_empty()
            && !self.payment_statuses.contains(&order.payment_status)
        {
            return false;
        }
        match self.since(now) {
            Some(since) => order.created_at >= since,
            None => true,
        }
    }
}

/// Optional lower/upper bound on one dimension
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bounds {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl Bounds {
    pub fn contains(&self, value: f64) -> bool {
        self.lower.map_or(true, |lower| value >= lower)
            && self.upper.map_or(true, |upper| value <= upper)
    }

    fn validate(&self, name: &str) -> Result<()> {
        if let (Some(lower), Some(upper)) = (self.lower, self.upper) {
            if lower > upper {
                return Err(Error::Config(format!(
                    "outlier bounds for {} are inverted ({} > {})",
                    name, lower, upper
                )));
            }
        }
        Ok(())
    }
}

/// Rule used to flag statistically extreme customers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum OutlierRule {
    /// Tukey fences computed from the run's own population
    Fences {
        #[serde(default = "default_fence_multiplier")]
        multiplier: f64,
        #[serde(default = "default_fence_dimensions")]
        dimensions: Vec<Dimension>,
        /// Below this population size nobody is flagged
        #[serde(default = "default_min_population")]
        min_population: usize,
    },
    /// Fixed bounds per dimension
    Thresholds {
        #[serde(default)]
        sales: Bounds,
        #[serde(default)]
        frequency: Bounds,
        #[serde(default)]
        recency: Bounds,
    },
}

fn default_fence_multiplier() -> f64 {
    1.5
}

fn default_fence_dimensions() -> Vec<Dimension> {
    vec![Dimension::Sales, Dimension::Frequency]
}

fn default_min_population() -> usize {
    4
}

impl Default for OutlierRule {
    fn default() -> Self {
        OutlierRule::Fences {
            multiplier: default_fence_multiplier(),
            dimensions: default_fence_dimensions(),
            min_population: default_min_population(),
        }
    }
}

impl OutlierRule {
    fn validate(&self) -> Result<()> {
        match self {
            OutlierRule::Fences { multiplier, .. } => {
                if !(*multiplier >= 0.0) || !multiplier.is_finite() {
                    return Err(Error::Config(format!(
                        "outlier fence multiplier must be a non-negative number, got {}",
                        multiplier
                    )));
                }
                Ok(())
            }
            OutlierRule::Thresholds {
                sales,
                frequency,
                recency,
            } => {
                sales.validate("sales")?;
                frequency.validate("frequency")?;
                recency.validate("recency")
            }
        }
    }
}

/// Daily run schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    /// Local wall-clock hour (0-23)
    pub hour: u32,
    pub minute: u32,
    pub run_on_startup: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hour: 2,
            minute: 0,
            run_on_startup: true,
        }
    }
}

impl ScheduleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hour > 23 || self.minute > 59 {
            return Err(Error::Config(format!(
                "schedule time {:02}:{:02} is not a valid time of day",
                self.hour, self.minute
            )));
        }
        Ok(())
    }
}
