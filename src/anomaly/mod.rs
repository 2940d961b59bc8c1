//! Anomaly detection over daily entity metrics.
//!
//! Every tracked metric has its own baseline window, severity thresholds and
//! alerting direction. The current day is compared against the
//! seasonally adjusted baseline; deviations in the non-alerting direction
//! are ignored. Creative fatigue is detected separately as a compound
//! CTR/impressions pattern.

mod detector;

pub use detector::{
    compute_baseline, detect_creative_fatigue, detect_entity_anomalies, run_anomaly_detection,
    seasonality_factor,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Metric;

// ============================================================================
// Configuration
// ============================================================================

/// Which direction of deviation raises an alert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertDirection {
    /// Only values above the baseline
    Increase,
    /// Only values below the baseline
    Decrease,
    /// Either direction
    Both,
}

impl AlertDirection {
    /// Whether a signed deviation should be considered at all.
    pub fn alerts_on(&self, deviation_pct: f64) -> bool {
        match self {
            AlertDirection::Increase => deviation_pct > 0.0,
            AlertDirection::Decrease => deviation_pct < 0.0,
            AlertDirection::Both => deviation_pct != 0.0,
        }
    }
}

/// Absolute percentage deviations at which each severity starts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SeverityThresholds {
    /// Minimum deviation for `low`
    pub low: f64,
    /// Minimum deviation for `medium`
    pub medium: f64,
    /// Minimum deviation for `high`
    pub high: f64,
    /// Minimum deviation for `critical`
    pub critical: f64,
}

impl SeverityThresholds {
    /// Build from ascending thresholds.
    pub const fn new(low: f64, medium: f64, high: f64, critical: f64) -> Self {
        Self {
            low,
            medium,
            high,
            critical,
        }
    }

    /// Severity of an absolute deviation, `None` below the lowest tier.
    pub fn classify(&self, abs_deviation_pct: f64) -> Option<Severity> {
        if abs_deviation_pct >= self.critical {
            Some(Severity::Critical)
        } else if abs_deviation_pct >= self.high {
            Some(Severity::High)
        } else if abs_deviation_pct >= self.medium {
            Some(Severity::Medium)
        } else if abs_deviation_pct >= self.low {
            Some(Severity::Low)
        } else {
            None
        }
    }
}

/// Detection settings for one metric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricDetectionConfig {
    /// Metric to watch
    pub metric: Metric,
    /// Days of history forming the baseline
    pub window_days: usize,
    /// Apply the day-of-week multiplier
    pub weekly_seasonality: bool,
    /// Severity tiers
    pub thresholds: SeverityThresholds,
    /// Alerting direction
    pub direction: AlertDirection,
}

/// Detector settings for all tracked metrics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectorConfig {
    /// Per-metric settings
    pub metrics: Vec<MetricDetectionConfig>,
    /// Baseline samples required before a metric is evaluated
    pub min_samples: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        let tracked = |metric, window_days, weekly_seasonality, thresholds, direction| {
            MetricDetectionConfig {
                metric,
                window_days,
                weekly_seasonality,
                thresholds,
                direction,
            }
        };
        Self {
            metrics: vec![
                tracked(
                    Metric::Spend,
                    7,
                    true,
                    SeverityThresholds::new(20.0, 35.0, 50.0, 75.0),
                    AlertDirection::Both,
                ),
                tracked(
                    Metric::Cpa,
                    14,
                    false,
                    SeverityThresholds::new(15.0, 25.0, 40.0, 60.0),
                    AlertDirection::Increase,
                ),
                tracked(
                    Metric::Roas,
                    14,
                    true,
                    SeverityThresholds::new(15.0, 25.0, 40.0, 60.0),
                    AlertDirection::Decrease,
                ),
                tracked(
                    Metric::Ctr,
                    7,
                    false,
                    SeverityThresholds::new(15.0, 25.0, 40.0, 60.0),
                    AlertDirection::Decrease,
                ),
                tracked(
                    Metric::Cvr,
                    14,
                    false,
                    SeverityThresholds::new(15.0, 25.0, 40.0, 60.0),
                    AlertDirection::Decrease,
                ),
                tracked(
                    Metric::Conversions,
                    7,
                    true,
                    SeverityThresholds::new(20.0, 35.0, 50.0, 70.0),
                    AlertDirection::Decrease,
                ),
            ],
            min_samples: 3,
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Severity tiers, ordered from least to most severe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Worth a look
    Low,
    /// Should be reviewed
    Medium,
    /// Needs action soon
    High,
    /// Needs action now
    Critical,
}

impl Severity {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Numeric weight used when ranking actions.
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Low => 0.25,
            Severity::Medium => 0.5,
            Severity::High => 0.75,
            Severity::Critical => 1.0,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classification of a detected anomaly.
///
/// Serialized as a flat string such as `roas_drop` or `tracking_break`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum AnomalyType {
    /// Metric rose above its baseline
    Spike(Metric),
    /// Metric fell below its baseline
    Drop(Metric),
    /// Conversions collapsed, pointing at instrumentation rather than performance
    TrackingBreak,
    /// CTR erosion on stable or rising exposure
    CreativeFatigue,
}

impl AnomalyType {
    /// Convert to string representation.
    pub fn as_str(&self) -> String {
        match self {
            AnomalyType::Spike(metric) => format!("{}_spike", metric),
            AnomalyType::Drop(metric) => format!("{}_drop", metric),
            AnomalyType::TrackingBreak => "tracking_break".to_string(),
            AnomalyType::CreativeFatigue => "creative_fatigue".to_string(),
        }
    }
}

impl std::fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AnomalyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tracking_break" => return Ok(AnomalyType::TrackingBreak),
            "creative_fatigue" => return Ok(AnomalyType::CreativeFatigue),
            _ => {}
        }
        if let Some(metric) = s.strip_suffix("_spike") {
            return metric.parse().map(AnomalyType::Spike);
        }
        if let Some(metric) = s.strip_suffix("_drop") {
            return metric.parse().map(AnomalyType::Drop);
        }
        Err(format!("Unknown anomaly type: {}", s))
    }
}

impl From<AnomalyType> for String {
    fn from(value: AnomalyType) -> Self {
        value.as_str()
    }
}

impl TryFrom<String> for AnomalyType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Direction of a metric over its baseline window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

impl Trend {
    /// Compare the mean of the last three values against the first three.
    ///
    /// Moves within ±5% are `Stable`; fewer than two values are `Stable`.
    pub fn of(values: &[f64]) -> Trend {
        if values.len() < 2 {
            return Trend::Stable;
        }
        let span = values.len().min(3);
        let head = values[..span].iter().sum::<f64>() / span as f64;
        let tail = values[values.len() - span..].iter().sum::<f64>() / span as f64;
        if head.abs() < f64::EPSILON {
            return if tail > 0.0 {
                Trend::Increasing
            } else {
                Trend::Stable
            };
        }
        let change = (tail - head) / head.abs();
        if change > 0.05 {
            Trend::Increasing
        } else if change < -0.05 {
            Trend::Decreasing
        } else {
            Trend::Stable
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Increasing => "increasing",
            Trend::Decreasing => "decreasing",
            Trend::Stable => "stable",
        }
    }
}

/// Baseline statistics a deviation was measured against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Baseline {
    /// Mean over the window
    pub mean: f64,
    /// Sample standard deviation over the window
    pub std_dev: f64,
    /// Number of samples in the window
    pub sample_size: usize,
    /// Day-of-week multiplier applied to the mean
    pub seasonality_factor: f64,
}

impl Baseline {
    /// Seasonally adjusted expectation.
    pub fn expected(&self) -> f64 {
        self.mean * self.seasonality_factor
    }
}

/// One anomaly found on an entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectedAnomaly {
    /// Entity the anomaly belongs to
    pub entity_id: String,
    /// Metric that deviated
    pub metric_name: Metric,
    /// Classification
    pub anomaly_type: AnomalyType,
    /// Seasonally adjusted expectation
    pub expected_value: f64,
    /// Observed value
    pub actual_value: f64,
    /// Signed percentage deviation from the expectation
    pub deviation_pct: f64,
    /// Severity tier
    pub severity: Severity,
    /// Baseline snapshot
    pub baseline: Baseline,
    /// Direction of the metric over the window
    pub trend: Trend,
    /// Standard score of the observation, 0 when the window has no spread
    pub z_score: f64,
    /// Detection time
    pub detected_at: DateTime<Utc>,
}
