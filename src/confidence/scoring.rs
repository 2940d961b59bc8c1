//! Raw confidence scoring from six weighted statistical factors.
//!
//! Each factor maps a property of the input data to `[0, 1]`:
//!
//! | Factor | Weight | 1.0 when | Floor |
//! |---|---|---|---|
//! | data volume | 0.20 | ≥ 10,000 impressions | 0.3 at ≤ 1,000 |
//! | variance | 0.15 | CV ≤ 0.1 | 0.3 at CV ≥ 0.5 |
//! | freshness | 0.15 | ≤ 4h old | 0.2 at 48h |
//! | anomaly noise | 0.10 | no \|z\| > 2.5 points | 0.3 at ≥ 5 |
//! | historical accuracy | 0.25 | weighted past accuracy | 0.5 if unknown |
//! | sample size | 0.15 | threshold reached | 0.2 at zero |

use serde::{Deserialize, Serialize};

use crate::stats::{clamp01, mean, std_dev};

/// |z| above which a point counts as a significant anomaly.
pub const SIGNIFICANT_Z: f64 = 2.5;

const VOLUME_LOW: f64 = 1_000.0;
const VOLUME_HIGH: f64 = 10_000.0;
const CV_LOW: f64 = 0.1;
const CV_HIGH: f64 = 0.5;
const FRESH_HOURS: f64 = 4.0;
const STALE_HOURS: f64 = 48.0;
const STALE_FLOOR: f64 = 0.2;
const FACTOR_WARNING_LEVEL: f64 = 0.5;

// ============================================================================
// Factor calculators
// ============================================================================

/// Linear ramp 0.3 → 1.0 between 1,000 and 10,000 impressions.
pub fn data_volume_factor(impressions: u64) -> f64 {
    let imps = impressions as f64;
    if imps <= VOLUME_LOW {
        0.3
    } else if imps >= VOLUME_HIGH {
        1.0
    } else {
        0.3 + 0.7 * (imps - VOLUME_LOW) / (VOLUME_HIGH - VOLUME_LOW)
    }
}

/// Stability of a daily series from its coefficient of variation.
///
/// Series too short or centred on zero are scored neutral (0.5).
pub fn variance_factor(daily_values: &[f64]) -> f64 {
    let (Some(m), Some(sd)) = (mean(daily_values), std_dev(daily_values)) else {
        return 0.5;
    };
    if m.abs() < f64::EPSILON {
        return 0.5;
    }
    let cv = (sd / m).abs();
    if cv <= CV_LOW {
        1.0
    } else if cv >= CV_HIGH {
        0.3
    } else {
        1.0 - 0.7 * (cv - CV_LOW) / (CV_HIGH - CV_LOW)
    }
}

/// 1.0 within 4 hours, exponential decay reaching 0.2 at 48 hours.
pub fn freshness_factor(data_age_hours: f64) -> f64 {
    if data_age_hours <= FRESH_HOURS {
        return 1.0;
    }
    if data_age_hours >= STALE_HOURS {
        return STALE_FLOOR;
    }
    let k = (1.0 / STALE_FLOOR).ln() / (STALE_HOURS - FRESH_HOURS);
    clamp01((-k * (data_age_hours - FRESH_HOURS)).exp()).max(STALE_FLOOR)
}

/// Count points whose z-score within the series exceeds [`SIGNIFICANT_Z`].
pub fn count_significant_anomalies(daily_values: &[f64]) -> usize {
    let (Some(m), Some(sd)) = (mean(daily_values), std_dev(daily_values)) else {
        return 0;
    };
    if sd <= 0.0 {
        return 0;
    }
    daily_values
        .iter()
        .filter(|v| ((*v - m) / sd).abs() > SIGNIFICANT_Z)
        .count()
}

/// 1.0 with no significant anomalies, minus 0.14 each, floor 0.3 at five.
pub fn anomaly_noise_factor(significant_anomalies: usize) -> f64 {
    if significant_anomalies >= 5 {
        0.3
    } else {
        1.0 - 0.14 * significant_anomalies as f64
    }
}

/// One past observation of how accurate a recommendation turned out to be.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AccuracyObservation {
    /// Accuracy achieved, `[0, 1]`
    pub accuracy: f64,
    /// Relative weight of the observation
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// Weighted mean of past accuracy; 0.5 when nothing is known.
pub fn historical_accuracy_factor(observations: &[AccuracyObservation]) -> f64 {
    let total_weight: f64 = observations.iter().map(|o| o.weight.max(0.0)).sum();
    if total_weight <= 0.0 {
        return 0.5;
    }
    let weighted: f64 = observations
        .iter()
        .map(|o| clamp01(o.accuracy) * o.weight.max(0.0))
        .sum();
    clamp01(weighted / total_weight)
}

/// Which counter a sample-size check is measured against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SampleMetric {
    /// 30 conversions are enough
    Conversions,
    /// 100 clicks are enough
    Clicks,
}

impl SampleMetric {
    /// Count at which the sample is considered sufficient.
    pub fn threshold(&self) -> f64 {
        match self {
            SampleMetric::Conversions => 30.0,
            SampleMetric::Clicks => 100.0,
        }
    }
}

/// Ramp 0.2 → 1.0 against the metric-specific threshold.
pub fn sample_size_factor(count: u64, metric: SampleMetric) -> f64 {
    let progress = (count as f64 / metric.threshold()).min(1.0);
    0.2 + 0.8 * progress
}

// ============================================================================
// Weights and factors
// ============================================================================

/// Fixed weights of the six factors. Sum to 1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceWeights {
    /// Weight of impression volume
    pub data_volume: f64,
    /// Weight of series stability
    pub variance: f64,
    /// Weight of data age
    pub freshness: f64,
    /// Weight of outlier noise
    pub anomaly_noise: f64,
    /// Weight of past accuracy
    pub historical_accuracy: f64,
    /// Weight of sample sufficiency
    pub sample_size: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            data_volume: 0.20,
            variance: 0.15,
            freshness: 0.15,
            anomaly_noise: 0.10,
            historical_accuracy: 0.25,
            sample_size: 0.15,
        }
    }
}

impl ConfidenceWeights {
    /// Sum of all weights.
    pub fn total(&self) -> f64 {
        self.data_volume
            + self.variance
            + self.freshness
            + self.anomaly_noise
            + self.historical_accuracy
            + self.sample_size
    }
}

/// The six named factor scores, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[allow(missing_docs)]
pub struct ConfidenceFactors {
    pub data_volume: f64,
    pub variance: f64,
    pub freshness: f64,
    pub anomaly_noise: f64,
    pub historical_accuracy: f64,
    pub sample_size: f64,
}

impl ConfidenceFactors {
    fn named(&self) -> [(&'static str, f64); 6] {
        [
            ("data_volume", self.data_volume),
            ("variance", self.variance),
            ("freshness", self.freshness),
            ("anomaly_noise", self.anomaly_noise),
            ("historical_accuracy", self.historical_accuracy),
            ("sample_size", self.sample_size),
        ]
    }
}

/// Weighted sum of factor scores, clamped to `[0, 1]`.
pub fn calculate_confidence(factors: &ConfidenceFactors, weights: &ConfidenceWeights) -> f64 {
    let score = factors.data_volume * weights.data_volume
        + factors.variance * weights.variance
        + factors.freshness * weights.freshness
        + factors.anomaly_noise * weights.anomaly_noise
        + factors.historical_accuracy * weights.historical_accuracy
        + factors.sample_size * weights.sample_size;
    clamp01(score)
}

/// Discretised multiplier applied to recommendation strength.
pub fn recommendation_modifier(score: f64) -> f64 {
    match score {
        s if s <= 0.3 => 0.5,
        s if s <= 0.5 => 0.7,
        s if s <= 0.7 => 0.9,
        _ => 1.0,
    }
}

// ============================================================================
// Full calculation
// ============================================================================

/// Inputs for a full confidence calculation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceParams {
    /// Impressions backing the analysis
    pub impressions: u64,
    /// Daily values of the metric under analysis
    #[serde(default)]
    pub daily_values: Vec<f64>,
    /// Hours since the data was refreshed
    #[serde(default)]
    pub data_age_hours: f64,
    /// Past accuracy observations for similar recommendations
    #[serde(default)]
    pub historical_accuracy: Vec<AccuracyObservation>,
    /// Counter measured for sample size
    pub sample_count: u64,
    /// Which counter `sample_count` is
    pub sample_metric: SampleMetric,
}

/// Score, factor breakdown, warnings and modifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceResult {
    /// Final score in `[0, 1]`
    pub score: f64,
    /// Individual factor scores
    pub factors: ConfidenceFactors,
    /// One warning per factor below 0.5
    pub warnings: Vec<String>,
    /// Multiplier for recommendation strength
    pub recommendation_modifier: f64,
}

/// Compute every factor for `params` and combine them with the default weights.
pub fn calculate_full_confidence(params: &ConfidenceParams) -> ConfidenceResult {
    let factors = ConfidenceFactors {
        data_volume: data_volume_factor(params.impressions),
        variance: variance_factor(&params.daily_values),
        freshness: freshness_factor(params.data_age_hours),
        anomaly_noise: anomaly_noise_factor(count_significant_anomalies(&params.daily_values)),
        historical_accuracy: historical_accuracy_factor(&params.historical_accuracy),
        sample_size: sample_size_factor(params.sample_count, params.sample_metric),
    };
    let score = calculate_confidence(&factors, &ConfidenceWeights::default());

    let warnings = factors
        .named()
        .iter()
        .filter(|(_, value)| *value < FACTOR_WARNING_LEVEL)
        .map(|(name, value)| format!("Low {} factor ({:.2})", name, value))
        .collect();

    ConfidenceResult {
        score,
        factors,
        warnings,
        recommendation_modifier: recommendation_modifier(score),
    }
}
