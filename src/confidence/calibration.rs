//! Bucket-based calibration of raw confidence scores.
//!
//! Scores fall into five 0.2-wide buckets. Each bucket tracks the accuracy
//! it was expected to have and the accuracy actually observed; calibration
//! rescales a score by `observed / predicted` for its bucket.
//!
//! Calibration is a one-shot correction. Applying it to an already
//! calibrated score changes the value again unless the bucket factor is 1.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StorageResult;
use crate::stats::clamp01;

/// Number of calibration buckets.
pub const BUCKET_COUNT: usize = 5;
/// Width of each bucket.
pub const BUCKET_WIDTH: f64 = 0.2;
/// Brier score below which a model is considered well calibrated.
pub const WELL_CALIBRATED_BRIER: f64 = 0.15;

const DEFAULT_PREDICTED: [f64; BUCKET_COUNT] = [0.1, 0.3, 0.5, 0.7, 0.9];
const DEFAULT_OBSERVED: [f64; BUCKET_COUNT] = [0.15, 0.32, 0.48, 0.65, 0.82];

// ============================================================================
// Buckets
// ============================================================================

/// Accuracy statistics for one confidence range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationBucket {
    /// Inclusive lower bound of the range
    pub lower: f64,
    /// Exclusive upper bound (inclusive for the last bucket)
    pub upper: f64,
    /// Accuracy the raw scores in this range claim
    pub predicted_accuracy: f64,
    /// Accuracy actually observed
    pub observed_accuracy: f64,
    /// Outcomes folded into `observed_accuracy` since startup
    pub sample_count: u64,
}

impl CalibrationBucket {
    /// `observed / predicted`, or 1.0 when the prediction is zero.
    pub fn adjustment_factor(&self) -> f64 {
        if self.predicted_accuracy <= 0.0 {
            1.0
        } else {
            self.observed_accuracy / self.predicted_accuracy
        }
    }
}

/// Index of the bucket containing `score`.
pub fn bucket_index(score: f64) -> usize {
    let idx = (clamp01(score) / BUCKET_WIDTH).floor() as usize;
    idx.min(BUCKET_COUNT - 1)
}

/// Snapshot of all five buckets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationTable {
    /// Buckets in ascending order
    pub buckets: Vec<CalibrationBucket>,
}

impl Default for CalibrationTable {
    fn default() -> Self {
        let buckets = (0..BUCKET_COUNT)
            .map(|i| CalibrationBucket {
                lower: i as f64 * BUCKET_WIDTH,
                upper: (i + 1) as f64 * BUCKET_WIDTH,
                predicted_accuracy: DEFAULT_PREDICTED[i],
                observed_accuracy: DEFAULT_OBSERVED[i],
                sample_count: 0,
            })
            .collect();
        Self { buckets }
    }
}

impl CalibrationTable {
    /// Bucket that `score` falls into.
    pub fn bucket_for(&self, score: f64) -> Option<&CalibrationBucket> {
        self.buckets.get(bucket_index(score))
    }
}

// ============================================================================
// Calibration
// ============================================================================

/// Original and calibrated confidence for one score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationResult {
    /// Raw input score
    pub original_confidence: f64,
    /// Score after bucket adjustment, in `[0, 1]`
    pub calibrated_confidence: f64,
    /// `observed / predicted` for the bucket
    pub adjustment_factor: f64,
    /// Bucket index used
    pub bucket: usize,
}

/// Calibrate `score` against `table`.
pub fn calibrate_with(table: &CalibrationTable, score: f64) -> CalibrationResult {
    let original = clamp01(score);
    let bucket = bucket_index(original);
    let factor = table
        .buckets
        .get(bucket)
        .map(CalibrationBucket::adjustment_factor)
        .unwrap_or(1.0);

    CalibrationResult {
        original_confidence: original,
        calibrated_confidence: clamp01(original * factor),
        adjustment_factor: factor,
        bucket,
    }
}

/// Calibrate `score` against the default bucket table.
pub fn calibrate_confidence(score: f64) -> CalibrationResult {
    calibrate_with(&CalibrationTable::default(), score)
}

/// One recorded outcome: what was claimed and whether it held.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CalibrationOutcome {
    /// Confidence attached to the recommendation
    pub confidence: f64,
    /// Whether the recommendation turned out correct
    pub correct: bool,
}

/// Mean squared error between confidence and binary correctness.
///
/// Returns `None` for an empty slice.
pub fn brier_score(outcomes: &[CalibrationOutcome]) -> Option<f64> {
    if outcomes.is_empty() {
        return None;
    }
    let total: f64 = outcomes
        .iter()
        .map(|o| {
            let actual = if o.correct { 1.0 } else { 0.0 };
            (clamp01(o.confidence) - actual).powi(2)
        })
        .sum();
    Some(total / outcomes.len() as f64)
}

/// Brier score of recorded outcomes and its verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationReport {
    /// Mean squared error, `None` with no outcomes
    pub brier_score: Option<f64>,
    /// Brier score below [`WELL_CALIBRATED_BRIER`]
    pub well_calibrated: bool,
    /// Outcomes the report covers
    pub outcome_count: usize,
}

impl CalibrationReport {
    /// Build a report over `outcomes`.
    pub fn from_outcomes(outcomes: &[CalibrationOutcome]) -> Self {
        let brier = brier_score(outcomes);
        Self {
            brier_score: brier,
            well_calibrated: brier.is_some_and(|b| b < WELL_CALIBRATED_BRIER),
            outcome_count: outcomes.len(),
        }
    }
}

// ============================================================================
// Calibration store
// ============================================================================

/// Source of the current calibration table and sink for new outcomes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CalibrationStore: Send + Sync {
    /// Current bucket table.
    async fn table(&self) -> StorageResult<CalibrationTable>;

    /// Fold an observed outcome into its bucket.
    async fn record_outcome(&self, confidence: f64, correct: bool) -> StorageResult<()>;

    /// Brier score over every outcome recorded so far.
    async fn calibration_report(&self) -> StorageResult<CalibrationReport>;
}

/// Calibrate `score` against the store's current table.
pub async fn calibrate_from_store(
    store: &dyn CalibrationStore,
    score: f64,
) -> StorageResult<CalibrationResult> {
    let table = store.table().await?;
    Ok(calibrate_with(&table, score))
}

#[derive(Debug, Default)]
struct CalibrationState {
    table: CalibrationTable,
    outcomes: Vec<CalibrationOutcome>,
}

/// Process-local calibration store seeded with the default table.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCalibrationStore {
    state: Arc<RwLock<CalibrationState>>,
}

impl InMemoryCalibrationStore {
    /// Create a store with the default table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store from an existing table snapshot.
    pub fn with_table(table: CalibrationTable) -> Self {
        Self {
            state: Arc::new(RwLock::new(CalibrationState {
                table,
                outcomes: Vec::new(),
            })),
        }
    }
}

#[async_trait]
impl CalibrationStore for InMemoryCalibrationStore {
    async fn table(&self) -> StorageResult<CalibrationTable> {
        Ok(self.state.read().await.table.clone())
    }

    async fn record_outcome(&self, confidence: f64, correct: bool) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let idx = bucket_index(confidence);
        if let Some(bucket) = state.table.buckets.get_mut(idx) {
            // Running mean seeded by the prior observed accuracy as one sample
            let n = bucket.sample_count as f64 + 1.0;
            let value = if correct { 1.0 } else { 0.0 };
            bucket.observed_accuracy += (value - bucket.observed_accuracy) / (n + 1.0);
            bucket.observed_accuracy = clamp01(bucket.observed_accuracy);
            bucket.sample_count += 1;
            debug!(
                bucket = idx,
                observed = bucket.observed_accuracy,
                samples = bucket.sample_count,
                "Calibration bucket updated"
            );
        }
        state.outcomes.push(CalibrationOutcome {
            confidence: clamp01(confidence),
            correct,
        });
        Ok(())
    }

    async fn calibration_report(&self) -> StorageResult<CalibrationReport> {
        Ok(CalibrationReport::from_outcomes(&self.state.read().await.outcomes))
    }
}
