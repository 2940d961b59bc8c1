//! Before/after grading of applied recommendations.
//!
//! Lift is measured on the caller's primary metric. Significance comes from
//! a two-proportion z-test on the count-based rate that drives that metric
//! (see [`TestedRate::for_metric`]). Spend and impressions have no such rate
//! and are never reported as significant.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{ActionType, Metric, MetricTotals};
use crate::error::StorageResult;
use crate::stats::{clamp01, normal_cdf};
use crate::storage::MetricsRepository;

/// Trials per side below which no significance is claimed.
pub const MIN_TRIALS: u64 = 10;
/// Impressions per side below which the data is insufficient.
pub const MIN_IMPRESSIONS: u64 = 100;
/// p-value threshold for significance.
pub const SIGNIFICANCE_LEVEL: f64 = 0.05;

/// Verdict on an applied recommendation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Significant change in the desired direction
    Positive,
    /// Significant change against the desired direction
    Negative,
    /// No significant change
    Neutral,
    /// Too little traffic to judge
    InsufficientData,
}

impl Outcome {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Positive => "positive",
            Outcome::Negative => "negative",
            Outcome::Neutral => "neutral",
            Outcome::InsufficientData => "insufficient_data",
        }
    }
}

/// Matched windows to compare.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationInput {
    /// Recommendation being graded
    pub recommendation_id: String,
    /// Entity it was applied to
    pub entity_id: String,
    /// Metric the lift is measured on
    pub primary_metric: Metric,
    /// Totals before application
    pub before: MetricTotals,
    /// Totals after application
    pub after: MetricTotals,
}

/// Graded outcome of a recommendation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationResult {
    /// Recommendation graded
    pub recommendation_id: String,
    /// Entity it was applied to
    pub entity_id: String,
    /// Metric the lift is measured on
    pub primary_metric: Metric,
    /// Before window totals
    pub before_metrics: MetricTotals,
    /// After window totals
    pub after_metrics: MetricTotals,
    /// Primary metric before, `None` when undefined
    pub before_value: Option<f64>,
    /// Primary metric after, `None` when undefined
    pub after_value: Option<f64>,
    /// Relative change in percent, 0 when undefined
    pub lift_pct: f64,
    /// Two-sided p-value, 1.0 when untestable
    pub p_value: f64,
    /// `p_value < 0.05`
    pub is_significant: bool,
    /// Verdict
    pub outcome: Outcome,
    /// Evaluation time
    pub evaluated_at: DateTime<Utc>,
}

/// Two-sided p-value of a two-proportion z-test.
///
/// Returns 1.0 with fewer than [`MIN_TRIALS`] trials on either side or
/// when the pooled rate has no variance.
pub fn two_proportion_p_value(
    successes_a: u64,
    trials_a: u64,
    successes_b: u64,
    trials_b: u64,
) -> f64 {
    if trials_a < MIN_TRIALS || trials_b < MIN_TRIALS {
        return 1.0;
    }
    let (na, nb) = (trials_a as f64, trials_b as f64);
    let pa = (successes_a as f64 / na).min(1.0);
    let pb = (successes_b as f64 / nb).min(1.0);
    let pooled = clamp01(successes_a.saturating_add(successes_b) as f64 / (na + nb));
    let se = (pooled * (1.0 - pooled) * (1.0 / na + 1.0 / nb)).sqrt();
    if se <= 0.0 || !se.is_finite() {
        return 1.0;
    }
    let z = (pb - pa) / se;
    clamp01(2.0 * (1.0 - normal_cdf(z.abs())))
}

/// Count-based rate whose before/after change is tested for significance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TestedRate {
    /// Clicks over impressions
    ClickThrough,
    /// Conversions over clicks
    Conversion,
}

impl TestedRate {
    /// Rate tested for `metric`.
    ///
    /// CTR, clicks and CPC move with click-through. CVR, conversions, CPA,
    /// revenue and ROAS move with conversion rate; a revenue or ROAS change
    /// from order value alone is not tested. Spend and impressions have no
    /// rate and yield `None`.
    pub fn for_metric(metric: Metric) -> Option<TestedRate> {
        match metric {
            Metric::Ctr | Metric::Clicks | Metric::Cpc => Some(TestedRate::ClickThrough),
            Metric::Cvr | Metric::Conversions | Metric::Cpa | Metric::Revenue | Metric::Roas => {
                Some(TestedRate::Conversion)
            }
            Metric::Spend | Metric::Impressions => None,
        }
    }

    /// `(successes, trials)` for this rate.
    pub fn counts(&self, totals: &MetricTotals) -> (u64, u64) {
        match self {
            TestedRate::ClickThrough => (totals.clicks, totals.impressions),
            TestedRate::Conversion => (totals.conversions, totals.clicks),
        }
    }
}

/// Grade a recommendation from its before/after windows.
pub fn evaluate_recommendation(input: &EvaluationInput) -> EvaluationResult {
    let metric = input.primary_metric;
    let before_value = input.before.value(metric);
    let after_value = input.after.value(metric);

    let lift_pct = match (before_value, after_value) {
        (Some(b), Some(a)) if b.abs() > f64::EPSILON => (a - b) / b * 100.0,
        _ => 0.0,
    };

    let p_value = match TestedRate::for_metric(metric) {
        Some(rate) => {
            let (sa, na) = rate.counts(&input.before);
            let (sb, nb) = rate.counts(&input.after);
            two_proportion_p_value(sa, na, sb, nb)
        }
        None => 1.0,
    };
    let is_significant = p_value < SIGNIFICANCE_LEVEL;

    let outcome = if input.before.impressions < MIN_IMPRESSIONS
        || input.after.impressions < MIN_IMPRESSIONS
    {
        Outcome::InsufficientData
    } else if !is_significant || lift_pct == 0.0 {
        Outcome::Neutral
    } else {
        let improved = if metric.lower_is_better() {
            lift_pct < 0.0
        } else {
            lift_pct > 0.0
        };
        if improved {
            Outcome::Positive
        } else {
            Outcome::Negative
        }
    };

    EvaluationResult {
        recommendation_id: input.recommendation_id.clone(),
        entity_id: input.entity_id.clone(),
        primary_metric: metric,
        before_metrics: input.before.clone(),
        after_metrics: input.after.clone(),
        before_value,
        after_value,
        lift_pct,
        p_value,
        is_significant,
        outcome,
        evaluated_at: Utc::now(),
    }
}

/// A recommendation that was applied and can now be graded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedRecommendation {
    /// Recommendation identifier
    pub id: String,
    /// Entity it was applied to
    pub entity_id: String,
    /// What was done
    pub action_type: ActionType,
    /// Day the change took effect
    pub applied_on: NaiveDate,
    /// Metric the recommendation aimed to move
    pub primary_metric: Metric,
}

/// Fetch matched windows around the application day and grade them.
///
/// The before window is the `window_days` days preceding `applied_on`; the
/// after window the `window_days` days following it. The application day
/// itself belongs to neither.
pub async fn run_evaluation(
    repo: &dyn MetricsRepository,
    applied: &AppliedRecommendation,
    window_days: u32,
) -> StorageResult<EvaluationResult> {
    let window = Duration::days(i64::from(window_days.max(1)));
    let day = Duration::days(1);

    let before_rows = repo
        .daily_metrics(
            &applied.entity_id,
            applied.applied_on - window,
            applied.applied_on - day,
        )
        .await?;
    let after_rows = repo
        .daily_metrics(
            &applied.entity_id,
            applied.applied_on + day,
            applied.applied_on + window,
        )
        .await?;

    let result = evaluate_recommendation(&EvaluationInput {
        recommendation_id: applied.id.clone(),
        entity_id: applied.entity_id.clone(),
        primary_metric: applied.primary_metric,
        before: MetricTotals::from_days(&before_rows),
        after: MetricTotals::from_days(&after_rows),
    });

    info!(
        recommendation_id = %applied.id,
        action = %applied.action_type,
        metric = %applied.primary_metric,
        lift_pct = result.lift_pct,
        p_value = result.p_value,
        outcome = result.outcome.as_str(),
        "Recommendation evaluated"
    );
    Ok(result)
}
