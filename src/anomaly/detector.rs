use chrono::{Datelike, Duration, NaiveDate, Utc, Weekday};
use tracing::{debug, info};

use super::{
    AnomalyType, Baseline, DetectedAnomaly, DetectorConfig, MetricDetectionConfig, Severity, Trend,
};
use crate::domain::{DailyMetrics, Metric};
use crate::error::StorageResult;
use crate::stats::{mean, std_dev};
use crate::storage::MetricsRepository;

/// Conversions falling further than this are an instrumentation failure.
const TRACKING_BREAK_PCT: f64 = -50.0;
/// Days of history loaded by [`run_anomaly_detection`].
const LOOKBACK_DAYS: i64 = 28;

const FATIGUE_MIN_POINTS: usize = 6;
const FATIGUE_DECLINE_PCT: f64 = 20.0;
const FATIGUE_HIGH_PCT: f64 = 40.0;

/// Ratio of same-weekday values to all values in `history`, clamped to `[0.5, 1.5]`.
///
/// Returns 1.0 when no same-weekday value exists or the overall mean is zero.
pub fn seasonality_factor(metric: Metric, history: &[DailyMetrics], weekday: Weekday) -> f64 {
    let all: Vec<f64> = history.iter().filter_map(|d| d.value(metric)).collect();
    let same_day: Vec<f64> = history
        .iter()
        .filter(|d| d.date.weekday() == weekday)
        .filter_map(|d| d.value(metric))
        .collect();

    match (mean(&all), mean(&same_day)) {
        (Some(overall), Some(day)) if overall.abs() > f64::EPSILON => {
            (day / overall).clamp(0.5, 1.5)
        }
        _ => 1.0,
    }
}

fn prior_rows(history: &[DailyMetrics], before: NaiveDate) -> Vec<&DailyMetrics> {
    let mut rows: Vec<&DailyMetrics> = history.iter().filter(|d| d.date < before).collect();
    rows.sort_by_key(|d| d.date);
    rows
}

fn baseline_window(
    config: &MetricDetectionConfig,
    min_samples: usize,
    current_date: NaiveDate,
    history: &[DailyMetrics],
) -> Option<(Baseline, Vec<f64>)> {
    let prior = prior_rows(history, current_date);
    let start = prior.len().saturating_sub(config.window_days);
    let values: Vec<f64> = prior[start..]
        .iter()
        .filter_map(|d| d.value(config.metric))
        .collect();

    if values.len() < min_samples.max(1) {
        return None;
    }

    let seasonality = if config.weekly_seasonality {
        let owned: Vec<DailyMetrics> = prior.iter().map(|d| (*d).clone()).collect();
        seasonality_factor(config.metric, &owned, current_date.weekday())
    } else {
        1.0
    };

    let baseline = Baseline {
        mean: mean(&values)?,
        std_dev: std_dev(&values).unwrap_or(0.0),
        sample_size: values.len(),
        seasonality_factor: seasonality,
    };
    Some((baseline, values))
}

/// Baseline for one metric from the rows preceding `current_date`.
///
/// `None` when the window holds fewer than the configured minimum samples.
pub fn compute_baseline(
    config: &MetricDetectionConfig,
    min_samples: usize,
    current_date: NaiveDate,
    history: &[DailyMetrics],
) -> Option<Baseline> {
    baseline_window(config, min_samples, current_date, history).map(|(baseline, _)| baseline)
}

/// Compare `current` against baselines built from `history` for every tracked metric.
///
/// Results are ordered from most to least severe.
pub fn detect_entity_anomalies(
    entity_id: &str,
    current: &DailyMetrics,
    history: &[DailyMetrics],
    config: &DetectorConfig,
) -> Vec<DetectedAnomaly> {
    let mut anomalies = Vec::new();

    for metric_config in &config.metrics {
        let metric = metric_config.metric;
        let Some(actual) = current.value(metric) else {
            continue;
        };
        let Some((baseline, window)) =
            baseline_window(metric_config, config.min_samples, current.date, history)
        else {
            debug!(entity_id, metric = %metric, "Not enough history for baseline");
            continue;
        };

        let expected = baseline.expected();
        if expected.abs() < f64::EPSILON {
            continue;
        }
        let deviation_pct = (actual - expected) / expected * 100.0;
        if !metric_config.direction.alerts_on(deviation_pct) {
            continue;
        }
        let Some(severity) = metric_config.thresholds.classify(deviation_pct.abs()) else {
            continue;
        };

        let anomaly_type = if metric == Metric::Conversions && deviation_pct < TRACKING_BREAK_PCT
        {
            AnomalyType::TrackingBreak
        } else if deviation_pct > 0.0 {
            AnomalyType::Spike(metric)
        } else {
            AnomalyType::Drop(metric)
        };

        let z_score = if baseline.std_dev > 0.0 {
            (actual - expected) / baseline.std_dev
        } else {
            0.0
        };

        anomalies.push(DetectedAnomaly {
            entity_id: entity_id.to_string(),
            metric_name: metric,
            anomaly_type,
            expected_value: expected,
            actual_value: actual,
            deviation_pct,
            severity,
            baseline,
            trend: Trend::of(&window),
            z_score,
            detected_at: Utc::now(),
        });
    }

    anomalies.sort_by(|a, b| b.severity.cmp(&a.severity));
    anomalies
}

/// Detect CTR erosion on stable or growing exposure.
///
/// Compares the mean of the three most recent points with the three
/// earliest. Needs at least six days with a defined CTR.
pub fn detect_creative_fatigue(entity_id: &str, history: &[DailyMetrics]) -> Option<DetectedAnomaly> {
    let mut rows: Vec<&DailyMetrics> = history.iter().collect();
    rows.sort_by_key(|d| d.date);

    let ctr: Vec<f64> = rows.iter().filter_map(|d| d.value(Metric::Ctr)).collect();
    let impressions: Vec<f64> = rows.iter().map(|d| d.impressions as f64).collect();
    if ctr.len() < FATIGUE_MIN_POINTS {
        return None;
    }

    if Trend::of(&ctr) != Trend::Decreasing || Trend::of(&impressions) == Trend::Decreasing {
        return None;
    }

    let early = mean(&ctr[..3])?;
    let recent = mean(&ctr[ctr.len() - 3..])?;
    if early <= 0.0 {
        return None;
    }
    let decline_pct = (early - recent) / early * 100.0;
    if decline_pct <= FATIGUE_DECLINE_PCT {
        return None;
    }

    let severity = if decline_pct > FATIGUE_HIGH_PCT {
        Severity::High
    } else {
        Severity::Medium
    };
    let sd = std_dev(&ctr).unwrap_or(0.0);

    Some(DetectedAnomaly {
        entity_id: entity_id.to_string(),
        metric_name: Metric::Ctr,
        anomaly_type: AnomalyType::CreativeFatigue,
        expected_value: early,
        actual_value: recent,
        deviation_pct: -decline_pct,
        severity,
        baseline: Baseline {
            mean: mean(&ctr)?,
            std_dev: sd,
            sample_size: ctr.len(),
            seasonality_factor: 1.0,
        },
        trend: Trend::Decreasing,
        z_score: if sd > 0.0 { (recent - early) / sd } else { 0.0 },
        detected_at: Utc::now(),
    })
}

/// Load recent history for an entity and run every detector on it.
///
/// The row dated `as_of` is the observation under test; when it is missing
/// the latest available row is used instead. No rows yields no anomalies.
pub async fn run_anomaly_detection(
    repo: &dyn MetricsRepository,
    entity_id: &str,
    as_of: NaiveDate,
    config: &DetectorConfig,
) -> StorageResult<Vec<DetectedAnomaly>> {
    let from = as_of - Duration::days(LOOKBACK_DAYS);
    let rows = repo.daily_metrics(entity_id, from, as_of).await?;

    let Some(current) = rows
        .iter()
        .find(|d| d.date == as_of)
        .or_else(|| rows.iter().max_by_key(|d| d.date))
    else {
        debug!(entity_id, %as_of, "No metrics available for anomaly detection");
        return Ok(Vec::new());
    };

    let history: Vec<DailyMetrics> = rows
        .iter()
        .filter(|d| d.date < current.date)
        .cloned()
        .collect();
    let mut anomalies = detect_entity_anomalies(entity_id, current, &history, config);

    let through_current: Vec<DailyMetrics> = rows
        .iter()
        .filter(|d| d.date <= current.date)
        .cloned()
        .collect();
    if let Some(fatigue) = detect_creative_fatigue(entity_id, &through_current) {
        anomalies.push(fatigue);
        anomalies.sort_by(|a, b| b.severity.cmp(&a.severity));
    }

    info!(
        entity_id,
        as_of = %current.date,
        history_days = history.len(),
        anomalies = anomalies.len(),
        "Anomaly detection completed"
    );
    Ok(anomalies)
}
