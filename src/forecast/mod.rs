//! Time-horizon forecasting and what-if simulation.
//!
//! Forecasts pick a model per metric: linear regression when it explains
//! the history well enough (R² > 0.3), otherwise a 7-point moving average.
//! Each projected day carries a confidence band that widens with distance.
//! Series shorter than three points get a flat ±30% forecast.

mod what_if;

pub use what_if::{
    run_what_if_simulation, Driver, Intervention, InterventionOp, SimulatedMetric, WhatIfParams,
    WhatIfScenario,
};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{DailyMetrics, Metric};
use crate::stats::{clamp01, linear_regression, mean, std_dev};

const MIN_POINTS: usize = 3;
const FLAT_BAND: f64 = 0.3;
const FLAT_CONFIDENCE: f64 = 0.3;
const R_SQUARED_THRESHOLD: f64 = 0.3;
const MOVING_AVERAGE_WINDOW: usize = 7;
const Z_95: f64 = 1.96;
const BAND_GROWTH_PER_DAY: f64 = 0.05;
const FULL_DATA_POINTS: f64 = 30.0;

/// Model used to project a metric.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// Least-squares trend line
    Linear,
    /// Mean of the most recent points
    MovingAverage,
}

impl ModelType {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Linear => "linear",
            ModelType::MovingAverage => "moving_average",
        }
    }
}

/// Inputs for [`generate_forecast`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastParams {
    /// Entity being forecast
    pub entity_id: String,
    /// Daily history, any order
    pub history: Vec<DailyMetrics>,
    /// Metrics to project
    pub metrics: Vec<Metric>,
    /// Days to project past the last history row
    pub horizon_days: usize,
}

/// One projected day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastPoint {
    /// Projected calendar day
    pub date: NaiveDate,
    /// Days past the last observation, starting at 1
    pub days_ahead: usize,
    /// Point estimate
    pub value: f64,
    /// Lower bound, never negative
    pub lower: f64,
    /// Upper bound
    pub upper: f64,
}

/// Backtest accuracy and derived confidence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastQuality {
    /// Mean absolute percentage error as a fraction, when a backtest ran
    pub mape: Option<f64>,
    /// Root mean squared error, when a backtest ran
    pub rmse: Option<f64>,
    /// Confidence in the projection, `[0, 1]`
    pub confidence: f64,
}

/// Projection for a single metric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricForecast {
    /// Projected metric
    pub metric: Metric,
    /// Model chosen
    pub model_type: ModelType,
    /// Fit quality of the regression, when one was computed
    pub r_squared: Option<f64>,
    /// One point per horizon day
    pub predictions: Vec<ForecastPoint>,
    /// Accuracy of this metric's model
    pub quality: ForecastQuality,
}

/// Forecast for every requested metric of an entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Forecast {
    /// Entity being forecast
    pub entity_id: String,
    /// Days projected
    pub horizon_days: usize,
    /// Per-metric projections in request order
    pub metrics: Vec<MetricForecast>,
    /// Quality averaged over all metrics
    pub quality: ForecastQuality,
    /// Generation time
    pub generated_at: DateTime<Utc>,
}

impl Forecast {
    /// Projection for `metric`, if it was requested.
    pub fn metric(&self, metric: Metric) -> Option<&MetricForecast> {
        self.metrics.iter().find(|m| m.metric == metric)
    }
}

// ============================================================================
// Models
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum FittedModel {
    Linear { slope: f64, intercept: f64 },
    MovingAverage { level: f64 },
}

impl FittedModel {
    fn model_type(&self) -> ModelType {
        match self {
            FittedModel::Linear { .. } => ModelType::Linear,
            FittedModel::MovingAverage { .. } => ModelType::MovingAverage,
        }
    }

    /// Value at index `x` of the original series.
    fn predict(&self, x: f64) -> f64 {
        match self {
            FittedModel::Linear { slope, intercept } => intercept + slope * x,
            FittedModel::MovingAverage { level } => *level,
        }
    }
}

fn moving_average(values: &[f64]) -> f64 {
    let start = values.len().saturating_sub(MOVING_AVERAGE_WINDOW);
    mean(&values[start..]).unwrap_or(0.0)
}

fn fit(values: &[f64], model_type: ModelType) -> FittedModel {
    match (model_type, linear_regression(values)) {
        (ModelType::Linear, Some(line)) => FittedModel::Linear {
            slope: line.slope,
            intercept: line.intercept,
        },
        _ => FittedModel::MovingAverage {
            level: moving_average(values),
        },
    }
}

/// Hold out the tail, refit on the rest, and measure the error.
fn backtest(values: &[f64], model_type: ModelType) -> (Option<f64>, Option<f64>) {
    let n = values.len();
    let holdout = ((n as f64 * 0.2).ceil() as usize).clamp(1, 3);
    if n < holdout + 2 {
        return (None, None);
    }
    let (train, test) = values.split_at(n - holdout);
    let model = fit(train, model_type);

    let mut abs_pct = Vec::new();
    let mut sq = Vec::new();
    for (i, actual) in test.iter().enumerate() {
        let predicted = model.predict((train.len() + i) as f64);
        if actual.abs() > f64::EPSILON {
            abs_pct.push(((actual - predicted) / actual).abs());
        }
        sq.push((actual - predicted).powi(2));
    }
    (mean(&abs_pct), mean(&sq).map(f64::sqrt))
}

fn flat_forecast(metric: Metric, values: &[f64], last_date: NaiveDate, horizon: usize) -> MetricForecast {
    let level = mean(values).unwrap_or(0.0).max(0.0);
    let predictions = (1..=horizon)
        .map(|d| ForecastPoint {
            date: last_date + Duration::days(d as i64),
            days_ahead: d,
            value: level,
            lower: level * (1.0 - FLAT_BAND),
            upper: level * (1.0 + FLAT_BAND),
        })
        .collect();
    MetricForecast {
        metric,
        model_type: ModelType::Linear,
        r_squared: None,
        predictions,
        quality: ForecastQuality {
            mape: None,
            rmse: None,
            confidence: FLAT_CONFIDENCE,
        },
    }
}

fn forecast_metric(
    metric: Metric,
    values: &[f64],
    last_date: NaiveDate,
    horizon: usize,
) -> MetricForecast {
    if values.len() < MIN_POINTS {
        return flat_forecast(metric, values, last_date, horizon);
    }

    let r_squared = linear_regression(values).map(|line| line.r_squared).unwrap_or(0.0);
    let model_type = if r_squared > R_SQUARED_THRESHOLD {
        ModelType::Linear
    } else {
        ModelType::MovingAverage
    };
    let model = fit(values, model_type);
    let sd = std_dev(values).unwrap_or(0.0);
    let last_index = (values.len() - 1) as f64;

    let predictions = (1..=horizon)
        .map(|d| {
            let value = model.predict(last_index + d as f64).max(0.0);
            let band = Z_95 * sd * (1.0 + BAND_GROWTH_PER_DAY * d as f64);
            ForecastPoint {
                date: last_date + Duration::days(d as i64),
                days_ahead: d,
                value,
                lower: (value - band).max(0.0),
                upper: value + band,
            }
        })
        .collect();

    let (mape, rmse) = backtest(values, model.model_type());
    let accuracy = 1.0 - mape.map(|m| m.min(1.0)).unwrap_or(0.5);
    let sufficiency = (values.len() as f64 / FULL_DATA_POINTS).min(1.0);
    let confidence = clamp01(0.4 * accuracy + 0.3 * r_squared + 0.3 * sufficiency);

    MetricForecast {
        metric,
        model_type: model.model_type(),
        r_squared: Some(r_squared),
        predictions,
        quality: ForecastQuality {
            mape,
            rmse,
            confidence,
        },
    }
}

/// Project every requested metric `horizon_days` past the last history row.
///
/// Never fails: short or empty histories produce flat low-confidence forecasts.
pub fn generate_forecast(params: &ForecastParams) -> Forecast {
    let mut rows: Vec<&DailyMetrics> = params.history.iter().collect();
    rows.sort_by_key(|d| d.date);
    let last_date = rows
        .last()
        .map(|d| d.date)
        .unwrap_or_else(|| Utc::now().date_naive());

    let metrics: Vec<MetricForecast> = params
        .metrics
        .iter()
        .map(|metric| {
            let values: Vec<f64> = rows.iter().filter_map(|d| d.value(*metric)).collect();
            forecast_metric(*metric, &values, last_date, params.horizon_days)
        })
        .collect();

    let mapes: Vec<f64> = metrics.iter().filter_map(|m| m.quality.mape).collect();
    let rmses: Vec<f64> = metrics.iter().filter_map(|m| m.quality.rmse).collect();
    let confidences: Vec<f64> = metrics.iter().map(|m| m.quality.confidence).collect();
    let quality = ForecastQuality {
        mape: mean(&mapes),
        rmse: mean(&rmses),
        confidence: mean(&confidences).unwrap_or(FLAT_CONFIDENCE),
    };

    debug!(
        entity_id = %params.entity_id,
        metrics = metrics.len(),
        horizon = params.horizon_days,
        confidence = quality.confidence,
        "Forecast generated"
    );

    Forecast {
        entity_id: params.entity_id.clone(),
        horizon_days: params.horizon_days,
        metrics,
        quality,
        generated_at: Utc::now(),
    }
}
