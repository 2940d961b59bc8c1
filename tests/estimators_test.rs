//! Behaviour of the statistical components through the public API.

use chrono::NaiveDate;
use pretty_assertions::assert_eq;

use ad_decision_engine::confidence::{
    calculate_confidence, calibrate_confidence, ConfidenceFactors, ConfidenceWeights,
};
use ad_decision_engine::domain::{DailyMetrics, Metric, MetricTotals};
use ad_decision_engine::evaluation::{evaluate_recommendation, EvaluationInput, Outcome};
use ad_decision_engine::forecast::{generate_forecast, ForecastParams, ModelType};

fn factors(value: f64) -> ConfidenceFactors {
    ConfidenceFactors {
        data_volume: value,
        variance: value,
        freshness: value,
        anomaly_noise: value,
        historical_accuracy: value,
        sample_size: value,
    }
}

#[test]
fn test_confidence_is_monotonic_in_each_factor() {
    let weights = ConfidenceWeights::default();
    let base = factors(0.5);
    let base_score = calculate_confidence(&base, &weights);

    let bumps: [fn(&mut ConfidenceFactors); 6] = [
        |f| f.data_volume = 0.9,
        |f| f.variance = 0.9,
        |f| f.freshness = 0.9,
        |f| f.anomaly_noise = 0.9,
        |f| f.historical_accuracy = 0.9,
        |f| f.sample_size = 0.9,
    ];
    for bump in bumps {
        let mut raised = base;
        bump(&mut raised);
        assert!(calculate_confidence(&raised, &weights) > base_score);
    }
}

#[test]
fn test_confidence_stays_in_unit_interval() {
    let weights = ConfidenceWeights::default();
    assert!((weights.total() - 1.0).abs() < 1e-9);
    assert!(calculate_confidence(&factors(1.0), &weights) <= 1.0);
    assert!(calculate_confidence(&factors(0.0), &weights) >= 0.0);
}

#[test]
fn test_calibration_is_a_one_shot_correction() {
    let first = calibrate_confidence(0.85);
    assert!((first.adjustment_factor - 0.82 / 0.9).abs() < 1e-9);

    let second = calibrate_confidence(first.calibrated_confidence);
    assert!(second.calibrated_confidence < first.calibrated_confidence);
}

#[test]
fn test_two_points_give_flat_forecast() {
    let history = (1..=2)
        .map(|d| DailyMetrics {
            date: NaiveDate::from_ymd_opt(2024, 3, d).unwrap(),
            spend: 100.0,
            impressions: 8_000,
            clicks: 160,
            conversions: 8,
            revenue: 250.0,
        })
        .collect();
    let forecast = generate_forecast(&ForecastParams {
        entity_id: "ad-1".to_string(),
        history,
        metrics: vec![Metric::Spend],
        horizon_days: 5,
    });

    let spend = forecast.metric(Metric::Spend).unwrap();
    assert_eq!(spend.model_type, ModelType::Linear);
    assert_eq!(spend.predictions.len(), 5);
    assert_eq!(spend.quality.confidence, 0.3);
    assert_eq!(forecast.quality.confidence, 0.3);
    for point in &spend.predictions {
        assert!((point.value - 100.0).abs() < 1e-9);
        assert!((point.lower - 70.0).abs() < 1e-9);
        assert!((point.upper - 130.0).abs() < 1e-9);
    }
}

#[test]
fn test_low_impressions_are_insufficient_regardless_of_lift() {
    let before = MetricTotals {
        days: 7,
        spend: 50.0,
        impressions: 50,
        clicks: 5,
        conversions: 1,
        revenue: 40.0,
    };
    let after = MetricTotals {
        days: 7,
        spend: 50.0,
        impressions: 50_000,
        clicks: 5_000,
        conversions: 900,
        revenue: 9_000.0,
    };
    let result = evaluate_recommendation(&EvaluationInput {
        recommendation_id: "rec-9".to_string(),
        entity_id: "ad-1".to_string(),
        primary_metric: Metric::Cvr,
        before,
        after,
    });
    assert_eq!(result.outcome, Outcome::InsufficientData);
    assert!(result.lift_pct > 0.0);
}
