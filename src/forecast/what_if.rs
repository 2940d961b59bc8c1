use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::Metric;

/// Flat relative width of every simulated confidence interval.
const INTERVAL_BAND: f64 = 0.3;

/// Levers an intervention can move.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Driver {
    /// Daily budget
    Budget,
    /// Bid amount
    Bid,
    /// Click-through rate
    Ctr,
    /// Creative quality score
    CreativeQuality,
}

impl Driver {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Driver::Budget => "budget",
            Driver::Bid => "bid",
            Driver::Ctr => "ctr",
            Driver::CreativeQuality => "creative_quality",
        }
    }

    /// Elasticity of each dependent metric to a relative change in this driver.
    pub fn effects(&self) -> &'static [(Metric, f64)] {
        match self {
            Driver::Budget => &[
                (Metric::Spend, 1.0),
                (Metric::Impressions, 0.9),
                (Metric::Clicks, 0.85),
                (Metric::Conversions, 0.8),
                (Metric::Roas, -0.2),
                (Metric::Cpa, 0.15),
            ],
            Driver::Bid => &[
                (Metric::Impressions, 0.6),
                (Metric::Cpc, 0.9),
                (Metric::Spend, 0.7),
                (Metric::Cpa, 0.3),
            ],
            Driver::Ctr => &[(Metric::Clicks, 1.0), (Metric::Conversions, 0.9)],
            Driver::CreativeQuality => &[(Metric::Ctr, 0.5), (Metric::Cvr, 0.3)],
        }
    }
}

/// How an intervention changes its driver.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InterventionOp {
    /// Replace the value
    Set,
    /// Raise by a percentage
    IncreasePct,
    /// Lower by a percentage
    DecreasePct,
    /// Raise by an absolute amount
    IncreaseAbs,
    /// Lower by an absolute amount
    DecreaseAbs,
}

impl InterventionOp {
    /// Apply to `current`, never going below zero.
    pub fn apply(&self, current: f64, value: f64) -> f64 {
        let next = match self {
            InterventionOp::Set => value,
            InterventionOp::IncreasePct => current * (1.0 + value / 100.0),
            InterventionOp::DecreasePct => current * (1.0 - value / 100.0),
            InterventionOp::IncreaseAbs => current + value,
            InterventionOp::DecreaseAbs => current - value,
        };
        next.max(0.0)
    }
}

/// One hypothetical change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Intervention {
    /// Lever to move
    pub variable: Driver,
    /// How to move it
    pub operation: InterventionOp,
    /// Operand
    pub value: f64,
}

/// Inputs for [`run_what_if_simulation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatIfParams {
    /// Entity being simulated
    pub entity_id: String,
    /// Current lever values
    pub drivers: BTreeMap<Driver, f64>,
    /// Current metric values
    pub metrics: BTreeMap<Metric, f64>,
    /// Changes to simulate, applied in order
    pub interventions: Vec<Intervention>,
}

/// Baseline and simulated value of one metric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulatedMetric {
    /// Metric simulated
    pub metric: Metric,
    /// Value before the interventions
    pub baseline: f64,
    /// Value after the interventions
    pub simulated: f64,
    /// Relative change in percent, 0 when the baseline is zero
    pub change_pct: f64,
    /// Lower end of the interval
    pub lower: f64,
    /// Upper end of the interval
    pub upper: f64,
}

/// Outcome of a what-if simulation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WhatIfScenario {
    /// Entity simulated
    pub entity_id: String,
    /// Interventions that were applied
    pub interventions: Vec<Intervention>,
    /// Lever values after the interventions
    pub drivers: BTreeMap<Driver, f64>,
    /// One entry per baseline metric
    pub results: Vec<SimulatedMetric>,
    /// Conditions the simulation takes for granted
    pub assumptions: Vec<String>,
    /// Known blind spots of the simulation
    pub limitations: Vec<String>,
}

impl WhatIfScenario {
    /// Result for `metric`, if it was part of the baseline.
    pub fn result(&self, metric: Metric) -> Option<&SimulatedMetric> {
        self.results.iter().find(|r| r.metric == metric)
    }
}

/// Apply each intervention and propagate it through the effect table.
///
/// Effects compound multiplicatively across interventions. Drivers missing
/// from the baseline, or at zero, cannot express a relative change; they are
/// set but not propagated, and a limitation is recorded.
pub fn run_what_if_simulation(params: &WhatIfParams) -> WhatIfScenario {
    let mut drivers = params.drivers.clone();
    let mut metrics = params.metrics.clone();
    let mut limitations = vec![
        "Effects are modelled as linear elasticities".to_string(),
        "Confidence intervals are a flat ±30% band, not statistically derived".to_string(),
    ];

    for intervention in &params.interventions {
        let current = drivers.get(&intervention.variable).copied().unwrap_or(0.0);
        let next = intervention.operation.apply(current, intervention.value);
        drivers.insert(intervention.variable, next);

        if current <= 0.0 {
            limitations.push(format!(
                "No baseline value for {}; its effects were not propagated",
                intervention.variable.as_str()
            ));
            continue;
        }
        let relative = (next - current) / current;

        if intervention.variable == Driver::Ctr {
            if let Some(ctr) = metrics.get_mut(&Metric::Ctr) {
                *ctr = next;
            }
        }
        for (metric, elasticity) in intervention.variable.effects() {
            if let Some(value) = metrics.get_mut(metric) {
                *value = (*value * (1.0 + elasticity * relative)).max(0.0);
            }
        }
        debug!(
            driver = intervention.variable.as_str(),
            relative_change = relative,
            "Intervention applied"
        );
    }

    if params.interventions.len() >= 2 {
        limitations.push(
            "Interaction effects between combined interventions are approximated by compounding"
                .to_string(),
        );
    }

    let results = params
        .metrics
        .iter()
        .map(|(metric, baseline)| {
            let simulated = metrics.get(metric).copied().unwrap_or(*baseline);
            let change_pct = if baseline.abs() > f64::EPSILON {
                (simulated - baseline) / baseline * 100.0
            } else {
                0.0
            };
            SimulatedMetric {
                metric: *metric,
                baseline: *baseline,
                simulated,
                change_pct,
                lower: simulated * (1.0 - INTERVAL_BAND),
                upper: simulated * (1.0 + INTERVAL_BAND),
            }
        })
        .collect();

    WhatIfScenario {
        entity_id: params.entity_id.clone(),
        interventions: params.interventions.clone(),
        drivers,
        results,
        assumptions: vec![
            "No external market changes during the simulated period".to_string(),
            "Audience and auction dynamics stay as observed in the baseline".to_string(),
        ],
        limitations,
    }
}
