//! Domain model shared by every stage of the engine.
//!
//! - [`EntitySnapshot`]: current totals for an ad, ad set or campaign
//! - [`DailyMetrics`]: one day of raw counters, from which ratio metrics derive
//! - [`MetricTotals`]: counters aggregated over a window
//! - [`ActionType`] / [`ProposedAction`]: what a recommendation would do
//! - [`OrgPolicy`]: organization-level protection lists and thresholds

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// Metrics
// ============================================================================

/// Metrics the engine knows how to compute from raw counters.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Spend,
    Impressions,
    Clicks,
    Conversions,
    Revenue,
    Ctr,
    Cvr,
    Cpa,
    Cpc,
    Roas,
}

impl Metric {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Spend => "spend",
            Metric::Impressions => "impressions",
            Metric::Clicks => "clicks",
            Metric::Conversions => "conversions",
            Metric::Revenue => "revenue",
            Metric::Ctr => "ctr",
            Metric::Cvr => "cvr",
            Metric::Cpa => "cpa",
            Metric::Cpc => "cpc",
            Metric::Roas => "roas",
        }
    }

    /// Cost-type metrics where a decrease is the desired direction.
    pub fn lower_is_better(&self) -> bool {
        matches!(self, Metric::Cpa | Metric::Cpc)
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "spend" => Ok(Metric::Spend),
            "impressions" => Ok(Metric::Impressions),
            "clicks" => Ok(Metric::Clicks),
            "conversions" => Ok(Metric::Conversions),
            "revenue" => Ok(Metric::Revenue),
            "ctr" => Ok(Metric::Ctr),
            "cvr" => Ok(Metric::Cvr),
            "cpa" => Ok(Metric::Cpa),
            "cpc" => Ok(Metric::Cpc),
            "roas" => Ok(Metric::Roas),
            _ => Err(format!("Unknown metric: {}", s)),
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator > 0.0 {
        Some(numerator / denominator)
    } else {
        None
    }
}

fn metric_value(
    metric: Metric,
    spend: f64,
    impressions: u64,
    clicks: u64,
    conversions: u64,
    revenue: f64,
) -> Option<f64> {
    match metric {
        Metric::Spend => Some(spend),
        Metric::Impressions => Some(impressions as f64),
        Metric::Clicks => Some(clicks as f64),
        Metric::Conversions => Some(conversions as f64),
        Metric::Revenue => Some(revenue),
        Metric::Ctr => ratio(clicks as f64, impressions as f64),
        Metric::Cvr => ratio(conversions as f64, clicks as f64),
        Metric::Cpa => ratio(spend, conversions as f64),
        Metric::Cpc => ratio(spend, clicks as f64),
        Metric::Roas => ratio(revenue, spend),
    }
}

/// One day of raw counters for an entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyMetrics {
    /// Calendar day the counters belong to
    pub date: NaiveDate,
    /// Amount spent
    pub spend: f64,
    /// Impressions served
    pub impressions: u64,
    /// Clicks received
    pub clicks: u64,
    /// Attributed conversions
    pub conversions: u64,
    /// Attributed revenue
    pub revenue: f64,
}

impl DailyMetrics {
    /// Value of a metric for this day. `None` when a ratio has a zero denominator.
    pub fn value(&self, metric: Metric) -> Option<f64> {
        metric_value(
            metric,
            self.spend,
            self.impressions,
            self.clicks,
            self.conversions,
            self.revenue,
        )
    }
}

/// Counters aggregated over a window of days.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricTotals {
    /// Number of daily rows aggregated
    pub days: usize,
    /// Summed spend
    pub spend: f64,
    /// Summed impressions
    pub impressions: u64,
    /// Summed clicks
    pub clicks: u64,
    /// Summed conversions
    pub conversions: u64,
    /// Summed revenue
    pub revenue: f64,
}

impl MetricTotals {
    /// Aggregate daily rows into window totals.
    pub fn from_days(days: &[DailyMetrics]) -> Self {
        days.iter().fold(MetricTotals::default(), |mut acc, day| {
            acc.days += 1;
            acc.spend += day.spend;
            acc.impressions += day.impressions;
            acc.clicks += day.clicks;
            acc.conversions += day.conversions;
            acc.revenue += day.revenue;
            acc
        })
    }

    /// Value of a metric over the window.
    pub fn value(&self, metric: Metric) -> Option<f64> {
        metric_value(
            metric,
            self.spend,
            self.impressions,
            self.clicks,
            self.conversions,
            self.revenue,
        )
    }
}

// ============================================================================
// Entities
// ============================================================================

/// Level of the advertising hierarchy an entity sits at.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityLevel {
    Ad,
    AdSet,
    Campaign,
}

/// Health of conversion tracking for an entity.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    Healthy,
    Degraded,
    Broken,
    #[default]
    Unknown,
}

/// Current state of an entity as supplied by the data-access layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntitySnapshot {
    /// Entity identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Hierarchy level
    pub level: EntityLevel,
    /// Lifetime spend
    pub spend: f64,
    /// Lifetime impressions
    pub impressions: u64,
    /// Lifetime clicks
    pub clicks: u64,
    /// Lifetime conversions
    pub conversions: u64,
    /// Lifetime revenue
    pub revenue: f64,
    /// Current daily budget, if the entity owns one
    #[serde(default)]
    pub daily_budget: Option<f64>,
    /// Conversion tracking health
    #[serde(default)]
    pub tracking_status: TrackingStatus,
    /// Hours since the metrics were last refreshed
    #[serde(default)]
    pub data_age_hours: f64,
}

impl EntitySnapshot {
    /// Value of a metric over the entity's lifetime totals.
    pub fn value(&self, metric: Metric) -> Option<f64> {
        metric_value(
            metric,
            self.spend,
            self.impressions,
            self.clicks,
            self.conversions,
            self.revenue,
        )
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Kinds of action a recommendation can propose.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Pause,
    Resume,
    IncreaseBudget,
    DecreaseBudget,
    Scale,
    AdjustBid,
    RefreshCreative,
    Monitor,
}

impl ActionType {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Pause => "pause",
            ActionType::Resume => "resume",
            ActionType::IncreaseBudget => "increase_budget",
            ActionType::DecreaseBudget => "decrease_budget",
            ActionType::Scale => "scale",
            ActionType::AdjustBid => "adjust_bid",
            ActionType::RefreshCreative => "refresh_creative",
            ActionType::Monitor => "monitor",
        }
    }

    /// Whether the action changes the entity (everything except monitoring).
    pub fn is_modifying(&self) -> bool {
        !matches!(self, ActionType::Monitor)
    }

    /// Actions that push more spend through the entity.
    pub fn is_scaling(&self) -> bool {
        matches!(self, ActionType::Scale | ActionType::IncreaseBudget)
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pause" => Ok(ActionType::Pause),
            "resume" => Ok(ActionType::Resume),
            "increase_budget" => Ok(ActionType::IncreaseBudget),
            "decrease_budget" => Ok(ActionType::DecreaseBudget),
            "scale" => Ok(ActionType::Scale),
            "adjust_bid" => Ok(ActionType::AdjustBid),
            "refresh_creative" => Ok(ActionType::RefreshCreative),
            "monitor" => Ok(ActionType::Monitor),
            _ => Err(format!("Unknown action type: {}", s)),
        }
    }
}

/// A concrete change someone wants to make to an entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposedAction {
    /// What kind of action
    pub action_type: ActionType,
    /// Relative budget change in percent (+20.0 = raise by a fifth)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_change_pct: Option<f64>,
    /// Free-form reason given by the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ProposedAction {
    /// Create an action without a budget change.
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            budget_change_pct: None,
            reason: None,
        }
    }

    /// Attach a relative budget change.
    pub fn with_budget_change(mut self, pct: f64) -> Self {
        self.budget_change_pct = Some(pct);
        self
    }

    /// Attach a reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

// ============================================================================
// Organization Policy
// ============================================================================

/// Per-organization numeric thresholds used by the guardrails.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrgThresholds {
    /// Conversions an entity needs before it leaves the learning phase
    pub min_conversions: u64,
    /// Impressions required before any modification
    pub min_impressions: u64,
    /// Impressions required before a pause
    pub min_impressions_for_pause: u64,
    /// ROAS at or above which an entity counts as a top performer
    pub top_performer_roas: f64,
    /// Budget change (percent, absolute) above which a warning is raised
    pub max_budget_change_pct: f64,
}

impl Default for OrgThresholds {
    fn default() -> Self {
        Self {
            min_conversions: 50,
            min_impressions: 1_000,
            min_impressions_for_pause: 5_000,
            top_performer_roas: 4.0,
            max_budget_change_pct: 50.0,
        }
    }
}

/// Organization-level policy supplied by the settings layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrgPolicy {
    /// Organization identifier
    pub org_id: String,
    /// Entities that must never be paused
    pub never_pause: HashSet<String>,
    /// Action types the organization never wants recommended
    pub never_recommend: HashSet<ActionType>,
    /// Numeric thresholds
    pub thresholds: OrgThresholds,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(spend: f64, impressions: u64, clicks: u64, conversions: u64, revenue: f64) -> DailyMetrics {
        DailyMetrics {
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            spend,
            impressions,
            clicks,
            conversions,
            revenue,
        }
    }

    #[test]
    fn test_derived_metrics() {
        let d = day(100.0, 10_000, 200, 10, 400.0);
        assert_eq!(d.value(Metric::Ctr), Some(0.02));
        assert_eq!(d.value(Metric::Cvr), Some(0.05));
        assert_eq!(d.value(Metric::Cpa), Some(10.0));
        assert_eq!(d.value(Metric::Roas), Some(4.0));
    }

    #[test]
    fn test_zero_denominator_yields_none() {
        let d = day(0.0, 0, 0, 0, 0.0);
        assert_eq!(d.value(Metric::Ctr), None);
        assert_eq!(d.value(Metric::Roas), None);
        assert_eq!(d.value(Metric::Spend), Some(0.0));
    }

    #[test]
    fn test_totals_aggregate_days() {
        let totals = MetricTotals::from_days(&[day(50.0, 1000, 10, 1, 100.0), day(50.0, 1000, 30, 3, 300.0)]);
        assert_eq!(totals.days, 2);
        assert_eq!(totals.impressions, 2000);
        assert_eq!(totals.value(Metric::Ctr), Some(0.02));
        assert_eq!(totals.value(Metric::Roas), Some(4.0));
    }

    #[test]
    fn test_cost_metrics_are_lower_is_better() {
        assert!(Metric::Cpa.lower_is_better());
        assert!(Metric::Cpc.lower_is_better());
        assert!(!Metric::Roas.lower_is_better());
        assert!(!Metric::Ctr.lower_is_better());
    }

    #[test]
    fn test_action_type_round_trip_str() {
        for action in [
            ActionType::Pause,
            ActionType::IncreaseBudget,
            ActionType::RefreshCreative,
            ActionType::Monitor,
        ] {
            assert_eq!(action.as_str().parse::<ActionType>(), Ok(action));
        }
        assert!(!ActionType::Monitor.is_modifying());
        assert!(ActionType::Scale.is_scaling());
        assert!(!ActionType::Pause.is_scaling());
    }

    #[test]
    fn test_org_policy_defaults() {
        let policy: OrgPolicy = serde_json::from_str(r#"{"org_id":"org-1"}"#).unwrap();
        assert_eq!(policy.thresholds.min_conversions, 50);
        assert!(policy.never_pause.is_empty());
    }
}
