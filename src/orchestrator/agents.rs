//! Built-in executors for the six agent types.
//!
//! Each agent composes the statistical components over data fetched from
//! the collaborator repositories and returns a typed report serialized into
//! [`ToolOutput::data`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::executor::{AgentExecutor, AgentRequest, ExecutorRegistry, GatheredData};
use super::types::{AgentType, ControllerInput, Recommendation, ToolOutput};
use crate::anomaly::{run_anomaly_detection, AnomalyType, DetectedAnomaly, DetectorConfig, Severity, Trend};
use crate::confidence::{calculate_full_confidence, ConfidenceParams, ConfidenceResult, SampleMetric};
use crate::domain::{
    ActionType, DailyMetrics, EntitySnapshot, Metric, OrgPolicy, ProposedAction, TrackingStatus,
};
use crate::error::{AgentError, AgentResult, StorageError};
use crate::forecast::{
    generate_forecast, run_what_if_simulation, Driver, Forecast, ForecastParams, Intervention,
    InterventionOp, WhatIfParams, WhatIfScenario,
};
use crate::guardrails::{GuardrailCheckResult, GuardrailContext, GuardrailEngine};
use crate::stats::{clamp01, mean};
use crate::storage::{MetricsRepository, PolicyRepository};

const VALIDATION_WINDOW_DAYS: i64 = 14;
const CAUSAL_WINDOW_DAYS: i64 = 28;
const FORECAST_HORIZON_DAYS: usize = 7;
const MIN_VALID_DAYS: usize = 3;
const RISK_GUARD_CONFIDENCE: f64 = 0.95;

fn storage_error(agent: AgentType, err: StorageError) -> AgentError {
    match err {
        StorageError::EntityNotFound { .. } => AgentError::InvalidInput {
            agent,
            message: err.to_string(),
        },
        other => AgentError::Execution {
            agent,
            message: other.to_string(),
        },
    }
}

fn require_entity(agent: AgentType, request: &AgentRequest) -> AgentResult<&str> {
    let id = request.input.entity_id.trim();
    if id.is_empty() {
        return Err(AgentError::InvalidInput {
            agent,
            message: "entity_id is required".to_string(),
        });
    }
    Ok(id)
}

fn report_output<T: Serialize>(agent: AgentType, report: &T) -> AgentResult<ToolOutput> {
    ToolOutput::from_report(report).map_err(|e| AgentError::Execution {
        agent,
        message: e.to_string(),
    })
}

async fn load_window(
    agent: AgentType,
    repo: &dyn MetricsRepository,
    entity_id: &str,
    request: &AgentRequest,
    days: i64,
) -> AgentResult<Vec<DailyMetrics>> {
    repo.daily_metrics(entity_id, request.as_of - Duration::days(days - 1), request.as_of)
        .await
        .map_err(|e| storage_error(agent, e))
}

// ============================================================================
// Candidate actions
// ============================================================================

fn derived_actions(perf: Option<&PerformanceReport>) -> Vec<ProposedAction> {
    let Some(perf) = perf else {
        return vec![ProposedAction::new(ActionType::Monitor)];
    };
    let mut actions: Vec<ProposedAction> = Vec::new();
    for anomaly in &perf.anomalies {
        let action = match anomaly.anomaly_type {
            AnomalyType::TrackingBreak => ProposedAction::new(ActionType::Monitor),
            AnomalyType::CreativeFatigue | AnomalyType::Drop(Metric::Ctr) => {
                ProposedAction::new(ActionType::RefreshCreative)
            }
            AnomalyType::Drop(Metric::Roas) | AnomalyType::Spike(Metric::Cpa)
                if anomaly.severity >= Severity::High =>
            {
                ProposedAction::new(ActionType::DecreaseBudget).with_budget_change(-20.0)
            }
            _ => continue,
        };
        if !actions.iter().any(|a| a.action_type == action.action_type) {
            actions.push(action.with_reason(format!("{} detected", anomaly.anomaly_type)));
        }
    }
    if actions.is_empty() {
        actions.push(ProposedAction::new(ActionType::Monitor));
    }
    actions
}

/// Actions to vet and rank: the caller's proposals, or when there are none,
/// actions derived from the performance report.
pub fn candidate_actions(
    input: &ControllerInput,
    perf: Option<&PerformanceReport>,
) -> Vec<ProposedAction> {
    if input.proposed_actions.is_empty() {
        derived_actions(perf)
    } else {
        input.proposed_actions.clone()
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Output of the data validator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    /// Entity validated
    pub entity: EntitySnapshot,
    /// Days with data in the validation window
    pub days_available: usize,
    /// Days of the window without data
    pub missing_days: usize,
    /// Confidence breakdown of the data
    pub confidence: ConfidenceResult,
    /// Problems found
    pub issues: Vec<String>,
    /// Whether the data is usable
    pub valid: bool,
}

/// Output of the performance analyst.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceReport {
    /// ROAS direction over the window
    pub trend: Trend,
    /// Detected anomalies, most severe first
    pub anomalies: Vec<DetectedAnomaly>,
    /// Whether a creative fatigue pattern was found
    pub creative_fatigue: bool,
    /// Highest severity among the anomalies
    pub top_severity: Option<Severity>,
}

/// Candidate causes for one anomaly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CausalHypothesis {
    /// Anomaly being explained
    pub anomaly_type: AnomalyType,
    /// Likely causes, most likely first
    pub causes: Vec<String>,
}

/// Output of the causal reasoner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CausalReport {
    /// Hypotheses per analysed anomaly
    pub hypotheses: Vec<CausalHypothesis>,
    /// ROAS and spend projection
    pub forecast: Forecast,
    /// Simulated effect of each candidate budget change
    pub scenarios: Vec<WhatIfScenario>,
}

/// Guardrail verdict for one proposed action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionAssessment {
    /// Action checked
    pub action: ProposedAction,
    /// Guardrail outcome
    pub result: GuardrailCheckResult,
}

/// Output of the risk guard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskReport {
    /// One assessment per candidate action
    pub assessments: Vec<ActionAssessment>,
    /// Total blocking violations
    pub violation_count: usize,
    /// True iff no action was blocked
    pub safe: bool,
}

impl RiskReport {
    /// Assessment for an action type.
    pub fn assessment(&self, action_type: ActionType) -> Option<&ActionAssessment> {
        self.assessments
            .iter()
            .find(|a| a.action.action_type == action_type)
    }
}

/// Output of the explainer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExplanationReport {
    /// One-paragraph summary
    pub summary: String,
    /// Supporting points
    pub points: Vec<String>,
}

/// Output of the prioritizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriorityReport {
    /// Recommendations, highest priority first
    pub recommendations: Vec<Recommendation>,
}

// ============================================================================
// Data validator
// ============================================================================

/// Checks data completeness and scores how far the data can be trusted.
pub struct DataValidatorAgent {
    metrics: Arc<dyn MetricsRepository>,
}

impl DataValidatorAgent {
    /// Create the agent.
    pub fn new(metrics: Arc<dyn MetricsRepository>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl AgentExecutor for DataValidatorAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::DataValidator
    }

    async fn execute(&self, request: &AgentRequest, _: &GatheredData) -> AgentResult<ToolOutput> {
        let agent = self.agent_type();
        let entity_id = require_entity(agent, request)?;
        let entity = self
            .metrics
            .entity_snapshot(entity_id)
            .await
            .map_err(|e| storage_error(agent, e))?;
        let history =
            load_window(agent, self.metrics.as_ref(), entity_id, request, VALIDATION_WINDOW_DAYS)
                .await?;

        let days_available = history.len();
        let missing_days = (VALIDATION_WINDOW_DAYS as usize).saturating_sub(days_available);
        let confidence = calculate_full_confidence(&ConfidenceParams {
            impressions: entity.impressions,
            daily_values: history
                .iter()
                .filter_map(|d| d.value(Metric::Roas))
                .collect(),
            data_age_hours: entity.data_age_hours,
            historical_accuracy: Vec::new(),
            sample_count: entity.conversions,
            sample_metric: SampleMetric::Conversions,
        });

        let mut issues = Vec::new();
        if days_available < MIN_VALID_DAYS {
            issues.push(format!(
                "Only {} days of data in the last {}",
                days_available, VALIDATION_WINDOW_DAYS
            ));
        } else if missing_days > 0 {
            issues.push(format!("{} days missing in the last {}", missing_days, VALIDATION_WINDOW_DAYS));
        }
        if entity.tracking_status == TrackingStatus::Broken {
            issues.push("Conversion tracking is broken".to_string());
        }
        let valid = days_available >= MIN_VALID_DAYS
            && entity.tracking_status != TrackingStatus::Broken;

        let report = ValidationReport {
            entity,
            days_available,
            missing_days,
            confidence,
            issues,
            valid,
        };

        let mut output = report_output(agent, &report)?
            .with_confidence(report.confidence.score)
            .with_evidence(format!("{} days of metrics loaded", days_available));
        for warning in report.confidence.warnings.iter().chain(&report.issues) {
            output = output.with_warning(warning.clone());
        }
        Ok(output)
    }
}

// ============================================================================
// Performance analyst
// ============================================================================

/// Detects anomalies and the ROAS trend.
pub struct PerformanceAnalystAgent {
    metrics: Arc<dyn MetricsRepository>,
    detector: DetectorConfig,
}

impl PerformanceAnalystAgent {
    /// Create the agent.
    pub fn new(metrics: Arc<dyn MetricsRepository>, detector: DetectorConfig) -> Self {
        Self { metrics, detector }
    }
}

#[async_trait]
impl AgentExecutor for PerformanceAnalystAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::PerformanceAnalyst
    }

    async fn execute(&self, request: &AgentRequest, _: &GatheredData) -> AgentResult<ToolOutput> {
        let agent = self.agent_type();
        let entity_id = require_entity(agent, request)?;

        let anomalies =
            run_anomaly_detection(self.metrics.as_ref(), entity_id, request.as_of, &self.detector)
                .await
                .map_err(|e| storage_error(agent, e))?;
        let history =
            load_window(agent, self.metrics.as_ref(), entity_id, request, VALIDATION_WINDOW_DAYS)
                .await?;
        let roas: Vec<f64> = history
            .iter()
            .filter_map(|d| d.value(Metric::Roas))
            .collect();

        let report = PerformanceReport {
            trend: Trend::of(&roas),
            creative_fatigue: anomalies
                .iter()
                .any(|a| a.anomaly_type == AnomalyType::CreativeFatigue),
            top_severity: anomalies.iter().map(|a| a.severity).max(),
            anomalies,
        };

        let coverage = (history.len() as f64 / VALIDATION_WINDOW_DAYS as f64).min(1.0);
        let mut output = report_output(agent, &report)?
            .with_confidence(0.4 + 0.6 * coverage)
            .with_evidence(format!("ROAS trend is {}", report.trend.as_str()));
        for anomaly in &report.anomalies {
            output = output.with_evidence(format!(
                "{} {} ({:+.1}% vs expected)",
                anomaly.severity, anomaly.anomaly_type, anomaly.deviation_pct
            ));
        }
        Ok(output)
    }
}

// ============================================================================
// Causal reasoner
// ============================================================================

fn likely_causes(anomaly_type: AnomalyType) -> Vec<&'static str> {
    match anomaly_type {
        AnomalyType::TrackingBreak => vec!["Pixel or conversion API failure", "Attribution settings change"],
        AnomalyType::CreativeFatigue | AnomalyType::Drop(Metric::Ctr) => {
            vec!["Creative fatigue", "Audience saturation"]
        }
        AnomalyType::Drop(Metric::Roas) | AnomalyType::Spike(Metric::Cpa) => vec![
            "Rising auction competition",
            "Conversion rate decline",
            "Creative fatigue",
        ],
        AnomalyType::Drop(Metric::Cvr) => vec!["Landing page issue", "Offer or pricing change"],
        AnomalyType::Drop(Metric::Conversions) => {
            vec!["Reduced delivery", "Conversion rate decline"]
        }
        AnomalyType::Spike(Metric::Spend) | AnomalyType::Drop(Metric::Spend) => {
            vec!["Budget change", "Delivery pacing shift"]
        }
        _ => vec!["Unexplained variance"],
    }
}

/// Proposes causes for anomalies and projects metrics forward.
pub struct CausalReasonerAgent {
    metrics: Arc<dyn MetricsRepository>,
}

impl CausalReasonerAgent {
    /// Create the agent.
    pub fn new(metrics: Arc<dyn MetricsRepository>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl AgentExecutor for CausalReasonerAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::CausalReasoner
    }

    async fn execute(
        &self,
        request: &AgentRequest,
        gathered: &GatheredData,
    ) -> AgentResult<ToolOutput> {
        let agent = self.agent_type();
        let entity_id = require_entity(agent, request)?;
        let history =
            load_window(agent, self.metrics.as_ref(), entity_id, request, CAUSAL_WINDOW_DAYS)
                .await?;

        let hypotheses: Vec<CausalHypothesis> = gathered
            .report::<PerformanceReport>(AgentType::PerformanceAnalyst)
            .map(|perf| {
                perf.anomalies
                    .iter()
                    .map(|a| CausalHypothesis {
                        anomaly_type: a.anomaly_type,
                        causes: likely_causes(a.anomaly_type)
                            .into_iter()
                            .map(str::to_string)
                            .collect(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let forecast = generate_forecast(&ForecastParams {
            entity_id: entity_id.to_string(),
            history,
            metrics: vec![Metric::Roas, Metric::Spend],
            horizon_days: FORECAST_HORIZON_DAYS,
        });

        let scenarios = match gathered.report::<ValidationReport>(AgentType::DataValidator) {
            Some(validation) => {
                let perf = gathered.report::<PerformanceReport>(AgentType::PerformanceAnalyst);
                let candidates = candidate_actions(&request.input, perf.as_ref());
                budget_scenarios(&validation.entity, &candidates)
            }
            None => Vec::new(),
        };

        let report = CausalReport {
            hypotheses,
            forecast,
            scenarios,
        };
        let mut output = report_output(agent, &report)?
            .with_confidence(report.forecast.quality.confidence);
        for hypothesis in &report.hypotheses {
            if let Some(cause) = hypothesis.causes.first() {
                output = output.with_evidence(format!(
                    "{} most likely caused by: {}",
                    hypothesis.anomaly_type, cause
                ));
            }
        }
        Ok(output)
    }
}

fn budget_scenarios(entity: &EntitySnapshot, actions: &[ProposedAction]) -> Vec<WhatIfScenario> {
    let Some(budget) = entity.daily_budget.filter(|b| *b > 0.0) else {
        return Vec::new();
    };
    let metrics: BTreeMap<Metric, f64> = [
        Metric::Spend,
        Metric::Impressions,
        Metric::Clicks,
        Metric::Conversions,
        Metric::Roas,
        Metric::Cpa,
    ]
    .into_iter()
    .filter_map(|m| entity.value(m).map(|v| (m, v)))
    .collect();

    actions
        .iter()
        .filter_map(|action| {
            let pct = action.budget_change_pct?;
            let (operation, value) = if pct >= 0.0 {
                (InterventionOp::IncreasePct, pct)
            } else {
                (InterventionOp::DecreasePct, -pct)
            };
            Some(run_what_if_simulation(&WhatIfParams {
                entity_id: entity.id.clone(),
                drivers: BTreeMap::from([(Driver::Budget, budget)]),
                metrics: metrics.clone(),
                interventions: vec![Intervention {
                    variable: Driver::Budget,
                    operation,
                    value,
                }],
            }))
        })
        .collect()
}

// ============================================================================
// Risk guard
// ============================================================================

/// Runs the guardrail battery against every candidate action.
pub struct RiskGuardAgent {
    metrics: Arc<dyn MetricsRepository>,
    policies: Arc<dyn PolicyRepository>,
    engine: GuardrailEngine,
}

impl RiskGuardAgent {
    /// Create the agent.
    pub fn new(
        metrics: Arc<dyn MetricsRepository>,
        policies: Arc<dyn PolicyRepository>,
        engine: GuardrailEngine,
    ) -> Self {
        Self {
            metrics,
            policies,
            engine,
        }
    }
}

#[async_trait]
impl AgentExecutor for RiskGuardAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::RiskGuard
    }

    async fn execute(
        &self,
        request: &AgentRequest,
        gathered: &GatheredData,
    ) -> AgentResult<ToolOutput> {
        let agent = self.agent_type();
        let entity_id = require_entity(agent, request)?;

        let entity = match gathered.report::<ValidationReport>(AgentType::DataValidator) {
            Some(validation) => validation.entity,
            None => self
                .metrics
                .entity_snapshot(entity_id)
                .await
                .map_err(|e| storage_error(agent, e))?,
        };

        let org_id = &request.input.org_id;
        let policy = match self.policies.org_policy(org_id).await {
            Ok(policy) => policy,
            Err(StorageError::PolicyNotFound { .. }) => {
                debug!(org_id = %org_id, "No organization policy, using defaults");
                OrgPolicy {
                    org_id: org_id.clone(),
                    ..OrgPolicy::default()
                }
            }
            Err(e) => return Err(storage_error(agent, e)),
        };

        let perf = gathered.report::<PerformanceReport>(AgentType::PerformanceAnalyst);
        let mut assessments = Vec::new();
        for action in candidate_actions(&request.input, perf.as_ref()) {
            let ctx = GuardrailContext::new(entity.clone(), &action, policy.clone());
            let result = self.engine.check_all(ctx).await;
            assessments.push(ActionAssessment { action, result });
        }

        let violation_count = assessments.iter().map(|a| a.result.violations.len()).sum();
        let report = RiskReport {
            safe: violation_count == 0,
            violation_count,
            assessments,
        };

        let mut output = report_output(agent, &report)?.with_confidence(RISK_GUARD_CONFIDENCE);
        for assessment in &report.assessments {
            for violation in &assessment.result.violations {
                output = output.with_warning(format!(
                    "{} blocked by {}: {}",
                    assessment.action.action_type, violation.id, violation.message
                ));
            }
            for warning in &assessment.result.warnings {
                output = output.with_warning(format!(
                    "{}: {}",
                    assessment.action.action_type, warning.message
                ));
            }
        }
        Ok(output)
    }
}

// ============================================================================
// Explainer
// ============================================================================

/// Builds a plain summary of everything gathered so far.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplainerAgent;

#[async_trait]
impl AgentExecutor for ExplainerAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Explainer
    }

    async fn execute(
        &self,
        request: &AgentRequest,
        gathered: &GatheredData,
    ) -> AgentResult<ToolOutput> {
        let agent = self.agent_type();
        let mut points = Vec::new();

        if let Some(validation) = gathered.report::<ValidationReport>(AgentType::DataValidator) {
            points.push(format!(
                "Data confidence is {:.0}% across {} days",
                validation.confidence.score * 100.0,
                validation.days_available
            ));
        }
        if let Some(perf) = gathered.report::<PerformanceReport>(AgentType::PerformanceAnalyst) {
            match perf.anomalies.first() {
                Some(top) => points.push(format!(
                    "{} anomalies detected; the most severe is a {} {} ({:+.1}%)",
                    perf.anomalies.len(),
                    top.severity,
                    top.anomaly_type,
                    top.deviation_pct
                )),
                None => points.push(format!("No anomalies; ROAS is {}", perf.trend.as_str())),
            }
        }
        if let Some(causal) = gathered.report::<CausalReport>(AgentType::CausalReasoner) {
            if let Some(cause) = causal.hypotheses.first().and_then(|h| h.causes.first()) {
                points.push(format!("Most likely cause: {}", cause));
            }
            if let Some(roas) = causal.forecast.metric(Metric::Roas) {
                if let Some(last) = roas.predictions.last() {
                    points.push(format!(
                        "ROAS is projected at {:.2} in {} days",
                        last.value, last.days_ahead
                    ));
                }
            }
        }
        if let Some(risk) = gathered.report::<RiskReport>(AgentType::RiskGuard) {
            if risk.safe {
                points.push("All proposed actions pass the guardrails".to_string());
            } else {
                points.push(format!(
                    "{} guardrail violations block some proposed actions",
                    risk.violation_count
                ));
            }
        }

        let subject = if request.input.query.trim().is_empty() {
            format!("Analysis of {}", request.input.entity_id)
        } else {
            format!("{} ({})", request.input.query.trim(), request.input.entity_id)
        };
        let summary = if points.is_empty() {
            String::new()
        } else {
            format!("{}: {}.", subject, points.join("; "))
        };

        report_output(agent, &ExplanationReport { summary, points })
    }
}

// ============================================================================
// Prioritizer
// ============================================================================

/// Ranks candidate actions by severity and confidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrioritizerAgent;

#[async_trait]
impl AgentExecutor for PrioritizerAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Prioritizer
    }

    async fn execute(
        &self,
        request: &AgentRequest,
        gathered: &GatheredData,
    ) -> AgentResult<ToolOutput> {
        let agent = self.agent_type();
        let perf = gathered.report::<PerformanceReport>(AgentType::PerformanceAnalyst);
        let risk = gathered.report::<RiskReport>(AgentType::RiskGuard);

        let candidates = candidate_actions(&request.input, perf.as_ref());

        let confidences: Vec<f64> = gathered.iter().filter_map(|(_, o)| o.confidence).collect();
        let confidence = mean(&confidences).unwrap_or(0.5);
        let urgency = perf
            .as_ref()
            .and_then(|p| p.top_severity)
            .map(|s| s.weight())
            .unwrap_or(0.1);

        let mut recommendations: Vec<Recommendation> = candidates
            .into_iter()
            .map(|action| {
                let assessment = risk
                    .as_ref()
                    .and_then(|r| r.assessment(action.action_type));
                let blocked_by: Vec<String> = assessment
                    .map(|a| a.result.violations.iter().map(|v| v.id.clone()).collect())
                    .unwrap_or_default();
                // Without a risk check nothing is known to be safe
                let guardrails_passed = assessment.is_some() && blocked_by.is_empty();
                let weight = if action.action_type == ActionType::Monitor {
                    0.5
                } else {
                    1.0
                };
                let priority_score = if blocked_by.is_empty() {
                    clamp01(urgency * confidence * weight)
                } else {
                    0.0
                };
                let rationale = action.reason.clone().unwrap_or_else(|| {
                    format!("Proposed {} for {}", action.action_type, request.input.entity_id)
                });
                Recommendation {
                    id: Uuid::new_v4().to_string(),
                    entity_id: request.input.entity_id.clone(),
                    action,
                    priority_score,
                    confidence,
                    guardrails_passed,
                    blocked_by,
                    rationale,
                }
            })
            .collect();
        recommendations.sort_by(|a, b| b.priority_score.total_cmp(&a.priority_score));

        if risk.is_none() {
            warn!(run_id = %request.run_id, "Prioritizing without a guardrail check");
        }
        report_output(agent, &PriorityReport { recommendations })
    }
}

/// Registry holding every built-in agent.
pub fn builtin_registry(
    metrics: Arc<dyn MetricsRepository>,
    policies: Arc<dyn PolicyRepository>,
    detector: DetectorConfig,
    guardrails: GuardrailEngine,
) -> ExecutorRegistry {
    ExecutorRegistry::new()
        .with(Arc::new(DataValidatorAgent::new(Arc::clone(&metrics))))
        .with(Arc::new(PerformanceAnalystAgent::new(
            Arc::clone(&metrics),
            detector,
        )))
        .with(Arc::new(CausalReasonerAgent::new(Arc::clone(&metrics))))
        .with(Arc::new(RiskGuardAgent::new(metrics, policies, guardrails)))
        .with(Arc::new(ExplainerAgent))
        .with(Arc::new(PrioritizerAgent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::Baseline;
    use crate::domain::EntityLevel;
    use crate::planner::ReasoningDepth;
    use crate::storage::InMemoryStore;
    use chrono::NaiveDate;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 8, 15).unwrap()
    }

    async fn seeded_store(conversions: u64) -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .put_entity(EntitySnapshot {
                id: "ad-1".to_string(),
                name: "Summer".to_string(),
                level: EntityLevel::Ad,
                spend: 1_400.0,
                impressions: 140_000,
                clicks: 2_800,
                conversions,
                revenue: 4_200.0,
                daily_budget: Some(100.0),
                tracking_status: TrackingStatus::Healthy,
                data_age_hours: 2.0,
            })
            .await;
        let rows = (0..14)
            .map(|i| DailyMetrics {
                date: as_of() - Duration::days(13 - i),
                spend: 100.0,
                impressions: 10_000,
                clicks: 200,
                conversions: 10,
                revenue: 300.0,
            })
            .collect();
        store.put_daily_metrics("ad-1", rows).await;
        store
    }

    fn request(actions: Vec<ProposedAction>) -> AgentRequest {
        AgentRequest {
            run_id: Uuid::new_v4(),
            depth: ReasoningDepth::Standard,
            as_of: as_of(),
            input: Arc::new(ControllerInput {
                entity_id: "ad-1".to_string(),
                org_id: "org-1".to_string(),
                proposed_actions: actions,
                ..Default::default()
            }),
        }
    }

    #[tokio::test]
    async fn test_validator_scores_complete_data() {
        let store = Arc::new(seeded_store(140).await);
        let agent = DataValidatorAgent::new(store);
        let output = agent.execute(&request(vec![]), &GatheredData::new()).await.unwrap();
        let report: ValidationReport = serde_json::from_value(output.data.clone()).unwrap();
        assert!(report.valid);
        assert_eq!(report.days_available, 14);
        assert_eq!(report.missing_days, 0);
        assert!(output.confidence.unwrap() > 0.7);
    }

    #[tokio::test]
    async fn test_validator_rejects_unknown_entity() {
        let store = Arc::new(InMemoryStore::new());
        let agent = DataValidatorAgent::new(store);
        let err = agent.execute(&request(vec![]), &GatheredData::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_risk_guard_reports_violations() {
        let store = Arc::new(seeded_store(20).await);
        let agent = RiskGuardAgent::new(store.clone(), store, GuardrailEngine::default());
        let output = agent
            .execute(
                &request(vec![ProposedAction::new(ActionType::Pause)]),
                &GatheredData::new(),
            )
            .await
            .unwrap();
        let report: RiskReport = serde_json::from_value(output.data.clone()).unwrap();
        assert!(!report.safe);
        assert!(report.assessments[0].result.has_violation("learning_phase"));
        assert!(output.warnings.iter().any(|w| w.contains("learning_phase")));
    }

    #[tokio::test]
    async fn test_prioritizer_zeroes_blocked_actions() {
        let store = Arc::new(seeded_store(20).await);
        let guard = RiskGuardAgent::new(store.clone(), store, GuardrailEngine::default());
        let req = request(vec![
            ProposedAction::new(ActionType::Pause),
            ProposedAction::new(ActionType::Monitor),
        ]);
        let mut gathered = GatheredData::new();
        gathered.insert(
            AgentType::RiskGuard,
            guard.execute(&req, &gathered).await.unwrap(),
        );

        let output = PrioritizerAgent.execute(&req, &gathered).await.unwrap();
        let report: PriorityReport = serde_json::from_value(output.data).unwrap();
        assert_eq!(report.recommendations.len(), 2);
        assert_eq!(report.recommendations[0].action.action_type, ActionType::Monitor);
        let pause = &report.recommendations[1];
        assert_eq!(pause.priority_score, 0.0);
        assert!(!pause.guardrails_passed);
        assert!(pause.blocked_by.contains(&"learning_phase".to_string()));
    }

    fn anomaly(anomaly_type: AnomalyType, severity: Severity) -> DetectedAnomaly {
        DetectedAnomaly {
            entity_id: "ad-1".to_string(),
            metric_name: match anomaly_type {
                AnomalyType::Spike(m) | AnomalyType::Drop(m) => m,
                AnomalyType::TrackingBreak => Metric::Conversions,
                AnomalyType::CreativeFatigue => Metric::Ctr,
            },
            anomaly_type,
            expected_value: 3.0,
            actual_value: 1.5,
            deviation_pct: -50.0,
            severity,
            baseline: Baseline {
                mean: 3.0,
                std_dev: 0.2,
                sample_size: 14,
                seasonality_factor: 1.0,
            },
            trend: Trend::Stable,
            z_score: -7.5,
            detected_at: chrono::Utc::now(),
        }
    }

    fn perf(anomalies: Vec<DetectedAnomaly>) -> PerformanceReport {
        PerformanceReport {
            trend: Trend::Decreasing,
            top_severity: anomalies.iter().map(|a| a.severity).max(),
            creative_fatigue: anomalies
                .iter()
                .any(|a| a.anomaly_type == AnomalyType::CreativeFatigue),
            anomalies,
        }
    }

    fn action_types(actions: &[ProposedAction]) -> Vec<ActionType> {
        actions.iter().map(|a| a.action_type).collect()
    }

    #[test]
    fn test_derived_actions_without_analysis_monitor() {
        assert_eq!(
            derived_actions(None),
            vec![ProposedAction::new(ActionType::Monitor)]
        );
        assert_eq!(
            action_types(&derived_actions(Some(&perf(vec![])))),
            vec![ActionType::Monitor]
        );
    }

    #[test]
    fn test_severe_roas_drop_or_cpa_spike_decreases_budget() {
        let roas = derived_actions(Some(&perf(vec![anomaly(
            AnomalyType::Drop(Metric::Roas),
            Severity::High,
        )])));
        assert_eq!(action_types(&roas), vec![ActionType::DecreaseBudget]);
        assert_eq!(roas[0].budget_change_pct, Some(-20.0));
        assert_eq!(roas[0].reason.as_deref(), Some("roas_drop detected"));

        let cpa = derived_actions(Some(&perf(vec![anomaly(
            AnomalyType::Spike(Metric::Cpa),
            Severity::Critical,
        )])));
        assert_eq!(action_types(&cpa), vec![ActionType::DecreaseBudget]);
    }

    #[test]
    fn test_mild_roas_drop_only_monitors() {
        let actions = derived_actions(Some(&perf(vec![anomaly(
            AnomalyType::Drop(Metric::Roas),
            Severity::Medium,
        )])));
        assert_eq!(action_types(&actions), vec![ActionType::Monitor]);
        assert!(actions[0].reason.is_none());
    }

    #[test]
    fn test_fatigue_and_ctr_drop_refresh_creative_once() {
        let actions = derived_actions(Some(&perf(vec![
            anomaly(AnomalyType::CreativeFatigue, Severity::High),
            anomaly(AnomalyType::Drop(Metric::Ctr), Severity::Medium),
        ])));
        assert_eq!(action_types(&actions), vec![ActionType::RefreshCreative]);
    }

    #[test]
    fn test_tracking_break_monitors_and_duplicates_collapse() {
        let actions = derived_actions(Some(&perf(vec![
            anomaly(AnomalyType::TrackingBreak, Severity::Critical),
            anomaly(AnomalyType::Drop(Metric::Roas), Severity::Critical),
            anomaly(AnomalyType::Spike(Metric::Cpa), Severity::High),
            anomaly(AnomalyType::Drop(Metric::Ctr), Severity::Low),
        ])));
        assert_eq!(
            action_types(&actions),
            vec![
                ActionType::Monitor,
                ActionType::DecreaseBudget,
                ActionType::RefreshCreative,
            ]
        );
        assert_eq!(actions[0].reason.as_deref(), Some("tracking_break detected"));
    }

    #[test]
    fn test_caller_proposals_take_precedence() {
        let input = ControllerInput {
            proposed_actions: vec![ProposedAction::new(ActionType::Scale)],
            ..Default::default()
        };
        let report = perf(vec![anomaly(AnomalyType::Drop(Metric::Roas), Severity::High)]);
        assert_eq!(
            action_types(&candidate_actions(&input, Some(&report))),
            vec![ActionType::Scale]
        );
        assert_eq!(
            action_types(&candidate_actions(&ControllerInput::default(), Some(&report))),
            vec![ActionType::DecreaseBudget]
        );
    }

    #[tokio::test]
    async fn test_derived_candidates_carry_guardrail_results() {
        let store = Arc::new(seeded_store(20).await);
        let guard = RiskGuardAgent::new(store.clone(), store, GuardrailEngine::default());
        let req = request(vec![]);
        let mut gathered = GatheredData::new();
        gathered.insert(
            AgentType::PerformanceAnalyst,
            ToolOutput::from_report(&perf(vec![anomaly(
                AnomalyType::Drop(Metric::Roas),
                Severity::High,
            )]))
            .unwrap(),
        );

        let risk_output = guard.execute(&req, &gathered).await.unwrap();
        let risk: RiskReport = serde_json::from_value(risk_output.data.clone()).unwrap();
        assert_eq!(risk.assessments.len(), 1);
        assert_eq!(risk.assessments[0].action.action_type, ActionType::DecreaseBudget);
        assert!(!risk.safe);
        gathered.insert(AgentType::RiskGuard, risk_output);

        let output = PrioritizerAgent.execute(&req, &gathered).await.unwrap();
        let report: PriorityReport = serde_json::from_value(output.data).unwrap();
        assert_eq!(report.recommendations.len(), 1);
        let decrease = &report.recommendations[0];
        assert!(!decrease.guardrails_passed);
        assert!(decrease.blocked_by.contains(&"learning_phase".to_string()));
        assert_eq!(decrease.priority_score, 0.0);
    }

    #[tokio::test]
    async fn test_explainer_is_empty_without_data() {
        let output = ExplainerAgent
            .execute(&request(vec![]), &GatheredData::new())
            .await
            .unwrap();
        let report: ExplanationReport = serde_json::from_value(output.data).unwrap();
        assert!(report.summary.is_empty());
        assert!(output.confidence.is_none());
    }
}
