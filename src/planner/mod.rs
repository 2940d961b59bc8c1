//! Reasoning depth planner.
//!
//! Maps a query's ambiguity, risk and time-pressure profile to one of three
//! analysis depths and the agent roster each depth requires. Planning is a
//! pure function of the [`ReasoningContext`].
//!
//! ```text
//! risk > 0.8 ─────────────────────────────▶ deep
//! budget at risk > 5000 ──────────────────▶ deep
//! time constrained  & complexity < 0.3 ───▶ heuristic
//! data quality > 0.8 & complexity < 0.3 ──▶ heuristic
//! complexity > 0.7 or risk > 0.6 ─────────▶ deep
//! otherwise ──────────────────────────────▶ standard
//! ```

use serde::{Deserialize, Serialize};

use crate::orchestrator::AgentType;
use crate::stats::clamp01;

/// Risk level above which planning always goes deep.
const CRITICAL_RISK: f64 = 0.8;
/// Budget exposure above which planning always goes deep.
const CRITICAL_BUDGET_AT_RISK: f64 = 5000.0;
/// Composite complexity below which a shallow plan is acceptable.
const LOW_COMPLEXITY: f64 = 0.3;
/// Composite complexity above which a deep plan is required.
const HIGH_COMPLEXITY: f64 = 0.7;
/// Risk level above which a deep plan is required.
const ELEVATED_RISK: f64 = 0.6;
/// Data quality above which simple queries can be answered heuristically.
const HIGH_DATA_QUALITY: f64 = 0.8;

// ============================================================================
// Depth
// ============================================================================

/// Amount of analysis the orchestrator performs for a query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningDepth {
    /// Validation and analysis only
    Heuristic,
    /// Adds risk checks, explanation and prioritisation
    Standard,
    /// Adds causal reasoning
    Deep,
}

impl ReasoningDepth {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningDepth::Heuristic => "heuristic",
            ReasoningDepth::Standard => "standard",
            ReasoningDepth::Deep => "deep",
        }
    }

    /// Hard cap on agent invocations for a run at this depth.
    pub fn max_agent_calls(&self) -> u32 {
        match self {
            ReasoningDepth::Heuristic => 4,
            ReasoningDepth::Standard => 10,
            ReasoningDepth::Deep => 20,
        }
    }

    /// Agent roster for this depth, in execution order.
    pub fn roster(&self) -> Vec<AgentType> {
        match self {
            ReasoningDepth::Heuristic => {
                vec![AgentType::DataValidator, AgentType::PerformanceAnalyst]
            }
            ReasoningDepth::Standard => vec![
                AgentType::DataValidator,
                AgentType::PerformanceAnalyst,
                AgentType::RiskGuard,
                AgentType::Explainer,
                AgentType::Prioritizer,
            ],
            ReasoningDepth::Deep => vec![
                AgentType::DataValidator,
                AgentType::PerformanceAnalyst,
                AgentType::CausalReasoner,
                AgentType::RiskGuard,
                AgentType::Explainer,
                AgentType::Prioritizer,
            ],
        }
    }
}

impl std::fmt::Display for ReasoningDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReasoningDepth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "heuristic" => Ok(ReasoningDepth::Heuristic),
            "standard" => Ok(ReasoningDepth::Standard),
            "deep" => Ok(ReasoningDepth::Deep),
            _ => Err(format!("Unknown reasoning depth: {}", s)),
        }
    }
}

// ============================================================================
// Context
// ============================================================================

/// Expertise of the person asking, used only to annotate the justification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserExpertise {
    Novice,
    Intermediate,
    Expert,
}

/// Profile of a query used to pick the reasoning depth.
///
/// All scores are expected in `[0, 1]`; out-of-range values are clamped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ReasoningContext {
    /// Quality of the underlying data (1 = complete and fresh)
    pub data_quality: f64,
    /// How ambiguous the query is
    pub ambiguity_level: f64,
    /// Intrinsic complexity of the query
    pub query_complexity: f64,
    /// Risk of acting on a wrong answer
    pub risk_level: f64,
    /// Money exposed by the decision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_at_risk: Option<f64>,
    /// Expertise of the person asking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_expertise: Option<UserExpertise>,
    /// Whether the caller needs an answer quickly
    #[serde(default)]
    pub time_constraint: bool,
    /// Historical accuracy of answers to similar queries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similar_query_accuracy: Option<f64>,
}

impl Default for ReasoningContext {
    fn default() -> Self {
        Self {
            data_quality: 0.5,
            ambiguity_level: 0.5,
            query_complexity: 0.5,
            risk_level: 0.5,
            budget_at_risk: None,
            user_expertise: None,
            time_constraint: false,
            similar_query_accuracy: None,
        }
    }
}

impl ReasoningContext {
    /// Weighted blend of ambiguity, complexity, risk and missing data quality.
    pub fn composite_complexity(&self) -> f64 {
        let score = 0.3 * clamp01(self.ambiguity_level)
            + 0.3 * clamp01(self.query_complexity)
            + 0.25 * clamp01(self.risk_level)
            + 0.15 * (1.0 - clamp01(self.data_quality));
        clamp01(score)
    }
}

// ============================================================================
// Plan
// ============================================================================

/// The planner's decision: depth, roster, justification and work cap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReasoningPlan {
    /// Chosen depth
    pub depth: ReasoningDepth,
    /// Agents to run, in execution order
    pub agents: Vec<AgentType>,
    /// Human-readable explanation of the choice
    pub justification: String,
    /// Hard cap on agent invocations for the run
    pub max_agent_calls: u32,
}

impl ReasoningPlan {
    /// Whether an agent is on the roster.
    pub fn includes(&self, agent: AgentType) -> bool {
        self.agents.contains(&agent)
    }

    /// Transition to a deep plan.
    ///
    /// Returns a new plan; `causal_reasoner` is appended only if absent, so
    /// escalating an already-deep plan changes nothing but the justification.
    pub fn escalated(&self, reason: &str) -> ReasoningPlan {
        let mut agents = self.agents.clone();
        if !agents.contains(&AgentType::CausalReasoner) {
            agents.push(AgentType::CausalReasoner);
        }
        ReasoningPlan {
            depth: ReasoningDepth::Deep,
            agents,
            justification: format!("{} Escalated to deep: {}.", self.justification, reason),
            max_agent_calls: self.max_agent_calls.max(ReasoningDepth::Deep.max_agent_calls()),
        }
    }
}

/// Pick the reasoning depth for a context. First matching rule wins.
pub fn determine_reasoning_depth(context: &ReasoningContext) -> ReasoningDepth {
    decide(context).0
}

fn decide(context: &ReasoningContext) -> (ReasoningDepth, String) {
    let risk = clamp01(context.risk_level);
    let complexity = context.composite_complexity();

    if risk > CRITICAL_RISK {
        return (
            ReasoningDepth::Deep,
            format!("Risk level {:.2} exceeds {:.1}; full analysis required.", risk, CRITICAL_RISK),
        );
    }

    if let Some(budget) = context.budget_at_risk {
        if budget > CRITICAL_BUDGET_AT_RISK {
            return (
                ReasoningDepth::Deep,
                format!(
                    "Budget at risk {:.0} exceeds {:.0}; full analysis required.",
                    budget, CRITICAL_BUDGET_AT_RISK
                ),
            );
        }
    }

    if context.time_constraint && complexity < LOW_COMPLEXITY {
        return (
            ReasoningDepth::Heuristic,
            format!("Time constrained and complexity {:.2} is low; quick heuristic pass.", complexity),
        );
    }

    if clamp01(context.data_quality) > HIGH_DATA_QUALITY && complexity < LOW_COMPLEXITY {
        return (
            ReasoningDepth::Heuristic,
            format!(
                "High data quality {:.2} and low complexity {:.2}; heuristic pass suffices.",
                context.data_quality, complexity
            ),
        );
    }

    if complexity > HIGH_COMPLEXITY || risk > ELEVATED_RISK {
        return (
            ReasoningDepth::Deep,
            format!("Complexity {:.2} or risk {:.2} is elevated; deep analysis.", complexity, risk),
        );
    }

    (
        ReasoningDepth::Standard,
        format!("Moderate complexity {:.2} and risk {:.2}; standard analysis.", complexity, risk),
    )
}

/// Build the full plan for a context.
pub fn create_reasoning_plan(context: &ReasoningContext) -> ReasoningPlan {
    let (depth, mut justification) = decide(context);

    if let Some(accuracy) = context.similar_query_accuracy {
        justification.push_str(&format!(
            " Similar queries were answered with {:.0}% accuracy.",
            clamp01(accuracy) * 100.0
        ));
    }
    if let Some(UserExpertise::Novice) = context.user_expertise {
        justification.push_str(" Audience is a novice; explanation matters.");
    }

    ReasoningPlan {
        depth,
        agents: depth.roster(),
        justification,
        max_agent_calls: depth.max_agent_calls(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(data_quality: f64, ambiguity: f64, complexity: f64, risk: f64) -> ReasoningContext {
        ReasoningContext {
            data_quality,
            ambiguity_level: ambiguity,
            query_complexity: complexity,
            risk_level: risk,
            ..Default::default()
        }
    }

    #[test]
    fn test_composite_complexity_weights() {
        let c = ctx(0.0, 1.0, 1.0, 1.0);
        assert!((c.composite_complexity() - 1.0).abs() < 1e-9);

        let c = ctx(1.0, 0.0, 0.0, 0.0);
        assert!(c.composite_complexity().abs() < 1e-9);

        let c = ctx(0.5, 0.5, 0.5, 0.5);
        assert!((c.composite_complexity() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_critical_risk_is_deep_regardless() {
        let mut c = ctx(1.0, 0.0, 0.0, 0.81);
        c.time_constraint = true;
        assert_eq!(determine_reasoning_depth(&c), ReasoningDepth::Deep);
    }

    #[test]
    fn test_budget_at_risk_is_deep() {
        let mut c = ctx(0.9, 0.1, 0.1, 0.1);
        c.budget_at_risk = Some(5000.01);
        assert_eq!(determine_reasoning_depth(&c), ReasoningDepth::Deep);

        c.budget_at_risk = Some(5000.0);
        assert_eq!(determine_reasoning_depth(&c), ReasoningDepth::Heuristic);
    }

    #[test]
    fn test_time_constraint_with_low_complexity_is_heuristic() {
        let mut c = ctx(0.5, 0.1, 0.1, 0.1);
        c.time_constraint = true;
        assert_eq!(determine_reasoning_depth(&c), ReasoningDepth::Heuristic);
    }

    #[test]
    fn test_high_quality_low_complexity_is_heuristic() {
        let c = ctx(0.9, 0.1, 0.2, 0.1);
        assert_eq!(determine_reasoning_depth(&c), ReasoningDepth::Heuristic);
    }

    #[test]
    fn test_elevated_risk_is_deep() {
        let c = ctx(0.5, 0.3, 0.3, 0.65);
        assert_eq!(determine_reasoning_depth(&c), ReasoningDepth::Deep);
    }

    #[test]
    fn test_high_complexity_is_deep() {
        let c = ctx(0.2, 0.9, 0.9, 0.5);
        assert!(c.composite_complexity() > 0.7);
        assert_eq!(determine_reasoning_depth(&c), ReasoningDepth::Deep);
    }

    #[test]
    fn test_moderate_is_standard() {
        let c = ctx(0.5, 0.5, 0.5, 0.5);
        assert_eq!(determine_reasoning_depth(&c), ReasoningDepth::Standard);
    }

    #[test]
    fn test_plan_rosters_and_caps() {
        let heuristic = create_reasoning_plan(&ctx(0.9, 0.1, 0.1, 0.1));
        assert_eq!(heuristic.depth, ReasoningDepth::Heuristic);
        assert_eq!(heuristic.agents.len(), 2);
        assert_eq!(heuristic.max_agent_calls, 4);

        let standard = create_reasoning_plan(&ctx(0.5, 0.5, 0.5, 0.5));
        assert_eq!(standard.agents.len(), 5);
        assert!(!standard.includes(AgentType::CausalReasoner));
        assert_eq!(standard.max_agent_calls, 10);

        let deep = create_reasoning_plan(&ctx(0.5, 0.5, 0.5, 0.9));
        assert!(deep.includes(AgentType::CausalReasoner));
        assert_eq!(deep.max_agent_calls, 20);
        assert!(!deep.justification.is_empty());
    }

    #[test]
    fn test_escalation_is_idempotent_on_roster() {
        let standard = create_reasoning_plan(&ctx(0.5, 0.5, 0.5, 0.5));
        let deep = standard.escalated("3 anomalies");
        assert_eq!(deep.depth, ReasoningDepth::Deep);
        assert_eq!(deep.max_agent_calls, 20);
        assert_eq!(
            deep.agents.iter().filter(|a| **a == AgentType::CausalReasoner).count(),
            1
        );

        let again = deep.escalated("violation");
        assert_eq!(again.agents, deep.agents);

        // Original plan is untouched
        assert_eq!(standard.depth, ReasoningDepth::Standard);
        assert!(!standard.includes(AgentType::CausalReasoner));
    }

    #[test]
    fn test_context_deserializes_camel_case() {
        let c: ReasoningContext = serde_json::from_str(
            r#"{"dataQuality":0.9,"ambiguityLevel":0.1,"queryComplexity":0.1,"riskLevel":0.9,"budgetAtRisk":100}"#,
        )
        .unwrap();
        assert_eq!(c.budget_at_risk, Some(100.0));
        assert!(!c.time_constraint);
    }
}
