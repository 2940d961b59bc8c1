//! Run model shared by the controller and the agent executors.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::ProposedAction;
use crate::error::{EngineError, EngineResult};
use crate::planner::{ReasoningDepth, ReasoningPlan};
use crate::stats::clamp01;

// ============================================================================
// Agents
// ============================================================================

/// Specialist stages the controller can run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Checks that the input data is usable
    DataValidator,
    /// Detects anomalies and trends
    PerformanceAnalyst,
    /// Explains why metrics moved and projects them forward
    CausalReasoner,
    /// Runs the guardrails against candidate actions
    RiskGuard,
    /// Summarises the gathered findings
    Explainer,
    /// Ranks candidate actions
    Prioritizer,
}

impl AgentType {
    /// Every agent, in wave order.
    pub const ALL: [AgentType; 6] = [
        AgentType::DataValidator,
        AgentType::PerformanceAnalyst,
        AgentType::CausalReasoner,
        AgentType::RiskGuard,
        AgentType::Explainer,
        AgentType::Prioritizer,
    ];

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::DataValidator => "data_validator",
            AgentType::PerformanceAnalyst => "performance_analyst",
            AgentType::CausalReasoner => "causal_reasoner",
            AgentType::RiskGuard => "risk_guard",
            AgentType::Explainer => "explainer",
            AgentType::Prioritizer => "prioritizer",
        }
    }

    /// Name of the tool recorded on execution steps.
    pub fn tool_name(&self) -> &'static str {
        match self {
            AgentType::DataValidator => "validate_data",
            AgentType::PerformanceAnalyst => "analyze_performance",
            AgentType::CausalReasoner => "analyze_causes",
            AgentType::RiskGuard => "check_guardrails",
            AgentType::Explainer => "generate_explanation",
            AgentType::Prioritizer => "score_priorities",
        }
    }

    /// Timeout and retry budget for this agent.
    pub fn default_policy(&self) -> AgentPolicy {
        let (secs, retries) = match self {
            AgentType::DataValidator => (10, 3),
            AgentType::PerformanceAnalyst => (30, 2),
            AgentType::CausalReasoner => (60, 1),
            AgentType::RiskGuard => (15, 3),
            AgentType::Explainer => (20, 2),
            AgentType::Prioritizer => (10, 2),
        };
        AgentPolicy {
            timeout_ms: secs * 1_000,
            max_retries: retries,
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentType::ALL
            .into_iter()
            .find(|a| a.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("Unknown agent type: {}", s))
    }
}

/// Latency bound for one agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentPolicy {
    /// Per-attempt timeout in milliseconds
    pub timeout_ms: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
}

impl AgentPolicy {
    /// Per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ============================================================================
// Tool output
// ============================================================================

/// Uniform envelope every agent returns.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolOutput {
    /// Whether the agent produced a usable result
    pub success: bool,
    /// Agent-specific payload
    pub data: serde_json::Value,
    /// Agent's confidence in its result, `[0, 1]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Supporting evidence
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
    /// Caveats raised by the agent
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ToolOutput {
    /// Successful output carrying `data`.
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
            ..Default::default()
        }
    }

    /// Serialize a typed report into a successful output.
    pub fn from_report<T: Serialize>(report: &T) -> EngineResult<Self> {
        Ok(Self::ok(serde_json::to_value(report)?))
    }

    /// Attach a confidence, clamped to `[0, 1]`.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(clamp01(confidence));
        self
    }

    /// Append evidence.
    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence.push(evidence.into());
        self
    }

    /// Append a warning.
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

// ============================================================================
// Run model
// ============================================================================

/// Lifecycle of one execution step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Executor returned an output
    Completed,
    /// Executor errored or timed out
    Failed,
    /// Not run because the call cap was reached
    Skipped,
}

/// One invocation of one agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentExecutionStep {
    /// Step identifier
    pub id: Uuid,
    /// Agent invoked
    pub agent: AgentType,
    /// Tool name recorded for the agent
    pub tool_name: String,
    /// Input payload handed to the agent
    pub input: serde_json::Value,
    /// Output, when the agent completed
    pub output: Option<ToolOutput>,
    /// Outcome
    pub status: StepStatus,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// Error text, when failed or skipped
    pub error: Option<String>,
    /// Start time
    pub started_at: DateTime<Utc>,
}

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, not yet started
    Pending,
    /// Waves executing
    Running,
    /// Finished with a synthesized result
    Completed,
    /// Controller control flow failed
    Failed,
}

impl RunStatus {
    /// Whether the run can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

/// Findings, warnings and aggregate confidence distilled from a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SynthesizedResult {
    /// Mean of every reported stage confidence
    pub confidence: Option<f64>,
    /// Positive observations
    pub findings: Vec<String>,
    /// Caveats and problems
    pub warnings: Vec<String>,
    /// Final explanation text
    pub explanation: String,
    /// Ranked recommendations
    pub recommendations: Vec<Recommendation>,
}

/// A ranked candidate action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    /// Recommendation identifier
    pub id: String,
    /// Entity it targets
    pub entity_id: String,
    /// Proposed action
    pub action: ProposedAction,
    /// Ranking score, `[0, 1]`
    pub priority_score: f64,
    /// Confidence attached to the recommendation
    pub confidence: f64,
    /// Whether the guardrails allow it
    pub guardrails_passed: bool,
    /// Violated guardrail ids
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,
    /// Why it is recommended
    pub rationale: String,
}

/// One orchestration execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRun {
    /// Run identifier
    pub id: Uuid,
    /// Caller user, if known
    pub user_id: Option<String>,
    /// Caller session, if known
    pub session_id: Option<String>,
    /// Caller request identifier
    pub request_id: String,
    /// Current plan, replaced on escalation
    pub plan: ReasoningPlan,
    /// Executed steps, append-only
    pub steps: Vec<AgentExecutionStep>,
    /// Lifecycle state
    pub status: RunStatus,
    /// Synthesized result, once completed
    pub result: Option<SynthesizedResult>,
    /// Control-flow error, once failed
    pub error: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Terminal transition time
    pub completed_at: Option<DateTime<Utc>>,
}

impl AgentRun {
    /// Create a pending run for `plan`.
    pub fn new(input: &ControllerInput, plan: ReasoningPlan) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: input.user_id.clone(),
            session_id: input.session_id.clone(),
            request_id: input
                .request_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            plan,
            steps: Vec::new(),
            status: RunStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Current depth.
    pub fn depth(&self) -> ReasoningDepth {
        self.plan.depth
    }

    /// Steps that actually invoked an executor.
    pub fn calls_made(&self) -> u32 {
        self.steps
            .iter()
            .filter(|s| s.status != StepStatus::Skipped)
            .count() as u32
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.status.is_terminal() {
            return Err(EngineError::InvalidState {
                message: format!("run {} is already {:?}", self.id, self.status),
            });
        }
        Ok(())
    }

    /// Move from pending to running.
    pub fn start(&mut self) -> EngineResult<()> {
        if self.status != RunStatus::Pending {
            return Err(EngineError::InvalidState {
                message: format!("run {} cannot start from {:?}", self.id, self.status),
            });
        }
        self.status = RunStatus::Running;
        Ok(())
    }

    /// Append a step.
    pub fn push_step(&mut self, step: AgentExecutionStep) -> EngineResult<()> {
        self.ensure_open()?;
        self.steps.push(step);
        Ok(())
    }

    /// Replace the plan with an escalated one.
    pub fn replace_plan(&mut self, plan: ReasoningPlan) -> EngineResult<()> {
        self.ensure_open()?;
        self.plan = plan;
        Ok(())
    }

    /// Terminal transition to completed.
    pub fn complete(&mut self, result: SynthesizedResult) -> EngineResult<()> {
        self.ensure_open()?;
        self.status = RunStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Terminal transition to failed. A run that is already terminal is left untouched.
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = RunStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }
}

// ============================================================================
// Controller I/O
// ============================================================================

/// What the caller wants analysed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerInput {
    /// Free-form question, carried into the explanation
    pub query: String,
    /// Entity to analyse
    pub entity_id: String,
    /// Organization whose policy applies
    pub org_id: String,
    /// Day under analysis; defaults to today (UTC)
    pub as_of: Option<NaiveDate>,
    /// Candidate actions to vet and rank
    pub proposed_actions: Vec<ProposedAction>,
    /// Caller user
    pub user_id: Option<String>,
    /// Caller session
    pub session_id: Option<String>,
    /// Caller request identifier
    pub request_id: Option<String>,
}

/// Result of [`ControllerAgent::process`](super::ControllerAgent::process).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerOutput {
    /// Whether the run completed
    pub success: bool,
    /// Synthesized result, when completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SynthesizedResult>,
    /// Ranked recommendations, when completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Vec<Recommendation>>,
    /// Final explanation, when completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// Aggregate confidence, when any stage reported one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// The full run record
    pub run: AgentRun,
    /// Control-flow error, when failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControllerOutput {
    /// Warnings from the synthesized result, empty when the run failed.
    pub fn warnings(&self) -> &[String] {
        self.result
            .as_ref()
            .map(|r| r.warnings.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{create_reasoning_plan, ReasoningContext};

    #[test]
    fn test_agent_type_roundtrip() {
        for agent in AgentType::ALL {
            assert_eq!(agent.as_str().parse::<AgentType>().unwrap(), agent);
        }
        assert!("oracle".parse::<AgentType>().is_err());
    }

    #[test]
    fn test_default_policies() {
        let validator = AgentType::DataValidator.default_policy();
        assert_eq!(validator.timeout(), Duration::from_secs(10));
        assert_eq!(validator.max_retries, 3);
        assert_eq!(AgentType::CausalReasoner.default_policy().max_retries, 1);
    }

    #[test]
    fn test_tool_output_confidence_is_clamped() {
        let out = ToolOutput::ok(serde_json::json!({})).with_confidence(1.7);
        assert_eq!(out.confidence, Some(1.0));
    }

    #[test]
    fn test_run_is_immutable_once_terminal() {
        let plan = create_reasoning_plan(&ReasoningContext::default());
        let mut run = AgentRun::new(&ControllerInput::default(), plan.clone());
        run.start().unwrap();
        run.complete(SynthesizedResult::default()).unwrap();

        assert!(run.replace_plan(plan.escalated("test")).is_err());
        assert!(run.complete(SynthesizedResult::default()).is_err());
        run.fail("late failure");
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.error.is_none());
    }
}
