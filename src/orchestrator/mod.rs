//! Multi-stage orchestration of the specialist agents.
//!
//! A run executes the planned roster in six fixed waves:
//!
//! ```text
//! data_validator → performance_analyst → causal_reasoner → risk_guard → explainer → prioritizer
//!                          └─ escalation check ────────────────────┘
//! ```
//!
//! Each wave runs only when its agent is on the (possibly escalated)
//! roster. Escalation is checked after the analyst and after the risk
//! guard; a causal wave added by the second check runs before the
//! explainer. Every executor returns a [`ToolOutput`]; outputs are kept per run
//! in [`GatheredData`] and distilled by [`synthesize`] once all waves ran.

mod agents;
mod controller;
mod executor;
mod types;

pub use agents::{
    builtin_registry, candidate_actions, ActionAssessment, CausalHypothesis, CausalReasonerAgent,
    CausalReport, DataValidatorAgent, ExplainerAgent, ExplanationReport, PerformanceAnalystAgent,
    PerformanceReport, PrioritizerAgent, PriorityReport, RiskGuardAgent, RiskReport,
    ValidationReport,
};
pub use controller::{synthesize, ControllerAgent, DEFAULT_EXPLANATION, UNVETTED_WARNING};
pub use executor::{AgentExecutor, AgentRequest, ExecutorRegistry, GatheredData, ResilientExecutor};
pub use types::{
    AgentExecutionStep, AgentPolicy, AgentRun, AgentType, ControllerInput, ControllerOutput,
    Recommendation, RunStatus, StepStatus, SynthesizedResult, ToolOutput,
};
