//! Safety guardrails for proposed actions.
//!
//! Every rule is an independent async predicate over an immutable
//! [`GuardrailContext`]. The [`GuardrailEngine`] runs all rules concurrently
//! and partitions failures into blocking `violations` and advisory
//! `warnings`.
//!
//! A rule whose predicate errors is treated as passed. The error is logged
//! at `warn` level so the fail-open path stays visible.

mod rules;

pub use rules::{
    BudgetChangeMagnitudeRule, LearningPhaseRule, MinSampleSizeRule, NonzeroSpendRule,
    OrgActionBlocklistRule, ProtectedEntitiesRule, TrackingHealthRule,
};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{ActionType, EntitySnapshot, OrgPolicy, ProposedAction};
use crate::error::GuardrailError;

// ============================================================================
// Types
// ============================================================================

/// What a failing rule does to the action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailSeverity {
    /// Advisory only
    Warning,
    /// The action must not proceed
    Block,
}

/// Everything a rule may inspect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailContext {
    /// Entity the action targets
    pub entity: EntitySnapshot,
    /// Proposed action kind
    pub action_type: ActionType,
    /// Proposed relative budget change in percent, if any
    pub proposed_change: Option<f64>,
    /// Organization policy
    pub org: OrgPolicy,
}

impl GuardrailContext {
    /// Build a context from a proposed action.
    pub fn new(entity: EntitySnapshot, action: &ProposedAction, org: OrgPolicy) -> Self {
        Self {
            entity,
            action_type: action.action_type,
            proposed_change: action.budget_change_pct,
            org,
        }
    }
}

/// Result of one predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleVerdict {
    /// Whether the rule is satisfied
    pub passed: bool,
    /// Explanation shown when the rule fails
    pub message: String,
}

impl RuleVerdict {
    /// A satisfied rule.
    pub fn pass() -> Self {
        Self {
            passed: true,
            message: String::new(),
        }
    }

    /// A failed rule with a reason.
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
        }
    }
}

/// A failed rule as reported to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuardrailOutcome {
    /// Stable rule identifier
    pub id: String,
    /// Human-readable rule name
    pub name: String,
    /// Severity of the rule
    pub severity: GuardrailSeverity,
    /// Why the rule failed
    pub message: String,
}

/// Partitioned outcome of every rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuardrailCheckResult {
    /// True iff `violations` is empty
    pub safe: bool,
    /// Failed block-severity rules
    pub violations: Vec<GuardrailOutcome>,
    /// Failed warning-severity rules
    pub warnings: Vec<GuardrailOutcome>,
    /// Ids of rules that passed, including any that errored
    pub passed: Vec<String>,
    /// Check time
    pub checked_at: DateTime<Utc>,
}

impl GuardrailCheckResult {
    /// Whether a rule with `id` produced a violation.
    pub fn has_violation(&self, id: &str) -> bool {
        self.violations.iter().any(|v| v.id == id)
    }
}

/// An independently checkable safety predicate.
#[async_trait]
pub trait GuardrailRule: Send + Sync {
    /// Stable identifier, e.g. `learning_phase`.
    fn id(&self) -> &'static str;

    /// Human-readable name.
    fn name(&self) -> &'static str;

    /// Effect of a failure.
    fn severity(&self) -> GuardrailSeverity;

    /// Evaluate the rule.
    async fn check(&self, ctx: &GuardrailContext) -> Result<RuleVerdict, GuardrailError>;
}

// ============================================================================
// Engine
// ============================================================================

/// Runs a fixed battery of rules concurrently.
#[derive(Clone)]
pub struct GuardrailEngine {
    rules: Vec<Arc<dyn GuardrailRule>>,
}

impl Default for GuardrailEngine {
    fn default() -> Self {
        Self {
            rules: vec![
                Arc::new(LearningPhaseRule),
                Arc::new(MinSampleSizeRule),
                Arc::new(ProtectedEntitiesRule),
                Arc::new(TrackingHealthRule),
                Arc::new(BudgetChangeMagnitudeRule),
                Arc::new(OrgActionBlocklistRule),
                Arc::new(NonzeroSpendRule),
            ],
        }
    }
}

impl std::fmt::Debug for GuardrailEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardrailEngine")
            .field("rules", &self.rule_ids())
            .finish()
    }
}

impl GuardrailEngine {
    /// Engine with no rules.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Add a rule.
    pub fn with_rule(mut self, rule: Arc<dyn GuardrailRule>) -> Self {
        self.rules.push(rule);
        self
    }

    /// Ids of the registered rules, in registration order.
    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    /// Run every rule against `ctx`.
    pub async fn check_all(&self, ctx: GuardrailContext) -> GuardrailCheckResult {
        let ctx = Arc::new(ctx);

        let checks = self.rules.iter().map(|rule| {
            let rule = Arc::clone(rule);
            let ctx = Arc::clone(&ctx);
            async move {
                let verdict = rule.check(&ctx).await;
                (rule, verdict)
            }
        });
        let results = join_all(checks).await;

        let mut violations = Vec::new();
        let mut warnings = Vec::new();
        let mut passed = Vec::new();

        for (rule, verdict) in results {
            let verdict = match verdict {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        rule = rule.id(),
                        entity_id = %ctx.entity.id,
                        error = %e,
                        "Guardrail check failed, treating as passed"
                    );
                    RuleVerdict::pass()
                }
            };

            if verdict.passed {
                passed.push(rule.id().to_string());
                continue;
            }

            let outcome = GuardrailOutcome {
                id: rule.id().to_string(),
                name: rule.name().to_string(),
                severity: rule.severity(),
                message: verdict.message,
            };
            match rule.severity() {
                GuardrailSeverity::Block => violations.push(outcome),
                GuardrailSeverity::Warning => warnings.push(outcome),
            }
        }

        debug!(
            entity_id = %ctx.entity.id,
            action = %ctx.action_type,
            violations = violations.len(),
            warnings = warnings.len(),
            "Guardrails checked"
        );

        GuardrailCheckResult {
            safe: violations.is_empty(),
            violations,
            warnings,
            passed,
            checked_at: Utc::now(),
        }
    }
}

/// Run the built-in rule battery against `ctx`.
pub async fn check_all_guardrails(ctx: GuardrailContext) -> GuardrailCheckResult {
    GuardrailEngine::default().check_all(ctx).await
}
