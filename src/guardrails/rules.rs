use async_trait::async_trait;

use super::{GuardrailContext, GuardrailRule, GuardrailSeverity, RuleVerdict};
use crate::domain::{ActionType, Metric, TrackingStatus};
use crate::error::GuardrailError;

/// Blocks changes to entities that have not left the learning phase.
#[derive(Debug, Clone, Copy, Default)]
pub struct LearningPhaseRule;

#[async_trait]
impl GuardrailRule for LearningPhaseRule {
    fn id(&self) -> &'static str {
        "learning_phase"
    }

    fn name(&self) -> &'static str {
        "Learning phase protection"
    }

    fn severity(&self) -> GuardrailSeverity {
        GuardrailSeverity::Block
    }

    async fn check(&self, ctx: &GuardrailContext) -> Result<RuleVerdict, GuardrailError> {
        let min = ctx.org.thresholds.min_conversions;
        if ctx.action_type.is_modifying() && ctx.entity.conversions < min {
            return Ok(RuleVerdict::fail(format!(
                "Entity has {} conversions; {} are required to exit the learning phase",
                ctx.entity.conversions, min
            )));
        }
        Ok(RuleVerdict::pass())
    }
}

/// Blocks changes backed by too few impressions. Pauses need more.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinSampleSizeRule;

#[async_trait]
impl GuardrailRule for MinSampleSizeRule {
    fn id(&self) -> &'static str {
        "min_sample_size"
    }

    fn name(&self) -> &'static str {
        "Minimum sample size"
    }

    fn severity(&self) -> GuardrailSeverity {
        GuardrailSeverity::Block
    }

    async fn check(&self, ctx: &GuardrailContext) -> Result<RuleVerdict, GuardrailError> {
        if !ctx.action_type.is_modifying() {
            return Ok(RuleVerdict::pass());
        }
        let thresholds = &ctx.org.thresholds;
        let required = if ctx.action_type == ActionType::Pause {
            thresholds.min_impressions_for_pause
        } else {
            thresholds.min_impressions
        };
        if ctx.entity.impressions < required {
            return Ok(RuleVerdict::fail(format!(
                "{} impressions is below the {} required for {}",
                ctx.entity.impressions, required, ctx.action_type
            )));
        }
        Ok(RuleVerdict::pass())
    }
}

/// Blocks pausing listed entities and top performers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtectedEntitiesRule;

#[async_trait]
impl GuardrailRule for ProtectedEntitiesRule {
    fn id(&self) -> &'static str {
        "protected_entities"
    }

    fn name(&self) -> &'static str {
        "Protected entities"
    }

    fn severity(&self) -> GuardrailSeverity {
        GuardrailSeverity::Block
    }

    async fn check(&self, ctx: &GuardrailContext) -> Result<RuleVerdict, GuardrailError> {
        if ctx.action_type != ActionType::Pause {
            return Ok(RuleVerdict::pass());
        }
        if ctx.org.never_pause.contains(&ctx.entity.id) {
            return Ok(RuleVerdict::fail(format!(
                "{} is on the organization's never-pause list",
                ctx.entity.id
            )));
        }
        let top = ctx.org.thresholds.top_performer_roas;
        if let Some(roas) = ctx.entity.value(Metric::Roas) {
            if roas >= top {
                return Ok(RuleVerdict::fail(format!(
                    "ROAS {:.2} makes this a top performer (>= {:.2})",
                    roas, top
                )));
            }
        }
        Ok(RuleVerdict::pass())
    }
}

/// Blocks scaling while conversion tracking is not known to be healthy.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackingHealthRule;

#[async_trait]
impl GuardrailRule for TrackingHealthRule {
    fn id(&self) -> &'static str {
        "tracking_health"
    }

    fn name(&self) -> &'static str {
        "Tracking health"
    }

    fn severity(&self) -> GuardrailSeverity {
        GuardrailSeverity::Block
    }

    async fn check(&self, ctx: &GuardrailContext) -> Result<RuleVerdict, GuardrailError> {
        if ctx.action_type.is_scaling() && ctx.entity.tracking_status != TrackingStatus::Healthy {
            return Ok(RuleVerdict::fail(format!(
                "Tracking is {:?}; scaling requires healthy tracking",
                ctx.entity.tracking_status
            )));
        }
        Ok(RuleVerdict::pass())
    }
}

/// Warns about large relative budget changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BudgetChangeMagnitudeRule;

#[async_trait]
impl GuardrailRule for BudgetChangeMagnitudeRule {
    fn id(&self) -> &'static str {
        "budget_change_magnitude"
    }

    fn name(&self) -> &'static str {
        "Budget change magnitude"
    }

    fn severity(&self) -> GuardrailSeverity {
        GuardrailSeverity::Warning
    }

    async fn check(&self, ctx: &GuardrailContext) -> Result<RuleVerdict, GuardrailError> {
        let limit = ctx.org.thresholds.max_budget_change_pct;
        match ctx.proposed_change {
            Some(pct) if !pct.is_finite() => Err(GuardrailError::Evaluation {
                rule_id: self.id().to_string(),
                message: format!("budget change is not a number: {}", pct),
            }),
            Some(pct) if pct.abs() > limit => Ok(RuleVerdict::fail(format!(
                "Budget change of {:.0}% exceeds {:.0}%",
                pct, limit
            ))),
            _ => Ok(RuleVerdict::pass()),
        }
    }
}

/// Blocks action types the organization never wants recommended.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrgActionBlocklistRule;

#[async_trait]
impl GuardrailRule for OrgActionBlocklistRule {
    fn id(&self) -> &'static str {
        "org_action_blocklist"
    }

    fn name(&self) -> &'static str {
        "Organization action blocklist"
    }

    fn severity(&self) -> GuardrailSeverity {
        GuardrailSeverity::Block
    }

    async fn check(&self, ctx: &GuardrailContext) -> Result<RuleVerdict, GuardrailError> {
        if ctx.org.never_recommend.contains(&ctx.action_type) {
            return Ok(RuleVerdict::fail(format!(
                "Organization {} does not allow {} actions",
                ctx.org.org_id, ctx.action_type
            )));
        }
        Ok(RuleVerdict::pass())
    }
}

/// Blocks changes to entities that are not spending. Resuming is exempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonzeroSpendRule;

#[async_trait]
impl GuardrailRule for NonzeroSpendRule {
    fn id(&self) -> &'static str {
        "nonzero_spend"
    }

    fn name(&self) -> &'static str {
        "Nonzero spend"
    }

    fn severity(&self) -> GuardrailSeverity {
        GuardrailSeverity::Block
    }

    async fn check(&self, ctx: &GuardrailContext) -> Result<RuleVerdict, GuardrailError> {
        let applies = ctx.action_type.is_modifying() && ctx.action_type != ActionType::Resume;
        if applies && ctx.entity.spend <= 0.0 {
            return Ok(RuleVerdict::fail("Entity has no spend to act on"));
        }
        Ok(RuleVerdict::pass())
    }
}
