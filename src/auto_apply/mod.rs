//! Auto-apply gate.
//!
//! Decides whether a recommendation may execute without a human. Six checks
//! run in a fixed order and the first failure short-circuits:
//!
//! 1. the feature is enabled
//! 2. calibrated confidence meets the configured minimum
//! 3. guardrails passed, when required
//! 4. today's auto-apply count is under the daily cap
//! 5. the action type is not excluded
//! 6. the entity is not excluded

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::parse_var;
use crate::confidence::{calibrate_confidence, calibrate_from_store, CalibrationStore};
use crate::domain::ActionType;
use crate::error::AppError;
use crate::orchestrator::Recommendation;
use crate::storage::{record_audit, AuditEvent, AuditSink};

// ============================================================================
// Configuration
// ============================================================================

/// Auto-apply settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoApplyConfig {
    /// Master switch
    pub enabled: bool,
    /// Minimum calibrated confidence, `[0, 1]`
    pub min_confidence: f64,
    /// Whether a recommendation must have passed the guardrails
    pub require_guardrails: bool,
    /// Maximum unattended applications per UTC day
    pub max_daily: u32,
    /// Action types never applied unattended
    pub excluded_action_types: HashSet<ActionType>,
    /// Entities never changed unattended
    pub excluded_entity_ids: HashSet<String>,
}

impl Default for AutoApplyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_confidence: 0.9,
            require_guardrails: true,
            max_daily: 5,
            excluded_action_types: HashSet::new(),
            excluded_entity_ids: HashSet::new(),
        }
    }
}

fn list_var(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl AutoApplyConfig {
    /// Load from `AUTO_APPLY_*` environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let excluded_action_types = list_var("AUTO_APPLY_EXCLUDED_ACTIONS")
            .iter()
            .map(|s| s.parse::<ActionType>())
            .collect::<Result<HashSet<_>, _>>()
            .map_err(|message| AppError::Config { message })?;

        Ok(Self {
            enabled: parse_var("AUTO_APPLY_ENABLED")?.unwrap_or(defaults.enabled),
            min_confidence: parse_var("AUTO_APPLY_MIN_CONFIDENCE")?
                .unwrap_or(defaults.min_confidence),
            require_guardrails: parse_var("AUTO_APPLY_REQUIRE_GUARDRAILS")?
                .unwrap_or(defaults.require_guardrails),
            max_daily: parse_var("AUTO_APPLY_MAX_DAILY")?.unwrap_or(defaults.max_daily),
            excluded_action_types,
            excluded_entity_ids: list_var("AUTO_APPLY_EXCLUDED_ENTITIES")
                .into_iter()
                .collect(),
        })
    }
}

// ============================================================================
// Gate
// ============================================================================

/// Verdict of the gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoApplyResult {
    /// Whether the recommendation may be applied unattended
    pub should_auto_apply: bool,
    /// Why it was rejected; `None` when approved
    pub reason: Option<String>,
    /// Calibrated confidence, once the confidence check ran
    pub calibrated_confidence: Option<f64>,
    /// Names of the checks that passed, in order
    pub checks_passed: Vec<String>,
}

impl AutoApplyResult {
    fn reject(checks_passed: Vec<String>, calibrated: Option<f64>, reason: String) -> Self {
        Self {
            should_auto_apply: false,
            reason: Some(reason),
            calibrated_confidence: calibrated,
            checks_passed,
        }
    }
}

/// Run the six gate checks for `recommendation`.
///
/// `daily_count` is the number of recommendations already auto-applied
/// today. When the calibration store is unavailable the built-in table is
/// used instead.
pub async fn should_auto_apply(
    recommendation: &Recommendation,
    config: &AutoApplyConfig,
    daily_count: u32,
    calibration: &dyn CalibrationStore,
) -> AutoApplyResult {
    let mut passed: Vec<String> = Vec::new();

    if !config.enabled {
        return AutoApplyResult::reject(passed, None, "Auto-apply is disabled".to_string());
    }
    passed.push("enabled".to_string());

    let calibrated = match calibrate_from_store(calibration, recommendation.confidence).await {
        Ok(result) => result,
        Err(e) => {
            warn!(error = %e, "Calibration store unavailable, using default table");
            calibrate_confidence(recommendation.confidence)
        }
    };
    let confidence = calibrated.calibrated_confidence;
    if confidence < config.min_confidence {
        return AutoApplyResult::reject(
            passed,
            Some(confidence),
            format!(
                "Calibrated confidence {:.2} is below the minimum {:.2}",
                confidence, config.min_confidence
            ),
        );
    }
    passed.push("confidence".to_string());

    if config.require_guardrails && !recommendation.guardrails_passed {
        let reason = if recommendation.blocked_by.is_empty() {
            "Guardrails have not passed".to_string()
        } else {
            format!("Blocked by guardrails: {}", recommendation.blocked_by.join(", "))
        };
        return AutoApplyResult::reject(passed, Some(confidence), reason);
    }
    passed.push("guardrails".to_string());

    if daily_count >= config.max_daily {
        return AutoApplyResult::reject(
            passed,
            Some(confidence),
            format!("Daily auto-apply limit of {} reached", config.max_daily),
        );
    }
    passed.push("daily_limit".to_string());

    let action_type = recommendation.action.action_type;
    if config.excluded_action_types.contains(&action_type) {
        return AutoApplyResult::reject(
            passed,
            Some(confidence),
            format!("Action type {} is excluded from auto-apply", action_type),
        );
    }
    passed.push("action_type".to_string());

    if config.excluded_entity_ids.contains(&recommendation.entity_id) {
        return AutoApplyResult::reject(
            passed,
            Some(confidence),
            format!("Entity {} is excluded from auto-apply", recommendation.entity_id),
        );
    }
    passed.push("entity".to_string());

    AutoApplyResult {
        should_auto_apply: true,
        reason: None,
        calibrated_confidence: Some(confidence),
        checks_passed: passed,
    }
}

#[derive(Debug)]
struct DailyCounter {
    day: NaiveDate,
    count: u32,
}

impl DailyCounter {
    fn roll(&mut self, today: NaiveDate) {
        if self.day != today {
            self.day = today;
            self.count = 0;
        }
    }
}

/// Gate that tracks how many recommendations were auto-applied today.
pub struct AutoApplyGate {
    config: AutoApplyConfig,
    calibration: Arc<dyn CalibrationStore>,
    audit: Arc<dyn AuditSink>,
    counter: Arc<RwLock<DailyCounter>>,
}

impl AutoApplyGate {
    /// Create a gate with a zero count for today.
    pub fn new(
        config: AutoApplyConfig,
        calibration: Arc<dyn CalibrationStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config,
            calibration,
            audit,
            counter: Arc::new(RwLock::new(DailyCounter {
                day: Utc::now().date_naive(),
                count: 0,
            })),
        }
    }

    /// Decide on `recommendation`, counting it against today's cap when approved.
    pub async fn evaluate(&self, recommendation: &Recommendation) -> AutoApplyResult {
        let result = {
            // Held across the decision so concurrent approvals cannot overshoot the cap
            let mut counter = self.counter.write().await;
            counter.roll(Utc::now().date_naive());
            let result = should_auto_apply(
                recommendation,
                &self.config,
                counter.count,
                self.calibration.as_ref(),
            )
            .await;
            if result.should_auto_apply {
                counter.count += 1;
            }
            result
        };

        if result.should_auto_apply {
            info!(
                recommendation_id = %recommendation.id,
                entity_id = %recommendation.entity_id,
                action = %recommendation.action.action_type,
                "Recommendation approved for auto-apply"
            );
        } else {
            info!(
                recommendation_id = %recommendation.id,
                reason = result.reason.as_deref().unwrap_or(""),
                "Auto-apply rejected"
            );
        }

        record_audit(
            self.audit.as_ref(),
            AuditEvent::AutoApplyDecision {
                recommendation_id: recommendation.id.clone(),
                entity_id: recommendation.entity_id.clone(),
                action_type: recommendation.action.action_type,
                approved: result.should_auto_apply,
                reason: result.reason.clone(),
                at: Utc::now(),
            },
        )
        .await;
        result
    }

    /// Recommendations auto-applied so far today.
    pub async fn applied_today(&self) -> u32 {
        let mut counter = self.counter.write().await;
        counter.roll(Utc::now().date_naive());
        debug!(count = counter.count, "Auto-apply count read");
        counter.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confidence::calibration::MockCalibrationStore;
    use crate::confidence::{CalibrationTable, InMemoryCalibrationStore};
    use crate::domain::ProposedAction;
    use crate::error::StorageError;
    use crate::storage::InMemoryStore;

    fn identity_calibration() -> InMemoryCalibrationStore {
        let mut table = CalibrationTable::default();
        for bucket in &mut table.buckets {
            bucket.observed_accuracy = bucket.predicted_accuracy;
        }
        InMemoryCalibrationStore::with_table(table)
    }

    fn enabled() -> AutoApplyConfig {
        AutoApplyConfig {
            enabled: true,
            ..Default::default()
        }
    }

    fn recommendation(confidence: f64) -> Recommendation {
        Recommendation {
            id: "rec-1".to_string(),
            entity_id: "ad-1".to_string(),
            action: ProposedAction::new(ActionType::DecreaseBudget).with_budget_change(-20.0),
            priority_score: 0.7,
            confidence,
            guardrails_passed: true,
            blocked_by: Vec::new(),
            rationale: "ROAS dropped".to_string(),
        }
    }

    #[tokio::test]
    async fn test_disabled_rejects_first() {
        let result = should_auto_apply(
            &recommendation(0.99),
            &AutoApplyConfig::default(),
            0,
            &identity_calibration(),
        )
        .await;
        assert!(!result.should_auto_apply);
        assert_eq!(result.reason.as_deref(), Some("Auto-apply is disabled"));
        assert!(result.checks_passed.is_empty());
    }

    #[tokio::test]
    async fn test_all_checks_pass() {
        let result =
            should_auto_apply(&recommendation(0.95), &enabled(), 0, &identity_calibration()).await;
        assert!(result.should_auto_apply);
        assert!(result.reason.is_none());
        assert_eq!(
            result.checks_passed,
            vec!["enabled", "confidence", "guardrails", "daily_limit", "action_type", "entity"]
        );
    }

    #[tokio::test]
    async fn test_default_calibration_lowers_high_confidence() {
        // 0.95 * (0.82 / 0.9) falls below 0.9
        let result = should_auto_apply(
            &recommendation(0.95),
            &enabled(),
            0,
            &InMemoryCalibrationStore::new(),
        )
        .await;
        assert!(!result.should_auto_apply);
        assert!(result.reason.unwrap().contains("below the minimum"));
        assert!(result.calibrated_confidence.unwrap() < 0.9);
    }

    #[tokio::test]
    async fn test_blocked_guardrails_name_rules() {
        let mut rec = recommendation(0.95);
        rec.guardrails_passed = false;
        rec.blocked_by = vec!["learning_phase".to_string()];
        let result = should_auto_apply(&rec, &enabled(), 0, &identity_calibration()).await;
        assert_eq!(
            result.reason.as_deref(),
            Some("Blocked by guardrails: learning_phase")
        );

        let config = AutoApplyConfig {
            require_guardrails: false,
            ..enabled()
        };
        assert!(should_auto_apply(&rec, &config, 0, &identity_calibration()).await.should_auto_apply);
    }

    #[tokio::test]
    async fn test_daily_cap_and_exclusions() {
        let store = identity_calibration();
        let rec = recommendation(0.95);

        let result = should_auto_apply(&rec, &enabled(), 5, &store).await;
        assert!(result.reason.unwrap().contains("Daily auto-apply limit"));

        let mut config = enabled();
        config.excluded_action_types.insert(ActionType::DecreaseBudget);
        let result = should_auto_apply(&rec, &config, 0, &store).await;
        assert!(result.reason.unwrap().contains("decrease_budget"));

        let mut config = enabled();
        config.excluded_entity_ids.insert("ad-1".to_string());
        let result = should_auto_apply(&rec, &config, 0, &store).await;
        assert!(result.reason.unwrap().contains("Entity ad-1"));
    }

    #[tokio::test]
    async fn test_store_failure_falls_back_to_default_table() {
        let mut store = MockCalibrationStore::new();
        store.expect_table().returning(|| {
            Err(StorageError::Query {
                message: "unavailable".to_string(),
            })
        });
        let result = should_auto_apply(&recommendation(0.5), &enabled(), 0, &store).await;
        assert!(!result.should_auto_apply);
        // 0.5 * (0.48 / 0.5)
        assert!((result.calibrated_confidence.unwrap() - 0.48).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_gate_counts_approvals_against_cap() {
        let audit = InMemoryStore::new();
        let config = AutoApplyConfig {
            max_daily: 2,
            ..enabled()
        };
        let gate = AutoApplyGate::new(
            config,
            Arc::new(identity_calibration()),
            Arc::new(audit.clone()),
        );

        let rec = recommendation(0.95);
        assert!(gate.evaluate(&rec).await.should_auto_apply);
        assert!(gate.evaluate(&rec).await.should_auto_apply);
        let third = gate.evaluate(&rec).await;
        assert!(!third.should_auto_apply);
        assert_eq!(gate.applied_today().await, 2);

        let events = audit.audit_events().await;
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[2],
            AuditEvent::AutoApplyDecision { approved: false, .. }
        ));
    }
}
