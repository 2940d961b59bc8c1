//! End-to-end controller scenarios over the in-memory store.
//!
//! The seeded entity has fourteen days of flat ROAS (3.0) followed by a
//! current day whose revenue drops by 45%.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};

use ad_decision_engine::anomaly::{run_anomaly_detection, DetectorConfig, Severity};
use ad_decision_engine::config::OrchestratorConfig;
use ad_decision_engine::domain::{
    ActionType, DailyMetrics, EntityLevel, EntitySnapshot, Metric, OrgPolicy, ProposedAction,
    TrackingStatus,
};
use ad_decision_engine::guardrails::GuardrailEngine;
use ad_decision_engine::orchestrator::{
    builtin_registry, AgentType, ControllerAgent, ControllerInput, RunStatus, StepStatus,
};
use ad_decision_engine::planner::{ReasoningContext, ReasoningDepth};
use ad_decision_engine::storage::{AuditEvent, InMemoryStore};

const ENTITY: &str = "ad-42";

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 17).unwrap()
}

fn day(date: NaiveDate, revenue: f64) -> DailyMetrics {
    DailyMetrics {
        date,
        spend: 100.0,
        impressions: 10_000,
        clicks: 200,
        conversions: 10,
        revenue,
    }
}

async fn seeded_store() -> InMemoryStore {
    let store = InMemoryStore::new();
    store
        .put_entity(EntitySnapshot {
            id: ENTITY.to_string(),
            name: "Spring sale".to_string(),
            level: EntityLevel::Ad,
            spend: 1_500.0,
            impressions: 150_000,
            clicks: 3_000,
            conversions: 150,
            revenue: 4_365.0,
            daily_budget: Some(100.0),
            tracking_status: TrackingStatus::Healthy,
            data_age_hours: 2.0,
        })
        .await;

    let mut rows: Vec<DailyMetrics> = (1..=14)
        .map(|i| day(as_of() - Duration::days(i), 300.0))
        .collect();
    rows.push(day(as_of(), 165.0));
    store.put_daily_metrics(ENTITY, rows).await;

    store
        .put_policy(OrgPolicy {
            org_id: "org-7".to_string(),
            never_pause: HashSet::from([ENTITY.to_string()]),
            ..OrgPolicy::default()
        })
        .await;
    store
}

fn controller(store: &InMemoryStore) -> ControllerAgent {
    let shared = Arc::new(store.clone());
    let registry = builtin_registry(
        shared.clone(),
        shared.clone(),
        DetectorConfig::default(),
        GuardrailEngine::default(),
    );
    ControllerAgent::new(registry, OrchestratorConfig::default(), shared)
}

fn input() -> ControllerInput {
    ControllerInput {
        query: "Why did ROAS drop?".to_string(),
        entity_id: ENTITY.to_string(),
        org_id: "org-7".to_string(),
        as_of: Some(as_of()),
        proposed_actions: vec![
            ProposedAction::new(ActionType::DecreaseBudget).with_budget_change(-20.0),
            ProposedAction::new(ActionType::Pause),
        ],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_roas_drop_is_detected() {
    let store = seeded_store().await;
    let anomalies = run_anomaly_detection(&store, ENTITY, as_of(), &DetectorConfig::default())
        .await
        .unwrap();

    let roas = anomalies
        .iter()
        .find(|a| a.metric_name == Metric::Roas)
        .expect("roas anomaly");
    assert!(roas.anomaly_type.to_string().ends_with("_drop"));
    assert!(roas.severity >= Severity::High);
    assert!(roas.deviation_pct < -40.0);
}

#[tokio::test]
async fn test_high_risk_run_is_deep_with_warnings() {
    let store = seeded_store().await;
    let context = ReasoningContext {
        risk_level: 0.9,
        ..Default::default()
    };

    let output = controller(&store).process(input(), &context).await;

    assert!(output.success, "run failed: {:?}", output.error);
    assert_eq!(output.run.status, RunStatus::Completed);
    assert_eq!(output.run.depth(), ReasoningDepth::Deep);
    assert!(output.run.plan.includes(AgentType::CausalReasoner));
    assert!(!output.warnings().is_empty());
    assert!(output
        .run
        .steps
        .iter()
        .all(|s| s.status == StepStatus::Completed));

    let confidence = output.confidence.unwrap();
    assert!((0.0..=1.0).contains(&confidence));
    assert!(output.explanation.unwrap().contains(ENTITY));
}

#[tokio::test]
async fn test_recommendations_respect_org_policy() {
    let store = seeded_store().await;
    let output = controller(&store)
        .process(input(), &ReasoningContext::default())
        .await;

    let recommendations = output.recommendations.unwrap();
    assert_eq!(recommendations.len(), 2);

    let pause = recommendations
        .iter()
        .find(|r| r.action.action_type == ActionType::Pause)
        .unwrap();
    assert!(!pause.guardrails_passed);
    assert_eq!(pause.blocked_by, vec!["protected_entities".to_string()]);
    assert_eq!(pause.priority_score, 0.0);

    let decrease = &recommendations[0];
    assert_eq!(decrease.action.action_type, ActionType::DecreaseBudget);
    assert!(decrease.guardrails_passed);
    assert!(decrease.priority_score > 0.0);
}

#[tokio::test]
async fn test_run_is_audited() {
    let store = seeded_store().await;
    controller(&store)
        .process(input(), &ReasoningContext::default())
        .await;

    let events = store.audit_events().await;
    assert!(matches!(events.first(), Some(AuditEvent::RunStarted { .. })));
    assert!(matches!(events.last(), Some(AuditEvent::RunCompleted { .. })));
}

#[tokio::test]
async fn test_unknown_entity_fails_stages_not_run() {
    let store = seeded_store().await;
    let mut request = input();
    request.entity_id = "missing".to_string();

    let output = controller(&store)
        .process(request, &ReasoningContext::default())
        .await;

    assert!(output.success);
    let validator = output
        .run
        .steps
        .iter()
        .find(|s| s.agent == AgentType::DataValidator)
        .unwrap();
    assert_eq!(validator.status, StepStatus::Failed);
    assert!(output
        .warnings()
        .iter()
        .any(|w| w.starts_with("data_validator failed")));
}

#[tokio::test]
async fn test_without_proposals_derived_actions_are_vetted() {
    let store = seeded_store().await;
    let mut request = input();
    request.proposed_actions.clear();

    let output = controller(&store)
        .process(request, &ReasoningContext::default())
        .await;

    assert!(output.success, "run failed: {:?}", output.error);
    let recommendations = output.recommendations.unwrap();
    assert_eq!(recommendations.len(), 1);
    let decrease = &recommendations[0];
    assert_eq!(decrease.action.action_type, ActionType::DecreaseBudget);
    assert_eq!(decrease.action.budget_change_pct, Some(-20.0));
    assert!(decrease.guardrails_passed);
    assert!(decrease.blocked_by.is_empty());
    assert!(decrease.priority_score > 0.0);

    let risk = output
        .run
        .steps
        .iter()
        .find(|s| s.agent == AgentType::RiskGuard)
        .unwrap();
    let assessments = &risk.output.as_ref().unwrap().data["assessments"];
    assert_eq!(assessments.as_array().unwrap().len(), 1);
    assert_eq!(assessments[0]["action"]["action_type"], "decrease_budget");
}

#[tokio::test]
async fn test_blocked_derived_action_escalates_run() {
    let store = seeded_store().await;
    store
        .put_policy(OrgPolicy {
            org_id: "org-7".to_string(),
            never_recommend: HashSet::from([ActionType::DecreaseBudget]),
            ..OrgPolicy::default()
        })
        .await;
    let mut request = input();
    request.proposed_actions.clear();

    let output = controller(&store)
        .process(request, &ReasoningContext::default())
        .await;

    assert!(output.success, "run failed: {:?}", output.error);
    let recommendations = output.recommendations.unwrap();
    assert!(!recommendations[0].guardrails_passed);
    assert_eq!(
        recommendations[0].blocked_by,
        vec!["org_action_blocklist".to_string()]
    );

    assert_eq!(output.run.depth(), ReasoningDepth::Deep);
    assert!(output
        .run
        .steps
        .iter()
        .any(|s| s.agent == AgentType::CausalReasoner && s.status == StepStatus::Completed));
    let escalations = store
        .audit_events()
        .await
        .into_iter()
        .filter(|e| matches!(e, AuditEvent::DepthEscalated { .. }))
        .count();
    assert_eq!(escalations, 1);
}
