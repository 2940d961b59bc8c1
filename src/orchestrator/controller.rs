//! Wave-based run execution, escalation and synthesis.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::agents::{
    CausalReport, ExplanationReport, PerformanceReport, PriorityReport, RiskReport,
    ValidationReport,
};
use super::executor::{AgentRequest, ExecutorRegistry, GatheredData};
use super::types::{
    AgentExecutionStep, AgentRun, AgentType, ControllerInput, ControllerOutput, StepStatus,
    SynthesizedResult,
};
use crate::config::OrchestratorConfig;
use crate::error::{EngineError, EngineResult};
use crate::planner::{create_reasoning_plan, ReasoningContext};
use crate::stats::mean;
use crate::storage::{record_audit, AuditEvent, AuditSink};

/// Explanation used when the explainer did not run or produced nothing.
pub const DEFAULT_EXPLANATION: &str = "Analysis completed based on available data.";

/// Warning added when recommendations exist but no guardrail report does.
pub const UNVETTED_WARNING: &str = "Recommendations were not checked against the guardrails";

/// Plans a run, executes its waves and synthesizes the result.
pub struct ControllerAgent {
    registry: ExecutorRegistry,
    config: OrchestratorConfig,
    audit: Arc<dyn AuditSink>,
}

impl ControllerAgent {
    /// Create a controller. Executors are wrapped with their timeout and
    /// retry policy when `config.enforce_timeouts` is set.
    pub fn new(
        registry: ExecutorRegistry,
        config: OrchestratorConfig,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let registry = if config.enforce_timeouts {
            registry.into_resilient(Duration::from_millis(config.retry_delay_ms))
        } else {
            registry
        };
        Self {
            registry,
            config,
            audit,
        }
    }

    /// Plan and execute a run for `input`.
    ///
    /// Stage failures are recorded on their step and never fail the run.
    /// Only a control-flow error leaves the run `failed`.
    pub async fn process(
        &self,
        input: ControllerInput,
        context: &ReasoningContext,
    ) -> ControllerOutput {
        let plan = create_reasoning_plan(context);
        info!(
            depth = %plan.depth,
            agents = plan.agents.len(),
            max_agent_calls = plan.max_agent_calls,
            "Reasoning plan created"
        );

        let mut run = AgentRun::new(&input, plan);
        let entity_id = Some(input.entity_id.clone()).filter(|id| !id.is_empty());
        record_audit(
            self.audit.as_ref(),
            AuditEvent::RunStarted {
                run_id: run.id,
                entity_id,
                depth: run.depth(),
                at: Utc::now(),
            },
        )
        .await;

        let outcome = self.execute(&mut run, Arc::new(input)).await;
        let outcome = outcome.and_then(|result| run.complete(result));

        match outcome {
            Ok(()) => {
                let result = run.result.clone().unwrap_or_default();
                info!(
                    run_id = %run.id,
                    depth = %run.depth(),
                    steps = run.steps.len(),
                    confidence = ?result.confidence,
                    "Run completed"
                );
                record_audit(
                    self.audit.as_ref(),
                    AuditEvent::RunCompleted {
                        run_id: run.id,
                        confidence: result.confidence,
                        steps: run.steps.len(),
                        at: Utc::now(),
                    },
                )
                .await;
                ControllerOutput {
                    success: true,
                    recommendations: Some(result.recommendations.clone()),
                    explanation: Some(result.explanation.clone()),
                    confidence: result.confidence,
                    result: Some(result),
                    run,
                    error: None,
                }
            }
            Err(e) => {
                let message = e.to_string();
                error!(run_id = %run.id, error = %message, "Run failed");
                run.fail(message.clone());
                record_audit(
                    self.audit.as_ref(),
                    AuditEvent::RunFailed {
                        run_id: run.id,
                        error: message.clone(),
                        at: Utc::now(),
                    },
                )
                .await;
                ControllerOutput {
                    success: false,
                    result: None,
                    recommendations: None,
                    explanation: None,
                    confidence: None,
                    run,
                    error: Some(message),
                }
            }
        }
    }

    async fn execute(
        &self,
        run: &mut AgentRun,
        input: Arc<ControllerInput>,
    ) -> EngineResult<SynthesizedResult> {
        run.start()?;
        let as_of = input.as_of.unwrap_or_else(|| Utc::now().date_naive());
        let step_input = serde_json::to_value(input.as_ref())?;
        let mut gathered = GatheredData::new();

        // Wave order is fixed; an escalation that adds an earlier wave runs it next
        let mut completed: Vec<AgentType> = Vec::new();
        while let Some(agent) = AgentType::ALL
            .into_iter()
            .find(|a| run.plan.includes(*a) && !completed.contains(a))
        {
            completed.push(agent);
            let request = AgentRequest {
                run_id: run.id,
                depth: run.depth(),
                as_of,
                input: Arc::clone(&input),
            };
            self.run_wave(run, agent, &request, &step_input, &mut gathered)
                .await?;

            if matches!(agent, AgentType::PerformanceAnalyst | AgentType::RiskGuard) {
                self.check_escalation(run, &gathered).await?;
            }
        }

        Ok(synthesize(&gathered, &run.steps))
    }

    async fn run_wave(
        &self,
        run: &mut AgentRun,
        agent: AgentType,
        request: &AgentRequest,
        step_input: &serde_json::Value,
        gathered: &mut GatheredData,
    ) -> EngineResult<()> {
        let started_at = Utc::now();
        let mut step = AgentExecutionStep {
            id: uuid::Uuid::new_v4(),
            agent,
            tool_name: agent.tool_name().to_string(),
            input: step_input.clone(),
            output: None,
            status: StepStatus::Skipped,
            duration_ms: 0,
            error: None,
            started_at,
        };

        if run.calls_made() >= run.plan.max_agent_calls {
            warn!(
                run_id = %run.id,
                agent = %agent,
                max_agent_calls = run.plan.max_agent_calls,
                "Agent call cap reached, skipping"
            );
            step.error = Some(format!(
                "Agent call cap of {} reached",
                run.plan.max_agent_calls
            ));
            return run.push_step(step);
        }

        let executor = self
            .registry
            .get(agent)
            .ok_or(EngineError::ExecutorNotRegistered { agent })?;

        let start = Instant::now();
        let result = executor.execute(request, gathered).await;
        step.duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                info!(
                    run_id = %run.id,
                    agent = %agent,
                    duration_ms = step.duration_ms,
                    success = output.success,
                    "Agent completed"
                );
                step.status = StepStatus::Completed;
                step.output = Some(output.clone());
                gathered.insert(agent, output);
            }
            Err(e) => {
                warn!(
                    run_id = %run.id,
                    agent = %agent,
                    duration_ms = step.duration_ms,
                    error = %e,
                    "Agent failed, continuing"
                );
                step.status = StepStatus::Failed;
                step.error = Some(e.to_string());
            }
        }
        run.push_step(step)
    }

    async fn check_escalation(&self, run: &mut AgentRun, gathered: &GatheredData) -> EngineResult<()> {
        let anomaly_count = gathered
            .report::<PerformanceReport>(AgentType::PerformanceAnalyst)
            .map(|r| r.anomalies.len())
            .unwrap_or(0);
        let risk_violation = gathered
            .report::<RiskReport>(AgentType::RiskGuard)
            .map(|r| !r.safe)
            .unwrap_or(false);

        let reason = if anomaly_count >= self.config.escalation_anomaly_threshold {
            format!("{} anomalies detected", anomaly_count)
        } else if risk_violation {
            "risk guard reported a violation".to_string()
        } else {
            return Ok(());
        };

        let escalated = run.plan.escalated(&reason);
        if escalated.depth == run.plan.depth && escalated.agents == run.plan.agents {
            debug!(run_id = %run.id, reason = %reason, "Run already at full depth");
            return Ok(());
        }

        let from = run.depth();
        info!(run_id = %run.id, from = %from, reason = %reason, "Escalating to deep analysis");
        run.replace_plan(escalated)?;
        record_audit(
            self.audit.as_ref(),
            AuditEvent::DepthEscalated {
                run_id: run.id,
                from,
                reason,
                at: Utc::now(),
            },
        )
        .await;
        Ok(())
    }
}

/// Distill gathered outputs into findings, warnings, confidence and recommendations.
pub fn synthesize(gathered: &GatheredData, steps: &[AgentExecutionStep]) -> SynthesizedResult {
    let confidences: Vec<f64> = gathered.iter().filter_map(|(_, o)| o.confidence).collect();
    let mut findings = Vec::new();
    let mut warnings = Vec::new();

    if let Some(validation) = gathered.report::<ValidationReport>(AgentType::DataValidator) {
        if validation.valid {
            findings.push(format!(
                "Data validated across {} days",
                validation.days_available
            ));
        }
        warnings.extend(validation.issues);
    }

    if let Some(perf) = gathered.report::<PerformanceReport>(AgentType::PerformanceAnalyst) {
        findings.push(format!("Performance trend: {}", perf.trend.as_str()));
        if !perf.anomalies.is_empty() {
            warnings.push(format!("{} anomalies detected", perf.anomalies.len()));
        }
        for anomaly in &perf.anomalies {
            warnings.push(format!(
                "{} {} on {}: {:+.1}% vs expected",
                anomaly.severity, anomaly.anomaly_type, anomaly.metric_name, anomaly.deviation_pct
            ));
        }
    }

    if let Some(causal) = gathered.report::<CausalReport>(AgentType::CausalReasoner) {
        for hypothesis in &causal.hypotheses {
            if let Some(cause) = hypothesis.causes.first() {
                findings.push(format!("Likely cause of {}: {}", hypothesis.anomaly_type, cause));
            }
        }
    }

    let risk = gathered.report::<RiskReport>(AgentType::RiskGuard);
    if let Some(risk) = &risk {
        if let Some(output) = gathered.get(AgentType::RiskGuard) {
            warnings.extend(output.warnings.iter().cloned());
        }
        if risk.safe && !risk.assessments.is_empty() {
            findings.push("All candidate actions passed the guardrails".to_string());
        }
    }

    for step in steps.iter().filter(|s| s.status == StepStatus::Failed) {
        warnings.push(format!(
            "{} failed: {}",
            step.agent,
            step.error.as_deref().unwrap_or("unknown error")
        ));
    }

    let explanation = gathered
        .report::<ExplanationReport>(AgentType::Explainer)
        .map(|r| r.summary)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_EXPLANATION.to_string());

    let recommendations = gathered
        .report::<PriorityReport>(AgentType::Prioritizer)
        .map(|r| r.recommendations)
        .unwrap_or_default();
    if risk.is_none() && !recommendations.is_empty() {
        warnings.push(UNVETTED_WARNING.to_string());
    }

    SynthesizedResult {
        confidence: mean(&confidences),
        findings,
        warnings,
        explanation,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::{AnomalyType, Baseline, DetectedAnomaly, Severity, Trend};
    use crate::domain::Metric;
    use crate::error::{AgentError, AgentResult, StorageError};
    use crate::orchestrator::executor::AgentExecutor;
    use crate::orchestrator::types::{Recommendation, RunStatus, ToolOutput};
    use crate::planner::ReasoningDepth;
    use crate::storage::{InMemoryStore, MockAuditSink};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Returns a fixed output and counts invocations.
    struct Fixed {
        agent: AgentType,
        output: Option<ToolOutput>,
        calls: AtomicU32,
    }

    impl Fixed {
        fn ok(agent: AgentType, output: ToolOutput) -> Arc<Self> {
            Arc::new(Self {
                agent,
                output: Some(output),
                calls: AtomicU32::new(0),
            })
        }

        fn failing(agent: AgentType) -> Arc<Self> {
            Arc::new(Self {
                agent,
                output: None,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl AgentExecutor for Fixed {
        fn agent_type(&self) -> AgentType {
            self.agent
        }

        async fn execute(&self, _: &AgentRequest, _: &GatheredData) -> AgentResult<ToolOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.output.clone().ok_or(AgentError::Execution {
                agent: self.agent,
                message: "boom".to_string(),
            })
        }
    }

    fn plain_config() -> OrchestratorConfig {
        OrchestratorConfig {
            enforce_timeouts: false,
            ..Default::default()
        }
    }

    fn full_registry() -> ExecutorRegistry {
        let mut registry = ExecutorRegistry::new();
        for agent in AgentType::ALL {
            registry.register(Fixed::ok(
                agent,
                ToolOutput::ok(serde_json::json!({})).with_confidence(0.8),
            ));
        }
        registry
    }

    fn standard_context() -> ReasoningContext {
        ReasoningContext {
            risk_level: 0.3,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_failed_stage_does_not_fail_run() {
        let registry = full_registry().with(Fixed::failing(AgentType::RiskGuard));
        let controller = ControllerAgent::new(registry, plain_config(), Arc::new(InMemoryStore::new()));

        let output = controller
            .process(ControllerInput::default(), &standard_context())
            .await;

        assert!(output.success);
        assert_eq!(output.run.status, RunStatus::Completed);
        let failed: Vec<_> = output
            .run
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].agent, AgentType::RiskGuard);
        assert!(output.warnings().iter().any(|w| w.contains("risk_guard failed")));
        assert_eq!(output.explanation.as_deref(), Some(DEFAULT_EXPLANATION));
    }

    #[tokio::test]
    async fn test_missing_executor_fails_run() {
        let registry = ExecutorRegistry::new().with(Fixed::ok(
            AgentType::DataValidator,
            ToolOutput::ok(serde_json::json!({})),
        ));
        let mut audit = MockAuditSink::new();
        audit.expect_record().returning(|_| Ok(()));
        let controller = ControllerAgent::new(registry, plain_config(), Arc::new(audit));

        let output = controller
            .process(ControllerInput::default(), &standard_context())
            .await;

        assert!(!output.success);
        assert_eq!(output.run.status, RunStatus::Failed);
        assert!(output.error.unwrap().contains("performance_analyst"));
        assert!(output.recommendations.is_none());
    }

    #[tokio::test]
    async fn test_audit_sink_errors_are_ignored() {
        let mut audit = MockAuditSink::new();
        audit.expect_record().returning(|_| {
            Err(StorageError::Audit {
                message: "sink offline".to_string(),
            })
        });
        let controller = ControllerAgent::new(full_registry(), plain_config(), Arc::new(audit));
        let output = controller
            .process(ControllerInput::default(), &standard_context())
            .await;
        assert!(output.success);
    }

    #[tokio::test]
    async fn test_call_cap_skips_remaining_waves() {
        let context = ReasoningContext {
            risk_level: 0.3,
            ..Default::default()
        };
        let controller =
            ControllerAgent::new(full_registry(), plain_config(), Arc::new(InMemoryStore::new()));
        let mut run = AgentRun::new(&ControllerInput::default(), create_reasoning_plan(&context));
        run.plan.max_agent_calls = 2;

        let result = controller
            .execute(&mut run, Arc::new(ControllerInput::default()))
            .await
            .unwrap();

        assert_eq!(run.calls_made(), 2);
        assert!(run.steps[2..].iter().all(|s| s.status == StepStatus::Skipped));
        assert_eq!(result.confidence, Some(0.8));
    }

    fn perf_output(anomaly_count: usize) -> ToolOutput {
        let anomaly = DetectedAnomaly {
            entity_id: "ad-1".to_string(),
            metric_name: Metric::Roas,
            anomaly_type: AnomalyType::Drop(Metric::Roas),
            expected_value: 3.0,
            actual_value: 1.5,
            deviation_pct: -50.0,
            severity: Severity::High,
            baseline: Baseline {
                mean: 3.0,
                std_dev: 0.1,
                sample_size: 14,
                seasonality_factor: 1.0,
            },
            trend: Trend::Stable,
            z_score: -15.0,
            detected_at: Utc::now(),
        };
        let report = PerformanceReport {
            trend: Trend::Decreasing,
            anomalies: vec![anomaly; anomaly_count],
            creative_fatigue: false,
            top_severity: (anomaly_count > 0).then_some(Severity::High),
        };
        ToolOutput::from_report(&report).unwrap().with_confidence(0.6)
    }

    fn escalating_controller(anomaly_count: usize) -> (ControllerAgent, Arc<Fixed>, InMemoryStore) {
        let causal = Fixed::ok(AgentType::CausalReasoner, ToolOutput::ok(serde_json::json!({})));
        let registry = full_registry()
            .with(Fixed::ok(AgentType::PerformanceAnalyst, perf_output(anomaly_count)))
            .with(causal.clone());
        let config = OrchestratorConfig {
            escalation_anomaly_threshold: 2,
            ..plain_config()
        };
        let store = InMemoryStore::new();
        let controller = ControllerAgent::new(registry, config, Arc::new(store.clone()));
        (controller, causal, store)
    }

    #[tokio::test]
    async fn test_escalation_appends_causal_reasoner_once() {
        let (controller, causal, store) = escalating_controller(2);
        let output = controller
            .process(ControllerInput::default(), &standard_context())
            .await;

        assert!(output.success);
        assert_eq!(output.run.depth(), ReasoningDepth::Deep);
        assert_eq!(output.run.plan.max_agent_calls, 20);
        let causal_entries = output
            .run
            .plan
            .agents
            .iter()
            .filter(|a| **a == AgentType::CausalReasoner)
            .count();
        assert_eq!(causal_entries, 1);
        assert_eq!(causal.calls.load(Ordering::SeqCst), 1);

        let kinds: Vec<_> = store.audit_events().await.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["run_started", "depth_escalated", "run_completed"]);
        assert!(output.warnings().iter().any(|w| w == "2 anomalies detected"));
    }

    #[tokio::test]
    async fn test_below_threshold_keeps_plan() {
        let (controller, causal, store) = escalating_controller(1);
        let output = controller
            .process(ControllerInput::default(), &standard_context())
            .await;

        assert_eq!(output.run.depth(), ReasoningDepth::Standard);
        assert!(!output.run.plan.includes(AgentType::CausalReasoner));
        assert_eq!(causal.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            output.result.unwrap().findings,
            vec!["Performance trend: decreasing".to_string()]
        );
        let kinds: Vec<_> = store.audit_events().await.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["run_started", "run_completed"]);
    }

    #[tokio::test]
    async fn test_guardrail_violation_escalates_before_explainer() {
        let violation = RiskReport {
            assessments: vec![],
            violation_count: 1,
            safe: false,
        };
        let causal = Fixed::ok(AgentType::CausalReasoner, ToolOutput::ok(serde_json::json!({})));
        let registry = full_registry()
            .with(Fixed::ok(AgentType::PerformanceAnalyst, perf_output(0)))
            .with(Fixed::ok(
                AgentType::RiskGuard,
                ToolOutput::from_report(&violation).unwrap(),
            ))
            .with(causal.clone());
        let store = InMemoryStore::new();
        let controller = ControllerAgent::new(registry, plain_config(), Arc::new(store.clone()));

        let output = controller
            .process(ControllerInput::default(), &standard_context())
            .await;

        assert!(output.success);
        assert_eq!(output.run.depth(), ReasoningDepth::Deep);
        assert_eq!(causal.calls.load(Ordering::SeqCst), 1);
        let order: Vec<AgentType> = output.run.steps.iter().map(|s| s.agent).collect();
        let position = |agent| order.iter().position(|a| *a == agent).unwrap();
        assert!(position(AgentType::RiskGuard) < position(AgentType::CausalReasoner));
        assert!(position(AgentType::CausalReasoner) < position(AgentType::Explainer));
        assert_eq!(order.len(), 6);

        let events = store.audit_events().await;
        let kinds: Vec<_> = events.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["run_started", "depth_escalated", "run_completed"]);
        assert!(matches!(
            &events[1],
            AuditEvent::DepthEscalated { reason, .. } if reason == "risk guard reported a violation"
        ));
    }

    #[tokio::test]
    async fn test_call_cap_applies_before_executor_lookup() {
        let registry = ExecutorRegistry::new().with(Fixed::ok(
            AgentType::DataValidator,
            ToolOutput::ok(serde_json::json!({})),
        ));
        let controller =
            ControllerAgent::new(registry, plain_config(), Arc::new(InMemoryStore::new()));
        let mut run = AgentRun::new(
            &ControllerInput::default(),
            create_reasoning_plan(&standard_context()),
        );
        run.plan.max_agent_calls = 1;

        controller
            .execute(&mut run, Arc::new(ControllerInput::default()))
            .await
            .unwrap();

        assert_eq!(run.calls_made(), 1);
        assert_eq!(run.steps[0].status, StepStatus::Completed);
        assert!(run.steps.len() > 1);
        assert!(run.steps[1..].iter().all(|s| s.status == StepStatus::Skipped));
    }

    #[test]
    fn test_unvetted_recommendations_are_flagged() {
        let rec = Recommendation {
            id: "rec-1".to_string(),
            entity_id: "ad-1".to_string(),
            action: crate::domain::ProposedAction::new(crate::domain::ActionType::Monitor),
            priority_score: 0.4,
            confidence: 0.7,
            guardrails_passed: false,
            blocked_by: vec![],
            rationale: "No anomalies".to_string(),
        };
        let mut gathered = GatheredData::new();
        gathered.insert(
            AgentType::Prioritizer,
            ToolOutput::from_report(&PriorityReport {
                recommendations: vec![rec],
            })
            .unwrap(),
        );

        let result = synthesize(&gathered, &[]);
        assert_eq!(result.warnings, vec![UNVETTED_WARNING.to_string()]);
        assert_eq!(result.recommendations.len(), 1);
    }

    #[test]
    fn test_synthesis_defaults() {
        let result = synthesize(&GatheredData::new(), &[]);
        assert_eq!(result.confidence, None);
        assert_eq!(result.explanation, DEFAULT_EXPLANATION);
        assert!(result.recommendations.is_empty());
    }
}
