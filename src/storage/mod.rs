//! Collaborator contracts for data access and audit output.
//!
//! The engine never talks to a database itself. It reads entity metrics
//! through [`MetricsRepository`], organization policy through
//! [`PolicyRepository`], and reports lifecycle events to an [`AuditSink`].
//! [`InMemoryStore`] implements all three for tests and the CLI.

mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::domain::{ActionType, DailyMetrics, EntitySnapshot, OrgPolicy};
use crate::error::StorageResult;
use crate::planner::ReasoningDepth;

/// Read access to entity metrics.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetricsRepository: Send + Sync {
    /// Current snapshot of an entity.
    async fn entity_snapshot(&self, entity_id: &str) -> StorageResult<EntitySnapshot>;

    /// Daily rows for `entity_id` between `from` and `to`, both inclusive,
    /// ordered by date.
    async fn daily_metrics(
        &self,
        entity_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StorageResult<Vec<DailyMetrics>>;
}

/// Read access to organization settings.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PolicyRepository: Send + Sync {
    /// Policy for an organization.
    async fn org_policy(&self, org_id: &str) -> StorageResult<OrgPolicy>;
}

/// Lifecycle events emitted by the controller and the auto-apply gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A controller run began.
    RunStarted {
        /// Run identifier
        run_id: Uuid,
        /// Entity under analysis, if any
        entity_id: Option<String>,
        /// Depth chosen by the planner
        depth: ReasoningDepth,
        /// Event time
        at: DateTime<Utc>,
    },
    /// The run was forced to a deeper analysis mid-flight.
    DepthEscalated {
        /// Run identifier
        run_id: Uuid,
        /// Depth before escalation
        from: ReasoningDepth,
        /// What triggered the escalation
        reason: String,
        /// Event time
        at: DateTime<Utc>,
    },
    /// A run finished and produced a result.
    RunCompleted {
        /// Run identifier
        run_id: Uuid,
        /// Aggregate confidence, if any stage reported one
        confidence: Option<f64>,
        /// Number of executed steps
        steps: usize,
        /// Event time
        at: DateTime<Utc>,
    },
    /// The controller's own control flow failed.
    RunFailed {
        /// Run identifier
        run_id: Uuid,
        /// Error description
        error: String,
        /// Event time
        at: DateTime<Utc>,
    },
    /// The auto-apply gate reached a verdict.
    AutoApplyDecision {
        /// Recommendation identifier
        recommendation_id: String,
        /// Entity the recommendation targets
        entity_id: String,
        /// Proposed action
        action_type: ActionType,
        /// Whether it will be applied unattended
        approved: bool,
        /// Rejection reason, when not approved
        reason: Option<String>,
        /// Event time
        at: DateTime<Utc>,
    },
}

impl AuditEvent {
    /// Short event name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AuditEvent::RunStarted { .. } => "run_started",
            AuditEvent::DepthEscalated { .. } => "depth_escalated",
            AuditEvent::RunCompleted { .. } => "run_completed",
            AuditEvent::RunFailed { .. } => "run_failed",
            AuditEvent::AutoApplyDecision { .. } => "auto_apply_decision",
        }
    }
}

/// Destination for audit events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist one event.
    async fn record(&self, event: AuditEvent) -> StorageResult<()>;
}

/// Record an event, logging instead of failing when the sink errors.
pub async fn record_audit(sink: &dyn AuditSink, event: AuditEvent) {
    let kind = event.kind();
    if let Err(e) = sink.record(event).await {
        warn!(event = kind, error = %e, "Failed to record audit event");
    }
}
