use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;
use tracing::debug;

use super::{AuditEvent, AuditSink, MetricsRepository, PolicyRepository};
use crate::domain::{DailyMetrics, EntitySnapshot, OrgPolicy};
use crate::error::{StorageError, StorageResult};

#[derive(Debug, Default)]
struct MemoryState {
    entities: HashMap<String, EntitySnapshot>,
    daily: HashMap<String, Vec<DailyMetrics>>,
    policies: HashMap<String, OrgPolicy>,
    audit: Vec<AuditEvent>,
}

/// Process-local store implementing every collaborator contract.
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entity snapshot.
    pub async fn put_entity(&self, entity: EntitySnapshot) {
        let mut state = self.state.write().await;
        state.entities.insert(entity.id.clone(), entity);
    }

    /// Append daily rows for an entity, replacing rows with the same date.
    pub async fn put_daily_metrics(&self, entity_id: &str, rows: Vec<DailyMetrics>) {
        let mut state = self.state.write().await;
        let series = state.daily.entry(entity_id.to_string()).or_default();
        for row in rows {
            series.retain(|existing| existing.date != row.date);
            series.push(row);
        }
        series.sort_by_key(|row| row.date);
    }

    /// Insert or replace an organization policy.
    pub async fn put_policy(&self, policy: OrgPolicy) {
        let mut state = self.state.write().await;
        state.policies.insert(policy.org_id.clone(), policy);
    }

    /// Every audit event recorded so far, oldest first.
    pub async fn audit_events(&self) -> Vec<AuditEvent> {
        self.state.read().await.audit.clone()
    }
}

#[async_trait]
impl MetricsRepository for InMemoryStore {
    async fn entity_snapshot(&self, entity_id: &str) -> StorageResult<EntitySnapshot> {
        self.state
            .read()
            .await
            .entities
            .get(entity_id)
            .cloned()
            .ok_or_else(|| StorageError::EntityNotFound {
                entity_id: entity_id.to_string(),
            })
    }

    async fn daily_metrics(
        &self,
        entity_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StorageResult<Vec<DailyMetrics>> {
        if from > to {
            return Err(StorageError::Query {
                message: format!("window start {} is after end {}", from, to),
            });
        }
        let state = self.state.read().await;
        let rows: Vec<DailyMetrics> = state
            .daily
            .get(entity_id)
            .map(|series| {
                series
                    .iter()
                    .filter(|row| row.date >= from && row.date <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        debug!(entity_id, %from, %to, rows = rows.len(), "Loaded daily metrics");
        Ok(rows)
    }
}

#[async_trait]
impl PolicyRepository for InMemoryStore {
    async fn org_policy(&self, org_id: &str) -> StorageResult<OrgPolicy> {
        self.state
            .read()
            .await
            .policies
            .get(org_id)
            .cloned()
            .ok_or_else(|| StorageError::PolicyNotFound {
                org_id: org_id.to_string(),
            })
    }
}

#[async_trait]
impl AuditSink for InMemoryStore {
    async fn record(&self, event: AuditEvent) -> StorageResult<()> {
        self.state.write().await.audit.push(event);
        Ok(())
    }
}
