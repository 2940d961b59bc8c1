//! Agent executor contract, registry, and the timeout/retry wrapper.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;

use super::types::{AgentPolicy, AgentType, ControllerInput, ToolOutput};
use crate::error::{AgentError, AgentResult};
use crate::planner::ReasoningDepth;

/// What an executor is asked to do.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Run the request belongs to
    pub run_id: Uuid,
    /// Depth of the run when the agent was invoked
    pub depth: ReasoningDepth,
    /// Day under analysis
    pub as_of: NaiveDate,
    /// Caller input
    pub input: Arc<ControllerInput>,
}

/// Outputs of the agents that have completed so far in a run.
#[derive(Debug, Clone, Default)]
pub struct GatheredData {
    outputs: BTreeMap<AgentType, ToolOutput>,
}

impl GatheredData {
    /// Empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an agent's output, replacing any previous one.
    pub fn insert(&mut self, agent: AgentType, output: ToolOutput) {
        self.outputs.insert(agent, output);
    }

    /// Raw output of an agent.
    pub fn get(&self, agent: AgentType) -> Option<&ToolOutput> {
        self.outputs.get(&agent)
    }

    /// Decode an agent's payload into its typed report.
    ///
    /// `None` when the agent has not run, failed, or produced a different shape.
    pub fn report<T: DeserializeOwned>(&self, agent: AgentType) -> Option<T> {
        self.get(agent)
            .filter(|o| o.success)
            .and_then(|o| serde_json::from_value(o.data.clone()).ok())
    }

    /// Every stored output in agent order.
    pub fn iter(&self) -> impl Iterator<Item = (&AgentType, &ToolOutput)> {
        self.outputs.iter()
    }

    /// Number of stored outputs.
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Whether nothing has been gathered.
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

/// Capability implemented once per agent type.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Agent this executor implements.
    fn agent_type(&self) -> AgentType;

    /// Run the agent against the data gathered so far.
    async fn execute(&self, request: &AgentRequest, gathered: &GatheredData)
        -> AgentResult<ToolOutput>;
}

/// Typed map of executors keyed by agent type.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<AgentType, Arc<dyn AgentExecutor>>,
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut agents: Vec<_> = self.executors.keys().collect();
        agents.sort();
        f.debug_struct("ExecutorRegistry")
            .field("agents", &agents)
            .finish()
    }
}

impl ExecutorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under its own agent type, replacing any previous one.
    pub fn register(&mut self, executor: Arc<dyn AgentExecutor>) {
        self.executors.insert(executor.agent_type(), executor);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, executor: Arc<dyn AgentExecutor>) -> Self {
        self.register(executor);
        self
    }

    /// Executor for `agent`.
    pub fn get(&self, agent: AgentType) -> Option<Arc<dyn AgentExecutor>> {
        self.executors.get(&agent).cloned()
    }

    /// Whether `agent` has an executor.
    pub fn contains(&self, agent: AgentType) -> bool {
        self.executors.contains_key(&agent)
    }

    /// Wrap every executor with its agent's timeout and retry policy.
    pub fn into_resilient(self, retry_delay: Duration) -> Self {
        let executors = self
            .executors
            .into_iter()
            .map(|(agent, inner)| {
                let wrapped: Arc<dyn AgentExecutor> = Arc::new(ResilientExecutor::new(
                    inner,
                    agent.default_policy(),
                    retry_delay,
                ));
                (agent, wrapped)
            })
            .collect();
        Self { executors }
    }
}

/// Applies a per-attempt timeout and bounded retries around another executor.
pub struct ResilientExecutor {
    inner: Arc<dyn AgentExecutor>,
    policy: AgentPolicy,
    retry_delay: Duration,
}

impl ResilientExecutor {
    /// Wrap `inner` with `policy`.
    pub fn new(inner: Arc<dyn AgentExecutor>, policy: AgentPolicy, retry_delay: Duration) -> Self {
        Self {
            inner,
            policy,
            retry_delay,
        }
    }
}

#[async_trait]
impl AgentExecutor for ResilientExecutor {
    fn agent_type(&self) -> AgentType {
        self.inner.agent_type()
    }

    async fn execute(
        &self,
        request: &AgentRequest,
        gathered: &GatheredData,
    ) -> AgentResult<ToolOutput> {
        let agent = self.inner.agent_type();
        let attempts = self.policy.max_retries + 1;
        let mut last_error = None;

        for attempt in 1..=attempts {
            let result =
                tokio::time::timeout(self.policy.timeout(), self.inner.execute(request, gathered))
                    .await;

            let err = match result {
                Ok(Ok(output)) => {
                    if attempt > 1 {
                        debug!(agent = %agent, attempt, "Agent succeeded after retry");
                    }
                    return Ok(output);
                }
                Ok(Err(e)) => e,
                Err(_) => AgentError::Timeout {
                    agent,
                    timeout_ms: self.policy.timeout_ms,
                },
            };

            // Bad input will not improve on retry
            if matches!(err, AgentError::InvalidInput { .. }) {
                return Err(err);
            }

            warn!(
                agent = %agent,
                attempt,
                max_attempts = attempts,
                error = %err,
                "Agent attempt failed"
            );
            last_error = Some(err);

            if attempt < attempts && !self.retry_delay.is_zero() {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(last_error.unwrap_or(AgentError::Execution {
            agent,
            message: "no attempts were made".to_string(),
        }))
    }
}
