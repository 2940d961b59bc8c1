use thiserror::Error;

use crate::orchestrator::AgentType;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Errors raised by the data-access collaborators.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Entity not found: {entity_id}")]
    EntityNotFound { entity_id: String },

    #[error("Organization policy not found: {org_id}")]
    PolicyNotFound { org_id: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Audit write failed: {message}")]
    Audit { message: String },
}

/// Control-flow failures of the orchestrator itself.
///
/// These are the only errors that drive an `AgentRun` to `failed`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No executor registered for agent: {agent}")]
    ExecutorNotRegistered { agent: AgentType },

    #[error("Invalid run state: {message}")]
    InvalidState { message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures of a single agent stage. Caught per step, never fatal to a run.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent {agent} failed: {message}")]
    Execution { agent: AgentType, message: String },

    #[error("Agent {agent} timed out after {timeout_ms}ms")]
    Timeout { agent: AgentType, timeout_ms: u64 },

    #[error("Invalid input for {agent}: {message}")]
    InvalidInput { agent: AgentType, message: String },
}

/// Failure while evaluating a guardrail predicate.
#[derive(Debug, Error)]
pub enum GuardrailError {
    #[error("Guardrail {rule_id} could not be evaluated: {message}")]
    Evaluation { rule_id: String, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<AgentError> for AppError {
    fn from(err: AgentError) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for orchestrator control flow
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type alias for agent stage execution
pub type AgentResult<T> = Result<T, AgentError>;
