//! Domain errors for the orchestration core.

use thiserror::Error;

/// Domain-level errors that can occur while manipulating orchestration state.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("orchestration not found: {0}")]
    OrchestrationNotFound(String),

    #[error("outbox job not found: {0}")]
    OutboxJobNotFound(String),

    #[error("agent state not found: {0}")]
    AgentStateNotFound(String),

    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("task dependency cycle detected involving task: {0}")]
    DependencyCycle(String),

    #[error("unknown task reference: {0}")]
    UnknownTaskReference(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("concurrency conflict: {entity} {id} was modified by another worker")]
    ConcurrencyConflict { entity: String, id: String },
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
