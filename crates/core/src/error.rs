// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Connect/read timeout or lost session. The caller must treat the
    /// state it asked about as unknown.
    #[error("Coordination store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Fatal for the job being loaded; other jobs are unaffected.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Barrier timeout: job '{job_name}' {phase} barrier not reached within {timeout_ms}ms")]
    BarrierTimeout {
        job_name: String,
        phase: String,
        timeout_ms: u64,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Execution error: {0}")]
    Execution(#[from] crate::port::ExecutionError),

    #[error("Job '{0}' is shut down")]
    Shutdown(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True for failures that say nothing about the state of the store.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, AppError::StoreUnavailable(_))
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
