// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Malformed task id: {0}")]
    MalformedTaskId(String),

    #[error("Malformed instance id: {0}")]
    MalformedInstanceId(String),

    #[error("Malformed queue entry: {0}")]
    MalformedQueueEntry(String),

    #[error("Invalid sharding item parameters: {0}")]
    InvalidItemParameters(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
