// Script Executor Port
// Runs the command line of a SCRIPT job for one shard item

use crate::domain::ShardingContext;
use async_trait::async_trait;
use thiserror::Error;

/// Result of one script run
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub duration_ms: i64,
    pub exit_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

/// Execution status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Success,
    Failed,
}

/// Execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Process timeout after {0}ms")]
    Timeout(i64),

    #[error("Invalid command line: {0}")]
    InvalidCommand(String),

    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("IO error: {0}")]
    IoError(String),
}

/// Script Executor trait
///
/// The sharding context is handed to the script as its last argument,
/// serialized as JSON.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn execute(
        &self,
        command_line: &str,
        context: &ShardingContext,
    ) -> Result<ExecutionResult, ExecutionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every context it is asked to run and always succeeds
    #[derive(Default)]
    pub struct RecordingScriptExecutor {
        calls: Arc<Mutex<Vec<ShardingContext>>>,
    }

    impl RecordingScriptExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn calls(&self) -> Vec<ShardingContext> {
            self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
        }
    }

    #[async_trait]
    impl ScriptExecutor for RecordingScriptExecutor {
        async fn execute(
            &self,
            _command_line: &str,
            context: &ShardingContext,
        ) -> Result<ExecutionResult, ExecutionError> {
            self.calls.lock().unwrap_or_else(|p| p.into_inner()).push(context.clone());
            Ok(ExecutionResult {
                status: ExecutionStatus::Success,
                duration_ms: 1,
                exit_code: Some(0),
                stdout: None,
                stderr: None,
            })
        }
    }
}
