// Subprocess script executor
// reason: tokio::process for async child management, nix for signals
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

use shardline_core::domain::ShardingContext;
use shardline_core::port::{
    ExecutionError, ExecutionResult, ExecutionStatus, ScriptExecutor, TimeProvider,
};

/// Runs a SCRIPT job's command line once per shard item.
///
/// The command line is split on whitespace (no shell); the item's
/// sharding context is appended as one JSON argument.
pub struct SubprocessScriptExecutor {
    time_provider: Arc<dyn TimeProvider>,
    env_allowlist: Vec<String>,
    timeout: Option<Duration>,
}

impl SubprocessScriptExecutor {
    /// `env_allowlist` names the variables of this process a script may see
    pub fn new(time_provider: Arc<dyn TimeProvider>, env_allowlist: Vec<String>) -> Self {
        Self {
            time_provider,
            env_allowlist,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn filtered_env(&self) -> HashMap<String, String> {
        std::env::vars()
            .filter(|(k, _)| self.env_allowlist.contains(k))
            .collect()
    }

    fn build_args(
        command_line: &str,
        context: &ShardingContext,
    ) -> Result<(String, Vec<String>), ExecutionError> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| ExecutionError::InvalidCommand("empty command line".to_string()))?;
        let mut args: Vec<String> = parts.collect();
        let context_json = serde_json::to_string(context)
            .map_err(|e| ExecutionError::InvalidCommand(format!("unserializable context: {}", e)))?;
        args.push(context_json);
        Ok((program, args))
    }

    async fn spawn_and_wait(
        &self,
        program: &str,
        args: &[String],
    ) -> Result<std::process::Output, ExecutionError> {
        let child = Command::new(program)
            .args(args)
            .env_clear()
            .envs(self.filtered_env())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecutionError::SpawnFailed(format!("{}: {}", program, e)))?;
        let pid = child.id();

        match self.timeout {
            Some(limit) => match timeout(limit, child.wait_with_output()).await {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(e)) => Err(ExecutionError::IoError(e.to_string())),
                Err(_) => {
                    if let Some(pid) = pid {
                        terminate(pid).await;
                    }
                    Err(ExecutionError::Timeout(limit.as_millis() as i64))
                }
            },
            None => child
                .wait_with_output()
                .await
                .map_err(|e| ExecutionError::IoError(e.to_string())),
        }
    }
}

/// SIGTERM, then SIGKILL if the script outlives the grace period
#[cfg(unix)]
async fn terminate(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    use shardline_core::application::worker::constants::{
        SCRIPT_EXIT_POLL_INTERVAL, SCRIPT_TERMINATE_GRACE_PERIOD,
    };

    let pid = Pid::from_raw(pid as i32);
    info!(pid = %pid, "Sending SIGTERM to timed-out script");
    if kill(pid, Signal::SIGTERM).is_err() {
        return;
    }
    let deadline = tokio::time::Instant::now() + SCRIPT_TERMINATE_GRACE_PERIOD;
    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(SCRIPT_EXIT_POLL_INTERVAL).await;
        // Signal 0 only probes for existence
        if kill(pid, None).is_err() {
            return;
        }
    }
    warn!(pid = %pid, "Script ignored SIGTERM, sending SIGKILL");
    if let Err(e) = kill(pid, Signal::SIGKILL) {
        warn!(pid = %pid, error = %e, "SIGKILL failed");
    }
}

#[cfg(not(unix))]
async fn terminate(pid: u32) {
    warn!(pid, "Cannot signal timed-out script on this platform");
}

#[async_trait]
impl ScriptExecutor for SubprocessScriptExecutor {
    async fn execute(
        &self,
        command_line: &str,
        context: &ShardingContext,
    ) -> Result<ExecutionResult, ExecutionError> {
        let (program, args) = Self::build_args(command_line, context)?;
        let start = self.time_provider.now_millis();
        info!(
            job = %context.job_name,
            item = context.sharding_item,
            program = %program,
            "Starting script"
        );

        let output = self.spawn_and_wait(&program, &args).await?;
        let duration_ms = self.time_provider.now_millis() - start;
        let status = if output.status.success() {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failed
        };
        info!(
            job = %context.job_name,
            item = context.sharding_item,
            duration_ms,
            exit_code = ?output.status.code(),
            status = ?status,
            "Script finished"
        );
        Ok(ExecutionResult {
            status,
            duration_ms,
            exit_code: output.status.code(),
            stdout: Some(String::from_utf8_lossy(&output.stdout).to_string()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardline_core::port::time_provider::SystemTimeProvider;

    fn context(item: u32) -> ShardingContext {
        ShardingContext {
            job_name: "cleanup".to_string(),
            task_id: "cleanup@-@0@-@READY@-@10.0.0.1@-@1@-@t0".to_string(),
            sharding_total_count: 3,
            job_parameter: String::new(),
            sharding_item: item,
            sharding_parameter: Some("east".to_string()),
        }
    }

    fn executor() -> SubprocessScriptExecutor {
        SubprocessScriptExecutor::new(Arc::new(SystemTimeProvider), vec!["PATH".to_string()])
    }

    #[tokio::test]
    async fn test_context_is_last_argument() {
        let result = executor().execute("echo shard", &context(2)).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Success);
        let stdout = result.stdout.unwrap_or_default();
        assert!(stdout.starts_with("shard {"));
        assert!(stdout.contains("\"sharding_item\":2"));
        assert!(stdout.contains("\"sharding_parameter\":\"east\""));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_failed_status() {
        let result = executor().execute("false", &context(0)).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn test_timeout_kills_script() {
        let executor = executor().with_timeout(Duration::from_millis(100));
        let result = executor.execute("sleep 10", &context(0)).await;
        assert!(matches!(result, Err(ExecutionError::Timeout(100))));
    }

    #[tokio::test]
    async fn test_blank_command_line_is_rejected() {
        let result = executor().execute("   ", &context(0)).await;
        assert!(matches!(result, Err(ExecutionError::InvalidCommand(_))));
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let result = executor()
            .execute("/definitely/not/here", &context(0))
            .await;
        assert!(matches!(result, Err(ExecutionError::SpawnFailed(_))));
    }
}
