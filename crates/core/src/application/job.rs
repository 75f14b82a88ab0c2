// Job bodies and the factory registry that resolves them by name

use crate::application::worker::ShutdownToken;
use crate::domain::{JobConfiguration, JobType, ShardingContext};
use crate::error::{AppError, Result};
use crate::port::{ExecutionError, ExecutionStatus, ScriptExecutor};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// User code run once per shard item
#[async_trait]
pub trait SimpleJob: Send + Sync {
    async fn execute(&self, context: &ShardingContext) -> std::result::Result<(), ExecutionError>;
}

/// Fetch/process job; with streaming enabled it keeps fetching until a
/// fetch returns nothing
#[async_trait]
pub trait DataflowJob: Send + Sync {
    async fn fetch_data(
        &self,
        context: &ShardingContext,
    ) -> std::result::Result<Vec<serde_json::Value>, ExecutionError>;

    async fn process_data(
        &self,
        context: &ShardingContext,
        data: Vec<serde_json::Value>,
    ) -> std::result::Result<(), ExecutionError>;
}

/// Closed set of runnable bodies
#[derive(Clone)]
pub enum JobBody {
    Simple(Arc<dyn SimpleJob>),
    Dataflow {
        job: Arc<dyn DataflowJob>,
        streaming: bool,
    },
    Script {
        command_line: String,
        executor: Arc<dyn ScriptExecutor>,
    },
}

impl JobBody {
    pub fn job_type(&self) -> JobType {
        match self {
            JobBody::Simple(_) => JobType::Simple,
            JobBody::Dataflow { .. } => JobType::Dataflow,
            JobBody::Script { .. } => JobType::Script,
        }
    }

    /// Run the body for one item. A streaming dataflow stops at the first
    /// empty fetch or when `shutdown` fires.
    pub async fn run(
        &self,
        context: &ShardingContext,
        shutdown: &ShutdownToken,
    ) -> std::result::Result<(), ExecutionError> {
        match self {
            JobBody::Simple(job) => job.execute(context).await,
            JobBody::Dataflow { job, streaming } => loop {
                let data = job.fetch_data(context).await?;
                if data.is_empty() {
                    return Ok(());
                }
                job.process_data(context, data).await?;
                if !*streaming || shutdown.is_shutdown() {
                    return Ok(());
                }
            },
            JobBody::Script {
                command_line,
                executor,
            } => {
                let result = executor.execute(command_line, context).await?;
                match result.status {
                    ExecutionStatus::Success => Ok(()),
                    ExecutionStatus::Failed => Err(ExecutionError::JobFailed(format!(
                        "script exited with {:?}: {}",
                        result.exit_code,
                        result.stderr.unwrap_or_default().trim()
                    ))),
                }
            }
        }
    }
}

enum Factory {
    Simple(Arc<dyn SimpleJob>),
    Dataflow(Arc<dyn DataflowJob>),
}

/// Resolves `job_class` names to bodies; SCRIPT jobs use the shared
/// script executor
#[derive(Default)]
pub struct JobFactoryRegistry {
    factories: HashMap<String, Factory>,
    script_executor: Option<Arc<dyn ScriptExecutor>>,
}

impl JobFactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script_executor(mut self, executor: Arc<dyn ScriptExecutor>) -> Self {
        self.script_executor = Some(executor);
        self
    }

    pub fn register_simple(&mut self, job_class: impl Into<String>, job: Arc<dyn SimpleJob>) {
        self.factories.insert(job_class.into(), Factory::Simple(job));
    }

    pub fn register_dataflow(&mut self, job_class: impl Into<String>, job: Arc<dyn DataflowJob>) {
        self.factories
            .insert(job_class.into(), Factory::Dataflow(job));
    }

    /// Unknown classes and type mismatches are configuration errors
    pub fn resolve(&self, config: &JobConfiguration) -> Result<JobBody> {
        if config.job_type == JobType::Script {
            let executor = self.script_executor.clone().ok_or_else(|| {
                AppError::Config(format!(
                    "job '{}' is a script job but no script executor is installed",
                    config.job_name
                ))
            })?;
            let command_line = config.script_command_line.clone().ok_or_else(|| {
                AppError::Config(format!("script job '{}' has no command line", config.job_name))
            })?;
            return Ok(JobBody::Script {
                command_line,
                executor,
            });
        }

        let class = config.job_class.as_deref().unwrap_or_default();
        let body = match self.factories.get(class) {
            Some(Factory::Simple(job)) => JobBody::Simple(job.clone()),
            Some(Factory::Dataflow(job)) => JobBody::Dataflow {
                job: job.clone(),
                streaming: config.streaming_process,
            },
            None => {
                return Err(AppError::Config(format!(
                    "unknown job class '{}' for job '{}'",
                    class, config.job_name
                )))
            }
        };
        if body.job_type() != config.job_type {
            return Err(AppError::Config(format!(
                "job class '{}' is a {} job but '{}' is configured as {}",
                class,
                body.job_type(),
                config.job_name,
                config.job_type
            )));
        }
        Ok(body)
    }
}
