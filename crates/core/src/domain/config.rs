// Job Configuration Domain Model

use super::error::{DomainError, Result};
use super::sharding::parse_item_parameters;
use serde::{Deserialize, Serialize};

/// Default start/complete barrier timeout (30s)
pub const DEFAULT_BARRIER_TIMEOUT_MS: u64 = 30_000;

/// Default reconcile interval (60s)
pub const DEFAULT_RECONCILE_INTERVAL_SECS: i64 = 60;

/// Default sharding strategy name
pub const DEFAULT_SHARDING_STRATEGY: &str = "AVG_ALLOCATION";

/// Closed set of job kinds the executor knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Simple,
    Dataflow,
    Script,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobType::Simple => write!(f, "SIMPLE"),
            JobType::Dataflow => write!(f, "DATAFLOW"),
            JobType::Script => write!(f, "SCRIPT"),
        }
    }
}

/// Job configuration, persisted as JSON at `/{job}/config`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfiguration {
    pub job_name: String,
    pub job_type: JobType,

    /// Factory name resolved through the job factory registry (SIMPLE/DATAFLOW)
    #[serde(default)]
    pub job_class: Option<String>,

    /// Command line for SCRIPT jobs
    #[serde(default)]
    pub script_command_line: Option<String>,

    /// Opaque trigger expression, interpreted by the trigger source only
    #[serde(default)]
    pub cron: Option<String>,

    pub sharding_total_count: i32,

    #[serde(default)]
    pub job_parameter: String,

    /// `"0=a,1=b"` syntax
    #[serde(default)]
    pub sharding_item_parameters: String,

    #[serde(default = "default_true")]
    pub failover: bool,

    #[serde(default = "default_true")]
    pub misfire: bool,

    /// DATAFLOW only: keep fetching until no data is returned
    #[serde(default)]
    pub streaming_process: bool,

    #[serde(default = "default_strategy")]
    pub sharding_strategy: String,

    /// Per-job worker pool size; `None` derives it from the CPU count
    #[serde(default)]
    pub worker_pool_size: Option<usize>,

    #[serde(default = "default_barrier_timeout")]
    pub barrier_timeout_ms: u64,

    /// `<= 0` disables the reconcile worker
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: i64,

    #[serde(default)]
    pub disabled: bool,

    /// Replace the configuration already stored for this job
    #[serde(default)]
    pub overwrite: bool,

    #[serde(default)]
    pub description: String,
}

fn default_true() -> bool {
    true
}

fn default_strategy() -> String {
    DEFAULT_SHARDING_STRATEGY.to_string()
}

fn default_barrier_timeout() -> u64 {
    DEFAULT_BARRIER_TIMEOUT_MS
}

fn default_reconcile_interval() -> i64 {
    DEFAULT_RECONCILE_INTERVAL_SECS
}

impl JobConfiguration {
    /// Create a configuration with defaults for everything but the identity
    pub fn new(job_name: impl Into<String>, job_type: JobType, sharding_total_count: i32) -> Self {
        Self {
            job_name: job_name.into(),
            job_type,
            job_class: None,
            script_command_line: None,
            cron: None,
            sharding_total_count,
            job_parameter: String::new(),
            sharding_item_parameters: String::new(),
            failover: true,
            misfire: true,
            streaming_process: false,
            sharding_strategy: default_strategy(),
            worker_pool_size: None,
            barrier_timeout_ms: DEFAULT_BARRIER_TIMEOUT_MS,
            reconcile_interval_secs: DEFAULT_RECONCILE_INTERVAL_SECS,
            disabled: false,
            overwrite: false,
            description: String::new(),
        }
    }

    pub fn with_job_class(mut self, job_class: impl Into<String>) -> Self {
        self.job_class = Some(job_class.into());
        self
    }

    pub fn with_script(mut self, command_line: impl Into<String>) -> Self {
        self.script_command_line = Some(command_line.into());
        self
    }

    pub fn with_item_parameters(mut self, raw: impl Into<String>) -> Self {
        self.sharding_item_parameters = raw.into();
        self
    }

    pub fn with_strategy(mut self, name: impl Into<String>) -> Self {
        self.sharding_strategy = name.into();
        self
    }

    /// Shard count once validated
    pub fn total(&self) -> u32 {
        self.sharding_total_count.max(0) as u32
    }

    /// Checks that do not need any registry
    pub fn validate(&self) -> Result<()> {
        if self.job_name.trim().is_empty() {
            return Err(DomainError::ValidationError("job name is empty".to_string()));
        }
        if self.job_name.contains('/') || self.job_name.contains(super::DELIMITER) {
            return Err(DomainError::ValidationError(format!(
                "job name '{}' contains a reserved sequence",
                self.job_name
            )));
        }
        if self.sharding_total_count <= 0 {
            return Err(DomainError::ValidationError(format!(
                "sharding total count must be positive, got {}",
                self.sharding_total_count
            )));
        }
        if self.worker_pool_size == Some(0) {
            return Err(DomainError::ValidationError(
                "worker pool size must be positive".to_string(),
            ));
        }
        match self.job_type {
            JobType::Script => {
                let blank = self
                    .script_command_line
                    .as_deref()
                    .map(|c| c.trim().is_empty())
                    .unwrap_or(true);
                if blank {
                    return Err(DomainError::ValidationError(format!(
                        "script job '{}' has no command line",
                        self.job_name
                    )));
                }
            }
            JobType::Simple | JobType::Dataflow => {
                if self.job_class.as_deref().map(str::is_empty).unwrap_or(true) {
                    return Err(DomainError::ValidationError(format!(
                        "job '{}' has no job class",
                        self.job_name
                    )));
                }
            }
        }
        parse_item_parameters(&self.sharding_item_parameters)?;
        Ok(())
    }
}
