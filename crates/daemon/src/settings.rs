//! Daemon settings
//!
//! Layered from an optional `shardline.toml` (or the file named by
//! `SHARDLINE_CONFIG`) and `SHARDLINE__*` environment variables, e.g.
//! `SHARDLINE__CYCLE_INTERVAL_SECS=5`.

use anyhow::Result;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use shardline_core::domain::JobConfiguration;

const DEFAULT_CONFIG_FILE: &str = "shardline";

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Host part of instance ids; detected when absent
    #[serde(default)]
    pub host: Option<String>,

    /// Simulated instances sharing the in-process store
    #[serde(default = "default_instances")]
    pub instances: usize,

    /// How often every job is put on the ready queue
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,

    #[serde(default = "default_queue_depth")]
    pub ready_queue_max_depth: usize,

    /// Kill scripts running longer than this; 0 disables the limit
    #[serde(default)]
    pub script_timeout_secs: u64,

    /// Variables of the daemon's environment passed on to scripts
    #[serde(default = "default_env_allowlist")]
    pub script_env_allowlist: Vec<String>,

    #[serde(default)]
    pub jobs: Vec<JobConfiguration>,
}

fn default_instances() -> usize {
    1
}

fn default_cycle_interval() -> u64 {
    10
}

fn default_queue_depth() -> usize {
    shardline_core::application::worker::constants::DEFAULT_READY_QUEUE_MAX_DEPTH
}

fn default_env_allowlist() -> Vec<String> {
    vec!["PATH".to_string(), "HOME".to_string(), "USER".to_string()]
}

impl DaemonConfig {
    pub fn load() -> Result<Self> {
        let file = std::env::var("SHARDLINE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let settings = Config::builder()
            .add_source(File::with_name(&file).required(false))
            .add_source(Environment::with_prefix("SHARDLINE").separator("__"))
            .build()?;
        Self::from_config(settings)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()?;
        Self::from_config(settings)
    }

    fn from_config(settings: Config) -> Result<Self> {
        let config: DaemonConfig = settings.try_deserialize()?;
        if config.instances == 0 {
            anyhow::bail!("instances must be at least 1");
        }
        if config.cycle_interval_secs == 0 {
            anyhow::bail!("cycle_interval_secs must be at least 1");
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardline_core::domain::JobType;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = DaemonConfig::from_toml("").unwrap();
        assert_eq!(config.instances, 1);
        assert_eq!(config.cycle_interval_secs, 10);
        assert!(config.jobs.is_empty());
        assert!(config.script_env_allowlist.contains(&"PATH".to_string()));
    }

    #[test]
    fn test_jobs_table() {
        let raw = r#"
            instances = 3
            cycle_interval_secs = 2

            [[jobs]]
            job_name = "billing"
            job_type = "SIMPLE"
            job_class = "log"
            sharding_total_count = 4
            sharding_item_parameters = "0=a,1=b"

            [[jobs]]
            job_name = "cleanup"
            job_type = "SCRIPT"
            script_command_line = "echo cleanup"
            sharding_total_count = 2
            sharding_strategy = "ROUND_ROBIN"
        "#;
        let config = DaemonConfig::from_toml(raw).unwrap();
        assert_eq!(config.instances, 3);
        assert_eq!(config.jobs.len(), 2);
        assert_eq!(config.jobs[0].job_type, JobType::Simple);
        assert_eq!(config.jobs[0].total(), 4);
        assert!(config.jobs[0].failover);
        assert_eq!(config.jobs[1].sharding_strategy, "ROUND_ROBIN");
    }

    #[test]
    fn test_zero_instances_rejected() {
        assert!(DaemonConfig::from_toml("instances = 0").is_err());
    }
}
