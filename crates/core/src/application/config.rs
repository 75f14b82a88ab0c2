// Configuration Service - job configuration stored at /{job}/config

use crate::domain::{JobConfiguration, JobNodePath};
use crate::error::{AppError, Result};
use crate::port::CoordinationStore;
use std::sync::Arc;
use tracing::{info, warn};

/// Read the stored configuration of any job
pub async fn load_job_configuration(
    store: &dyn CoordinationStore,
    job_name: &str,
) -> Result<Option<JobConfiguration>> {
    let key = JobNodePath::new(job_name).config();
    match store.get(&key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub struct ConfigurationService {
    store: Arc<dyn CoordinationStore>,
    path: JobNodePath,
}

impl ConfigurationService {
    pub fn new(store: Arc<dyn CoordinationStore>, job_name: &str) -> Self {
        Self {
            store,
            path: JobNodePath::new(job_name),
        }
    }

    /// Current configuration; a missing node is an error
    pub async fn load(&self) -> Result<JobConfiguration> {
        self.try_load()
            .await?
            .ok_or_else(|| AppError::NodeNotFound(self.path.config()))
    }

    pub async fn try_load(&self) -> Result<Option<JobConfiguration>> {
        load_job_configuration(self.store.as_ref(), self.path.job_name()).await
    }

    /// Store `config` unless one already exists and `overwrite` is off.
    /// Returns the configuration that is in effect afterwards.
    pub async fn persist(&self, config: &JobConfiguration) -> Result<JobConfiguration> {
        if config.job_name != self.path.job_name() {
            return Err(AppError::Config(format!(
                "configuration for '{}' persisted under job '{}'",
                config.job_name,
                self.path.job_name()
            )));
        }
        let existing = match self.try_load().await {
            Ok(existing) => existing,
            Err(AppError::Serialization(e)) => {
                warn!(job = %config.job_name, error = %e, "Stored configuration unreadable, replacing");
                None
            }
            Err(e) => return Err(e),
        };
        match existing {
            Some(stored) if !config.overwrite => {
                info!(job = %config.job_name, "Using configuration already in the store");
                Ok(stored)
            }
            _ => {
                let raw = serde_json::to_string(config)?;
                self.store.persist(&self.path.config(), &raw).await?;
                info!(job = %config.job_name, total = config.sharding_total_count, "Configuration persisted");
                Ok(config.clone())
            }
        }
    }
}
