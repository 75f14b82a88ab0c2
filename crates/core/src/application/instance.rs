// Instance Service - liveness nodes under /{job}/instances

use crate::domain::{InstanceMark, JobInstance, JobInstanceId, JobNodePath, ServerStatus};
use crate::error::Result;
use crate::port::CoordinationStore;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct InstanceService {
    store: Arc<dyn CoordinationStore>,
    path: JobNodePath,
    instance: JobInstance,
}

impl InstanceService {
    pub fn new(store: Arc<dyn CoordinationStore>, job_name: &str, instance: JobInstance) -> Self {
        Self {
            store,
            path: JobNodePath::new(job_name),
            instance,
        }
    }

    /// Publish the liveness node; it disappears with the session
    pub async fn persist_online(&self) -> Result<()> {
        self.store
            .persist_ephemeral(&self.path.instance(&self.instance.id), InstanceMark::Idle.as_str())
            .await
    }

    pub async fn remove_instance(&self) -> Result<()> {
        self.store.remove(&self.path.instance(&self.instance.id)).await
    }

    pub async fn is_online(&self, id: &JobInstanceId) -> Result<bool> {
        self.store.is_existed(&self.path.instance(id)).await
    }

    /// Every instance with a liveness node, sorted
    pub async fn online_instances(&self) -> Result<Vec<JobInstanceId>> {
        let mut result = Vec::new();
        for raw in self
            .store
            .get_children_keys(&self.path.instances_root())
            .await?
        {
            match JobInstanceId::parse(&raw) {
                Ok(id) => result.push(id),
                Err(e) => warn!(job = %self.path.job_name(), error = %e, "Ignoring malformed instance node"),
            }
        }
        result.sort();
        Ok(result)
    }

    /// Online instances whose server is enabled; this is the list every
    /// sharding strategy receives
    pub async fn get_available_job_instances(&self) -> Result<Vec<JobInstanceId>> {
        let mut result = Vec::new();
        for id in self.online_instances().await? {
            let enabled = self
                .store
                .get(&self.path.server(id.host()))
                .await?
                .map(|v| ServerStatus::from_node_value(&v) == ServerStatus::Enabled)
                .unwrap_or(false);
            if enabled {
                result.push(id);
            } else {
                debug!(job = %self.path.job_name(), instance = %id, "Instance on disabled server");
            }
        }
        Ok(result)
    }

    /// Consume an operator trigger mark on this instance's node
    pub async fn take_trigger(&self) -> Result<bool> {
        let key = self.path.instance(&self.instance.id);
        match self.store.get(&key).await? {
            Some(value) if InstanceMark::from_node_value(&value) == InstanceMark::Trigger => {
                self.store.update(&key, InstanceMark::Idle.as_str()).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
