// Server Service - per-host enable/disable switch under /{job}/servers

use crate::domain::{JobInstanceId, JobNodePath, ServerStatus};
use crate::error::Result;
use crate::port::CoordinationStore;
use std::sync::Arc;

pub struct ServerService {
    store: Arc<dyn CoordinationStore>,
    path: JobNodePath,
}

impl ServerService {
    pub fn new(store: Arc<dyn CoordinationStore>, job_name: &str) -> Self {
        Self {
            store,
            path: JobNodePath::new(job_name),
        }
    }

    pub async fn persist_online(&self, ip: &str, enabled: bool) -> Result<()> {
        let status = if enabled {
            ServerStatus::Enabled
        } else {
            ServerStatus::Disabled
        };
        self.set_status(ip, status).await
    }

    pub async fn set_status(&self, ip: &str, status: ServerStatus) -> Result<()> {
        self.store.persist(&self.path.server(ip), status.as_str()).await
    }

    /// A server that never registered is not enabled
    pub async fn is_enable_server(&self, ip: &str) -> Result<bool> {
        Ok(self
            .store
            .get(&self.path.server(ip))
            .await?
            .map(|v| ServerStatus::from_node_value(&v) == ServerStatus::Enabled)
            .unwrap_or(false))
    }

    /// Enabled and backed by at least one online instance
    pub async fn is_available_server(&self, ip: &str) -> Result<bool> {
        if !self.is_enable_server(ip).await? {
            return Ok(false);
        }
        let instances = self
            .store
            .get_children_keys(&self.path.instances_root())
            .await?;
        Ok(instances
            .iter()
            .filter_map(|raw| JobInstanceId::parse(raw).ok())
            .any(|id| id.host() == ip))
    }

    pub async fn has_available_servers(&self) -> Result<bool> {
        for ip in self.server_ips().await? {
            if self.is_available_server(&ip).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn server_ips(&self) -> Result<Vec<String>> {
        self.store.get_children_keys(&self.path.servers_root()).await
    }
}
