// Admin Service - operator actions, expressed purely as node writes
//
// Every running instance watches its own job tree and reacts: TRIGGER on an
// instance node runs a cycle, a removed instance node shuts that instance
// down, a server status change forces a reshard.

use crate::domain::{InstanceMark, JobInstanceId, JobNodePath, QueueEntry, ServerStatus, StateNodePath};
use crate::error::Result;
use crate::port::CoordinationStore;
use std::sync::Arc;
use tracing::{info, warn};

/// Which instances of a job an operation targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceScope {
    All,
    Instance(JobInstanceId),
}

pub struct AdminService {
    store: Arc<dyn CoordinationStore>,
}

impl AdminService {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Ask instances to run a cycle now. Returns how many were marked.
    pub async fn trigger(&self, job_name: &str, scope: &InstanceScope) -> Result<usize> {
        let path = JobNodePath::new(job_name);
        let mut marked = 0;
        for id in self.targets(&path, scope).await? {
            if self
                .store
                .update(&path.instance(&id), InstanceMark::Trigger.as_str())
                .await?
            {
                marked += 1;
            }
        }
        info!(job = %job_name, scope = ?scope, marked, "Trigger requested");
        Ok(marked)
    }

    pub async fn disable(&self, job_name: &str, scope: &InstanceScope) -> Result<()> {
        self.set_server_status(job_name, scope, ServerStatus::Disabled)
            .await
    }

    pub async fn enable(&self, job_name: &str, scope: &InstanceScope) -> Result<()> {
        self.set_server_status(job_name, scope, ServerStatus::Enabled)
            .await
    }

    /// Remove instance nodes; each affected instance shuts itself down
    pub async fn shutdown(&self, job_name: &str, scope: &InstanceScope) -> Result<usize> {
        let path = JobNodePath::new(job_name);
        let targets = self.targets(&path, scope).await?;
        for id in &targets {
            self.store.remove(&path.instance(id)).await?;
        }
        info!(job = %job_name, scope = ?scope, count = targets.len(), "Shutdown requested");
        Ok(targets.len())
    }

    /// `All` deletes the job with its queue entries. `Instance` removes
    /// that instance, and its server node once no other instance runs there.
    pub async fn remove(&self, job_name: &str, scope: &InstanceScope) -> Result<()> {
        let path = JobNodePath::new(job_name);
        match scope {
            InstanceScope::All => {
                self.store.remove(&path.root()).await?;
                self.store
                    .remove(&StateNodePath::misfired(job_name))
                    .await?;
                let removed = self.remove_ready_entries(job_name).await?;
                info!(job = %job_name, ready_entries = removed, "Job removed");
            }
            InstanceScope::Instance(id) => {
                self.store.remove(&path.instance(id)).await?;
                let host_in_use = self
                    .online(&path)
                    .await?
                    .iter()
                    .any(|other| other.host() == id.host());
                if !host_in_use {
                    self.store.remove(&path.server(id.host())).await?;
                }
                info!(job = %job_name, instance = %id, server_removed = !host_in_use, "Instance removed");
            }
        }
        Ok(())
    }

    async fn set_server_status(
        &self,
        job_name: &str,
        scope: &InstanceScope,
        status: ServerStatus,
    ) -> Result<()> {
        let path = JobNodePath::new(job_name);
        let ips = match scope {
            InstanceScope::All => self.store.get_children_keys(&path.servers_root()).await?,
            InstanceScope::Instance(id) => vec![id.host().to_string()],
        };
        for ip in ips {
            self.store.persist(&path.server(&ip), status.as_str()).await?;
            info!(job = %job_name, ip = %ip, status = %status, "Server status changed");
        }
        Ok(())
    }

    async fn targets(&self, path: &JobNodePath, scope: &InstanceScope) -> Result<Vec<JobInstanceId>> {
        match scope {
            InstanceScope::All => self.online(path).await,
            InstanceScope::Instance(id) => Ok(vec![id.clone()]),
        }
    }

    async fn online(&self, path: &JobNodePath) -> Result<Vec<JobInstanceId>> {
        Ok(self
            .store
            .get_children_keys(&path.instances_root())
            .await?
            .iter()
            .filter_map(|raw| JobInstanceId::parse(raw).ok())
            .collect())
    }

    async fn remove_ready_entries(&self, job_name: &str) -> Result<usize> {
        let mut removed = 0;
        for node in self
            .store
            .get_children_keys(StateNodePath::READY_ROOT)
            .await?
        {
            match QueueEntry::parse(&node) {
                Ok(entry) if entry.job_name == job_name => {
                    self.store.remove(&StateNodePath::ready(&node)).await?;
                    removed += 1;
                }
                Ok(_) => {}
                Err(e) => warn!(node = %node, error = %e, "Ignoring malformed ready entry"),
            }
        }
        Ok(removed)
    }
}
