// Failover Service - hand crashed items to a live instance
//
// 1. Every instance watches running markers. A marker removed without a
//    matching completed record means its holder crashed: the item is
//    flagged under leader/failover/items.
// 2. Any instance that is not running the job locally takes the failover
//    latch, claims the lowest flagged item that is not running, writes an
//    ephemeral `sharding/{item}/failover` = its instance id and drops the
//    flag.
// 3. The claimer runs the item with execution type FAILOVER before any
//    READY work, then removes its claim.

use crate::application::config::ConfigurationService;
use crate::application::latch::execute_in_leader;
use crate::application::registry::JobRegistry;
use crate::application::running::RunningService;
use crate::domain::{JobInstance, JobInstanceId, JobNodePath, RunningRecord};
use crate::error::Result;
use crate::port::CoordinationStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct FailoverService {
    store: Arc<dyn CoordinationStore>,
    path: JobNodePath,
    instance: JobInstance,
    configs: Arc<ConfigurationService>,
    running: Arc<RunningService>,
    registry: Arc<JobRegistry>,
}

impl FailoverService {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        job_name: &str,
        instance: JobInstance,
        configs: Arc<ConfigurationService>,
        running: Arc<RunningService>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        Self {
            store,
            path: JobNodePath::new(job_name),
            instance,
            configs,
            running,
            registry,
        }
    }

    fn job_name(&self) -> &str {
        self.path.job_name()
    }

    /// React to a running marker disappearing. `last_value` is what the
    /// marker held. Returns whether the item was flagged for failover.
    pub async fn on_running_removed(&self, item: u32, last_value: Option<&str>) -> Result<bool> {
        if self.registry.is_shutdown(self.job_name()) {
            return Ok(false);
        }
        let config = match self.configs.try_load().await? {
            Some(config) => config,
            None => return Ok(false),
        };
        if !config.failover || item >= config.total() {
            return Ok(false);
        }
        let task_id = last_value
            .and_then(|raw| serde_json::from_str::<RunningRecord>(raw).ok())
            .map(|record| record.task_id);
        let completed = self.store.get(&self.path.item_completed(item)).await?;
        if let (Some(task_id), Some(completed)) = (&task_id, &completed) {
            if task_id == completed {
                return Ok(false);
            }
        }
        let flagged = self
            .store
            .create(
                &self.path.failover_flag(item),
                task_id.as_deref().unwrap_or_default(),
            )
            .await?;
        if flagged {
            info!(job = %self.job_name(), item, task = ?task_id, "Item crashed, flagged for failover");
        }
        Ok(true)
    }

    pub async fn flagged_items(&self) -> Result<Vec<u32>> {
        let mut items: Vec<u32> = self
            .store
            .get_children_keys(&self.path.failover_items_root())
            .await?
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect();
        items.sort_unstable();
        Ok(items)
    }

    /// Claim one flagged item if this instance is idle. Returns the item
    /// now assigned to this instance for a FAILOVER run.
    pub async fn failover_if_necessary(&self) -> Result<Option<u32>> {
        if !self.need_failover().await? {
            return Ok(None);
        }
        let owner = self.instance.id.as_str();
        execute_in_leader(
            self.store.as_ref(),
            &self.path.failover_latch(),
            owner,
            || async { self.claim_one().await },
        )
        .await
    }

    async fn need_failover(&self) -> Result<bool> {
        let job = self.job_name();
        if self.registry.is_shutdown(job) || self.registry.is_job_running(job) {
            return Ok(false);
        }
        Ok(!self.flagged_items().await?.is_empty())
    }

    async fn claim_one(&self) -> Result<Option<u32>> {
        // Re-check under the latch: another instance may have claimed it
        if !self.need_failover().await? {
            return Ok(None);
        }
        for item in self.flagged_items().await? {
            if self.running.is_task_running(self.job_name(), item).await? {
                debug!(job = %self.job_name(), item, "Flagged item is running again, not claiming");
                continue;
            }
            self.store
                .persist_ephemeral(&self.path.item_failover(item), self.instance.id.as_str())
                .await?;
            self.store.remove(&self.path.failover_flag(item)).await?;
            info!(job = %self.job_name(), item, instance = %self.instance.id, "Failover item claimed");
            return Ok(Some(item));
        }
        Ok(None)
    }

    /// Items claimed by `instance`
    pub async fn get_failover_items(&self, instance: &JobInstanceId) -> Result<Vec<u32>> {
        let mut result = Vec::new();
        for item in self.item_nodes().await? {
            let claimer = self.store.get(&self.path.item_failover(item)).await?;
            if claimer.as_deref() == Some(instance.as_str()) {
                result.push(item);
            }
        }
        Ok(result)
    }

    pub async fn get_local_failover_items(&self) -> Result<Vec<u32>> {
        if self.registry.is_shutdown(self.job_name()) {
            return Ok(Vec::new());
        }
        self.get_failover_items(&self.instance.id).await
    }

    /// Of `local_items`, those currently claimed by some failover run;
    /// the regular owner must skip them
    pub async fn get_local_take_off_items(&self, local_items: &[u32]) -> Result<Vec<u32>> {
        let mut result = Vec::new();
        for item in local_items {
            if self.store.is_existed(&self.path.item_failover(*item)).await? {
                result.push(*item);
            }
        }
        Ok(result)
    }

    /// Drop the claims after the FAILOVER run
    pub async fn update_failover_complete(&self, items: &[u32]) -> Result<()> {
        for item in items {
            self.store.remove(&self.path.item_failover(*item)).await?;
        }
        Ok(())
    }

    /// Forget every claim and flag of the job
    pub async fn remove_failover_info(&self) -> Result<()> {
        for item in self.item_nodes().await? {
            if let Err(e) = self.store.remove(&self.path.item_failover(item)).await {
                warn!(job = %self.job_name(), item, error = %e, "Failed to remove failover claim");
            }
        }
        self.store.remove(&self.path.failover_items_root()).await
    }

    async fn item_nodes(&self) -> Result<Vec<u32>> {
        let mut items: Vec<u32> = self
            .store
            .get_children_keys(&self.path.sharding_root())
            .await?
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect();
        items.sort_unstable();
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobConfiguration, JobType};
    use crate::port::coordination_store::MockCoordinationStore;
    use crate::port::time_provider::SystemTimeProvider;

    const TASK: &str = "billing@-@2@-@READY@-@10.0.0.9@-@1@-@t0";

    fn service(mut store: MockCoordinationStore, failover: bool, completed: Option<&'static str>) -> FailoverService {
        let mut config = JobConfiguration::new("billing", JobType::Simple, 4).with_job_class("noop");
        config.failover = failover;
        let raw_config = serde_json::to_string(&config).unwrap();
        store.expect_get().returning(move |key| match key {
            "/billing/config" => Ok(Some(raw_config.clone())),
            "/billing/sharding/2/completed" => Ok(completed.map(str::to_string)),
            _ => Ok(None),
        });
        let store: Arc<dyn CoordinationStore> = Arc::new(store);
        let registry = Arc::new(JobRegistry::new());
        let instance = JobInstance::new(JobInstanceId::new("10.0.0.1", "1"));
        registry.register("billing", instance.clone(), 4);
        FailoverService::new(
            store.clone(),
            "billing",
            instance,
            Arc::new(ConfigurationService::new(store.clone(), "billing")),
            Arc::new(RunningService::new(store, Arc::new(SystemTimeProvider))),
            registry,
        )
    }

    fn marker() -> String {
        serde_json::to_string(&RunningRecord::new(TASK, 1)).unwrap()
    }

    #[tokio::test]
    async fn test_normal_completion_is_not_flagged() {
        let mut store = MockCoordinationStore::new();
        store.expect_create().never();
        let failover = service(store, true, Some(TASK));

        let flagged = failover.on_running_removed(2, Some(&marker())).await.unwrap();
        assert!(!flagged);
    }

    #[tokio::test]
    async fn test_crash_is_flagged_with_task_id() {
        let mut store = MockCoordinationStore::new();
        store
            .expect_create()
            .withf(|key, value| key == "/billing/leader/failover/items/2" && value == TASK)
            .times(1)
            .returning(|_, _| Ok(true));
        let failover = service(store, true, Some("an-older-task"));

        assert!(failover.on_running_removed(2, Some(&marker())).await.unwrap());
    }

    #[tokio::test]
    async fn test_disabled_failover_leaves_item_alone() {
        let mut store = MockCoordinationStore::new();
        store.expect_create().never();
        let failover = service(store, false, None);

        assert!(!failover.on_running_removed(2, Some(&marker())).await.unwrap());
    }
}
