// Sharding Service - computes and publishes item ownership
//
// State machine per job:
//   STABLE --(membership/config change)--> NEEDS_RESHARD
//   NEEDS_RESHARD --(leader starts)--> RESHARDING
//   RESHARDING --(transaction commits)--> STABLE
//
// NEEDS_RESHARD is the `leader/sharding/necessary` node, RESHARDING adds the
// ephemeral `leader/sharding/processing` node. The commit that installs the
// new assignment also deletes both, so followers never observe a partial
// assignment once the flags are gone.

pub mod strategy;

pub use strategy::{JobShardingStrategy, ShardingStrategyRegistry};

use crate::application::config::ConfigurationService;
use crate::application::election::LeaderElectionService;
use crate::application::instance::InstanceService;
use crate::application::registry::JobRegistry;
use crate::application::running::RunningService;
use crate::application::worker::constants::{
    RUNNING_DRAIN_POLL_INTERVAL, SHARDING_SETTLE_POLL_INTERVAL,
};
use crate::domain::{JobInstance, JobInstanceId, JobNodePath};
use crate::error::{AppError, Result};
use crate::port::{CoordinationStore, StoreTransaction};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardingState {
    Stable,
    NeedsReshard,
    Resharding,
}

pub struct ShardingService {
    store: Arc<dyn CoordinationStore>,
    path: JobNodePath,
    instance: JobInstance,
    instances: Arc<InstanceService>,
    election: Arc<LeaderElectionService>,
    configs: Arc<ConfigurationService>,
    running: Arc<RunningService>,
    strategies: Arc<ShardingStrategyRegistry>,
    registry: Arc<JobRegistry>,
}

impl ShardingService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        job_name: &str,
        instance: JobInstance,
        instances: Arc<InstanceService>,
        election: Arc<LeaderElectionService>,
        configs: Arc<ConfigurationService>,
        running: Arc<RunningService>,
        strategies: Arc<ShardingStrategyRegistry>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        Self {
            store,
            path: JobNodePath::new(job_name),
            instance,
            instances,
            election,
            configs,
            running,
            strategies,
            registry,
        }
    }

    fn job_name(&self) -> &str {
        self.path.job_name()
    }

    /// Request a reshard; idempotent
    pub async fn set_resharding_flag(&self) -> Result<()> {
        if self
            .store
            .create(&self.path.sharding_necessary(), "")
            .await?
        {
            debug!(job = %self.job_name(), "Resharding flag set");
        }
        Ok(())
    }

    pub async fn is_need_sharding(&self) -> Result<bool> {
        self.store.is_existed(&self.path.sharding_necessary()).await
    }

    pub async fn sharding_state(&self) -> Result<ShardingState> {
        if self
            .store
            .is_existed(&self.path.sharding_processing())
            .await?
        {
            Ok(ShardingState::Resharding)
        } else if self.is_need_sharding().await? {
            Ok(ShardingState::NeedsReshard)
        } else {
            Ok(ShardingState::Stable)
        }
    }

    /// Bring the assignment up to date before a cycle. The leader
    /// recomputes it; followers wait until the leader is done, taking over
    /// if they become leader meanwhile.
    pub async fn sharding_if_necessary(&self) -> Result<()> {
        loop {
            let available = self.instances.get_available_job_instances().await?;
            if !self.is_need_sharding().await? || available.is_empty() {
                return Ok(());
            }
            if self.election.is_leader_until_block().await? {
                if self.reshard(available).await? {
                    return Ok(());
                }
                // Discarded: the flag is still set, look again before running
                sleep(SHARDING_SETTLE_POLL_INTERVAL).await;
                continue;
            }
            self.block_until_sharding_completed().await?;
        }
    }

    /// Wait while a reshard is pending elsewhere. Returns once the
    /// assignment settled or this instance became leader.
    pub async fn block_until_sharding_completed(&self) -> Result<()> {
        loop {
            if self.registry.is_shutdown(self.job_name()) {
                return Err(AppError::Shutdown(self.job_name().to_string()));
            }
            if self.election.is_leader().await? {
                return Ok(());
            }
            if self.sharding_state().await? == ShardingState::Stable {
                return Ok(());
            }
            debug!(job = %self.job_name(), "Waiting for sharding to complete");
            sleep(SHARDING_SETTLE_POLL_INTERVAL).await;
        }
    }

    /// `false` when the commit was rejected and nothing was installed
    async fn reshard(&self, available: Vec<JobInstanceId>) -> Result<bool> {
        let job = self.job_name().to_string();
        self.wait_while_running().await?;

        let config = self.configs.load().await?;
        let total = config.total();
        let strategy = self.strategies.resolve(&config.sharding_strategy)?;
        info!(job = %job, total, instances = available.len(), "Sharding job");

        self.store
            .persist_ephemeral(&self.path.sharding_processing(), "")
            .await?;

        let assignment = strategy.sharding(&available, &job, total);
        let mut tx = StoreTransaction::new().check_exists(self.path.leader_instance());
        for (item, owner) in assignment.iter() {
            tx = tx.put(self.path.item_instance(*item), owner.as_str());
        }
        for stale in self.stale_items(total).await? {
            tx = tx.delete(self.path.sharding_item(stale));
        }
        tx = tx
            .delete(self.path.sharding_necessary())
            .delete(self.path.sharding_processing());

        match self.store.commit(tx).await {
            Ok(true) => {
                self.registry.set_current_sharding_total_count(&job, total);
                info!(job = %job, assignment = ?assignment.by_instance(), "Sharding completed");
                Ok(true)
            }
            Ok(false) => {
                warn!(job = %job, "Sharding commit rejected, assignment discarded");
                self.release_processing().await;
                Ok(false)
            }
            Err(e) => {
                self.release_processing().await;
                Err(e)
            }
        }
    }

    async fn release_processing(&self) {
        if let Err(e) = self.store.remove(&self.path.sharding_processing()).await {
            warn!(job = %self.job_name(), error = %e, "Failed to clear processing flag");
        }
    }

    /// Items from a previous, larger total
    async fn stale_items(&self, total: u32) -> Result<Vec<u32>> {
        Ok(self
            .store
            .get_children_keys(&self.path.sharding_root())
            .await?
            .iter()
            .filter_map(|name| name.parse::<u32>().ok())
            .filter(|item| *item >= total)
            .collect())
    }

    async fn wait_while_running(&self) -> Result<()> {
        while self.running.is_job_running(self.job_name()).await? {
            if self.registry.is_shutdown(self.job_name()) {
                return Err(AppError::Shutdown(self.job_name().to_string()));
            }
            debug!(job = %self.job_name(), "Waiting for running items before sharding");
            sleep(RUNNING_DRAIN_POLL_INTERVAL).await;
        }
        Ok(())
    }

    /// Items assigned to `instance`; empty when its server is unavailable
    pub async fn get_sharding_items(&self, instance: &JobInstanceId) -> Result<Vec<u32>> {
        if !self.instances.is_online(instance).await? {
            return Ok(Vec::new());
        }
        let total = self.configs.load().await?.total();
        let mut result = Vec::new();
        for item in 0..total {
            let owner = self.store.get(&self.path.item_instance(item)).await?;
            if owner.as_deref() == Some(instance.as_str()) {
                result.push(item);
            }
        }
        Ok(result)
    }

    pub async fn get_local_sharding_items(&self) -> Result<Vec<u32>> {
        if self.registry.is_shutdown(self.job_name()) {
            return Ok(Vec::new());
        }
        self.get_sharding_items(&self.instance.id).await
    }

    /// True when some item is neither running nor owned by a live instance
    pub async fn has_sharding_info_in_offline_servers(&self) -> Result<bool> {
        let total = self.configs.load().await?.total();
        let online = self.instances.online_instances().await?;
        for item in 0..total {
            if self.running.is_task_running(self.job_name(), item).await? {
                continue;
            }
            let owner = self.store.get(&self.path.item_instance(item)).await?;
            let live = owner
                .as_deref()
                .map(|raw| online.iter().any(|id| id.as_str() == raw))
                .unwrap_or(false);
            if !live {
                debug!(job = %self.job_name(), item, owner = ?owner, "Item without live owner");
                return Ok(true);
            }
        }
        Ok(false)
    }
}
