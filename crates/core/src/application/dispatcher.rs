// Event Dispatcher - one loop per job instance reacting to store changes
//
// Every notification under /{job} arrives on a single channel and is
// handled in order. Handlers only talk to the store; no in-process lock is
// held while they do.

use crate::application::election::LeaderElectionService;
use crate::application::failover::FailoverService;
use crate::application::instance::InstanceService;
use crate::application::registry::JobRegistry;
use crate::application::sharding::ShardingService;
use crate::application::worker::{JobControl, ShutdownToken};
use crate::domain::{JobConfiguration, JobInstance, JobInstanceId, JobNodePath};
use crate::error::Result;
use crate::port::{StoreEvent, StoreEventKind, WatchStream};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a changed key means to this job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobNodeEvent {
    Config,
    Instance(String),
    Server(String),
    LeaderMarker,
    Running(u32),
    FailoverFlag(u32),
    Other,
}

impl JobNodeEvent {
    pub fn classify(path: &JobNodePath, key: &str) -> Self {
        let relative = match path.relative(key) {
            Some(relative) => relative,
            None => return JobNodeEvent::Other,
        };
        if relative == "config" {
            return JobNodeEvent::Config;
        }
        if relative == "leader/election/instance" {
            return JobNodeEvent::LeaderMarker;
        }
        if let Some(id) = relative.strip_prefix("instances/") {
            return JobNodeEvent::Instance(id.to_string());
        }
        if let Some(ip) = relative.strip_prefix("servers/") {
            return JobNodeEvent::Server(ip.to_string());
        }
        if let Some(item) = relative.strip_prefix("leader/failover/items/") {
            if let Ok(item) = item.parse() {
                return JobNodeEvent::FailoverFlag(item);
            }
        }
        if let Some((item, "running")) = path.parse_item_leaf(key) {
            return JobNodeEvent::Running(item);
        }
        JobNodeEvent::Other
    }
}

pub struct EventDispatcher {
    path: JobNodePath,
    instance: JobInstance,
    registry: Arc<JobRegistry>,
    instances: Arc<InstanceService>,
    election: Arc<LeaderElectionService>,
    sharding: Arc<ShardingService>,
    failover: Arc<FailoverService>,
    control: JobControl,
}

impl EventDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_name: &str,
        instance: JobInstance,
        registry: Arc<JobRegistry>,
        instances: Arc<InstanceService>,
        election: Arc<LeaderElectionService>,
        sharding: Arc<ShardingService>,
        failover: Arc<FailoverService>,
        control: JobControl,
    ) -> Self {
        Self {
            path: JobNodePath::new(job_name),
            instance,
            registry,
            instances,
            election,
            sharding,
            failover,
            control,
        }
    }

    fn job_name(&self) -> &str {
        self.path.job_name()
    }

    pub async fn run(self, mut events: WatchStream, mut shutdown: ShutdownToken) {
        info!(job = %self.job_name(), "Event dispatcher started");
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.handle(&event).await {
                            warn!(job = %self.job_name(), key = %event.key, error = %e, "Event handling failed");
                        }
                    }
                    None => {
                        warn!(job = %self.job_name(), "Store watch closed");
                        break;
                    }
                },
                _ = shutdown.wait() => break,
            }
        }
        info!(job = %self.job_name(), "Event dispatcher stopped");
    }

    pub async fn handle(&self, event: &StoreEvent) -> Result<()> {
        let job = self.job_name();
        if self.registry.is_shutdown(job) {
            return Ok(());
        }
        match JobNodeEvent::classify(&self.path, &event.key) {
            JobNodeEvent::Config => self.on_config(event).await,
            JobNodeEvent::Instance(id) => self.on_instance(event, &id).await,
            JobNodeEvent::Server(ip) => {
                debug!(job = %job, ip = %ip, kind = ?event.kind, "Server changed");
                self.sharding.set_resharding_flag().await
            }
            JobNodeEvent::LeaderMarker if event.kind == StoreEventKind::Removed => {
                info!(job = %job, "Leader marker removed, re-electing");
                self.election.on_leader_removed().await
            }
            JobNodeEvent::Running(item) if event.kind == StoreEventKind::Removed => {
                if self
                    .failover
                    .on_running_removed(item, event.value.as_deref())
                    .await?
                {
                    self.claim_failover().await?;
                }
                Ok(())
            }
            JobNodeEvent::FailoverFlag(_) if event.kind == StoreEventKind::Created => {
                self.claim_failover().await
            }
            _ => Ok(()),
        }
    }

    async fn on_config(&self, event: &StoreEvent) -> Result<()> {
        if event.kind == StoreEventKind::Removed {
            return Ok(());
        }
        let raw = match event.value.as_deref() {
            Some(raw) => raw,
            None => return Ok(()),
        };
        let config: JobConfiguration = match serde_json::from_str(raw) {
            Ok(config) => config,
            Err(e) => {
                warn!(job = %self.job_name(), error = %e, "Ignoring unreadable configuration update");
                return Ok(());
            }
        };
        let current = self.registry.current_sharding_total_count(self.job_name());
        if current != config.total() {
            info!(job = %self.job_name(), from = current, to = config.total(), "Shard count changed");
            self.sharding.set_resharding_flag().await?;
            self.registry
                .set_current_sharding_total_count(self.job_name(), config.total());
        }
        if !config.failover && self.election.is_leader().await? {
            self.failover.remove_failover_info().await?;
        }
        Ok(())
    }

    async fn on_instance(&self, event: &StoreEvent, raw_id: &str) -> Result<()> {
        let is_me = JobInstanceId::parse(raw_id)
            .map(|id| id == self.instance.id)
            .unwrap_or(false);
        match (event.kind, is_me) {
            (StoreEventKind::Removed, true) => {
                info!(job = %self.job_name(), "Own instance node removed, shutting down locally");
                self.registry.mark_shutdown(self.job_name());
                if let Err(e) = self.election.remove_leader().await {
                    warn!(job = %self.job_name(), error = %e, "Failed to release leadership");
                }
                self.control.stop();
                Ok(())
            }
            (StoreEventKind::Updated, true) => {
                if self.instances.take_trigger().await? {
                    info!(job = %self.job_name(), "Operator trigger received");
                    self.control.trigger();
                }
                Ok(())
            }
            (StoreEventKind::Created, true) => Ok(()),
            (StoreEventKind::Created, false) | (StoreEventKind::Removed, false) => {
                debug!(job = %self.job_name(), instance = %raw_id, kind = ?event.kind, "Membership changed");
                self.sharding.set_resharding_flag().await
            }
            (StoreEventKind::Updated, false) => Ok(()),
        }
    }

    async fn claim_failover(&self) -> Result<()> {
        if let Some(item) = self.failover.failover_if_necessary().await? {
            info!(job = %self.job_name(), item, "Running claimed failover item");
            self.control.trigger();
        }
        Ok(())
    }
}
