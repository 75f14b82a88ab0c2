// Reconcile Worker - leader-only sweep for assignments nobody can serve
//
// Backstop for missed store notifications: if an item's owner is gone and
// the item is not running, request a reshard.

use crate::application::election::LeaderElectionService;
use crate::application::sharding::ShardingService;
use crate::application::worker::ShutdownToken;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub struct ReconcileService {
    job_name: String,
    election: Arc<LeaderElectionService>,
    sharding: Arc<ShardingService>,
    interval_secs: i64,
}

impl ReconcileService {
    /// `interval_secs <= 0` disables the worker
    pub fn new(
        job_name: impl Into<String>,
        election: Arc<LeaderElectionService>,
        sharding: Arc<ShardingService>,
        interval_secs: i64,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            election,
            sharding,
            interval_secs,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.interval_secs > 0
    }

    /// Run reconcile loop (background task)
    pub async fn run(self, mut shutdown: ShutdownToken) {
        if !self.is_enabled() {
            info!(job = %self.job_name, "Reconcile worker disabled");
            return;
        }
        info!(job = %self.job_name, interval_secs = self.interval_secs, "Reconcile worker started");

        let period = Duration::from_secs(self.interval_secs as u64);
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; the first sweep waits one period
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.reconcile_once().await {
                        error!(job = %self.job_name, error = %e, "Reconcile sweep failed");
                    }
                }
                _ = shutdown.wait() => {
                    info!(job = %self.job_name, "Reconcile worker stopped");
                    break;
                }
            }
        }
    }

    /// One sweep. Returns whether a reshard was requested.
    pub async fn reconcile_once(&self) -> Result<bool> {
        if !self.election.is_leader().await? {
            return Ok(false);
        }
        if self.sharding.is_need_sharding().await? {
            debug!(job = %self.job_name, "Reshard already pending");
            return Ok(false);
        }
        if self.sharding.has_sharding_info_in_offline_servers().await? {
            warn!(job = %self.job_name, "Assignment references offline instances, forcing reshard");
            self.sharding.set_resharding_flag().await?;
            return Ok(true);
        }
        Ok(false)
    }
}
