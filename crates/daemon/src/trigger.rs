//! Interval trigger source
//!
//! Every tick the leader of each local job puts it on the shared ready
//! queue, or on the misfired queue while the job is still running. Any
//! instance draining the queues fans the trigger out to all instances of
//! the job through their instance nodes.

use shardline_core::application::{
    AdminService, InstanceScope, JobHandle, MisfiredService, ReadyService, RunningService,
    ShutdownToken,
};
use shardline_core::error::Result;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub struct TriggerSource {
    handles: Vec<JobHandle>,
    running: std::sync::Arc<RunningService>,
    ready: ReadyService,
    misfired: MisfiredService,
    admin: AdminService,
    period: Duration,
}

impl TriggerSource {
    pub fn new(
        handles: Vec<JobHandle>,
        running: std::sync::Arc<RunningService>,
        ready: ReadyService,
        misfired: MisfiredService,
        admin: AdminService,
        period: Duration,
    ) -> Self {
        Self {
            handles,
            running,
            ready,
            misfired,
            admin,
            period,
        }
    }

    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(jobs = self.handles.len(), period_secs = self.period.as_secs(), "Trigger source started");
        let mut tick = interval(self.period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.fire().await {
                        error!(error = %e, "Trigger tick failed");
                    }
                }
                _ = shutdown.wait() => {
                    info!("Trigger source stopped");
                    break;
                }
            }
        }
    }

    async fn fire(&self) -> Result<()> {
        for handle in &self.handles {
            let job = handle.job_name();
            if handle.is_shutdown() || !handle.is_leader().await? {
                continue;
            }
            if !handle.should_run().await? {
                debug!(job = %job, "Trigger suppressed");
                continue;
            }
            if self.running.is_job_running(job).await? {
                self.misfired.add_misfired(job).await?;
            } else if !self.ready.enqueue(job).await? {
                warn!(job = %job, "Ready queue full, trigger dropped");
            }
        }

        let mut fired = HashSet::new();
        while let Some(context) = self.ready.dequeue().await? {
            let job = context.config.job_name;
            self.admin.trigger(&job, &InstanceScope::All).await?;
            fired.insert(job);
        }

        let eligible = self.misfired.get_all_eligible_job_contexts(&fired).await?;
        let mut recovered = Vec::new();
        for context in eligible {
            let job = context.config.job_name;
            self.admin.trigger(&job, &InstanceScope::All).await?;
            recovered.push(job);
        }
        if !recovered.is_empty() {
            info!(jobs = ?recovered, "Misfired jobs triggered");
            self.misfired.remove_misfired(&recovered).await?;
        }
        Ok(())
    }
}
