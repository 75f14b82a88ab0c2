// Guarantee Service - cluster-wide start/complete barrier
//
// Each instance registers its items under guarantee/{phase}. Once the set
// holds every item of the job, exactly one instance wins the ephemeral
// `{phase}-owner` node, re-checks the set, runs the callback and removes
// the set. Everyone else waits for that removal. Waiters that time out
// clear the set so the next cycle starts from scratch.

use crate::application::config::ConfigurationService;
use crate::application::worker::constants::BARRIER_POLL_INTERVAL;
use crate::domain::{JobInstance, JobNodePath};
use crate::error::{AppError, Result};
use crate::port::{CoordinationStore, WatchStream};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierPhase {
    Started,
    Completed,
}

impl BarrierPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BarrierPhase::Started => "started",
            BarrierPhase::Completed => "completed",
        }
    }
}

impl fmt::Display for BarrierPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a barrier wait ended for this instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierOutcome {
    /// This instance ran the callback
    Ran,
    /// Another instance ran it
    Passed,
}

pub struct GuaranteeService {
    store: Arc<dyn CoordinationStore>,
    path: JobNodePath,
    instance: JobInstance,
    configs: Arc<ConfigurationService>,
}

impl GuaranteeService {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        job_name: &str,
        instance: JobInstance,
        configs: Arc<ConfigurationService>,
    ) -> Self {
        Self {
            store,
            path: JobNodePath::new(job_name),
            instance,
            configs,
        }
    }

    pub async fn register(&self, phase: BarrierPhase, items: &[u32]) -> Result<()> {
        for item in items {
            self.store
                .persist(&self.path.guarantee_item(phase.as_str(), *item), "")
                .await?;
        }
        Ok(())
    }

    /// Every item of the job has registered
    pub async fn is_all(&self, phase: BarrierPhase) -> Result<bool> {
        let total = self.configs.load().await?.total() as usize;
        let registered = self
            .store
            .get_children_keys(&self.path.guarantee_set(phase.as_str()))
            .await?;
        Ok(registered.len() >= total && total > 0)
    }

    pub async fn clear(&self, phase: BarrierPhase) -> Result<()> {
        self.store
            .remove(&self.path.guarantee_set(phase.as_str()))
            .await
    }

    /// Register `items` and wait until every item of the job has, running
    /// `callback` on exactly one instance. On timeout the set is cleared and
    /// `BarrierTimeout` returned.
    pub async fn await_barrier<F, Fut>(
        &self,
        phase: BarrierPhase,
        items: &[u32],
        timeout: Duration,
        callback: F,
    ) -> Result<BarrierOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let job = self.path.job_name();
        let set_key = self.path.guarantee_set(phase.as_str());
        let deadline = Instant::now() + timeout;

        let mut events = self.store.watch(&set_key).await?;
        self.register(phase, items).await?;
        debug!(job = %job, %phase, ?items, "Registered at barrier");

        loop {
            if self.is_all(phase).await? {
                if let Some(outcome) = self.try_release(phase, callback).await? {
                    return Ok(outcome);
                }
                // Lost the owner race; the winner removes the set
                return self.wait_for_release(phase, &mut events, deadline, timeout).await;
            }
            match timeout_at(deadline, events.recv()).await {
                Ok(Some(event)) if event.is_removed(&set_key) => {
                    return Ok(BarrierOutcome::Passed)
                }
                Ok(Some(_)) => continue,
                Ok(None) => sleep(BARRIER_POLL_INTERVAL.min(remaining(deadline))).await,
                Err(_) => return Err(self.timed_out(phase, timeout).await),
            }
            if Instant::now() >= deadline {
                return Err(self.timed_out(phase, timeout).await);
            }
        }
    }

    /// Returns `None` when another instance owns the release
    async fn try_release<F, Fut>(&self, phase: BarrierPhase, callback: F) -> Result<Option<BarrierOutcome>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let owner_key = self.path.guarantee_owner(phase.as_str());
        if !self
            .store
            .create_ephemeral(&owner_key, self.instance.id.as_str())
            .await?
        {
            return Ok(None);
        }
        let result = match self.is_all(phase).await {
            Ok(true) => {
                info!(job = %self.path.job_name(), %phase, "Barrier reached, running callback");
                callback().await;
                self.clear(phase).await.map(|_| Some(BarrierOutcome::Ran))
            }
            // Already released by an earlier owner
            Ok(false) => Ok(Some(BarrierOutcome::Passed)),
            Err(e) => Err(e),
        };
        if let Err(e) = self.store.remove(&owner_key).await {
            warn!(job = %self.path.job_name(), %phase, error = %e, "Failed to release barrier owner");
        }
        result
    }

    async fn wait_for_release(
        &self,
        phase: BarrierPhase,
        events: &mut WatchStream,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<BarrierOutcome> {
        let set_key = self.path.guarantee_set(phase.as_str());
        loop {
            match timeout_at(deadline, events.recv()).await {
                Ok(Some(event)) if event.is_removed(&set_key) => return Ok(BarrierOutcome::Passed),
                Ok(Some(_)) => continue,
                Ok(None) => {
                    sleep(BARRIER_POLL_INTERVAL.min(remaining(deadline))).await;
                    if !self.store.is_existed(&set_key).await? {
                        return Ok(BarrierOutcome::Passed);
                    }
                    if Instant::now() >= deadline {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        Err(self.timed_out(phase, timeout).await)
    }

    async fn timed_out(&self, phase: BarrierPhase, timeout: Duration) -> AppError {
        let job = self.path.job_name();
        warn!(job = %job, %phase, timeout_ms = timeout.as_millis() as u64, "Barrier timed out, clearing");
        if let Err(e) = self.clear(phase).await {
            warn!(job = %job, %phase, error = %e, "Failed to clear barrier after timeout");
        }
        AppError::BarrierTimeout {
            job_name: job.to_string(),
            phase: phase.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}
