// Queue Services - cross-job ready and misfired queues
//
// Ready:    /state/ready/{job}@-@{seq}, one node per trigger, drained in
//           sequence order by whichever instance dequeues.
// Misfired: /state/misfired/{job}, at most one node per job.

use crate::application::config::load_job_configuration;
use crate::application::running::RunningService;
use crate::application::worker::constants::DEFAULT_READY_QUEUE_MAX_DEPTH;
use crate::domain::{ExecutionType, JobConfiguration, QueueEntry, StateNodePath};
use crate::error::Result;
use crate::port::CoordinationStore;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A job picked off a queue, with the items it should run
#[derive(Debug, Clone, PartialEq)]
pub struct JobContext {
    pub config: JobConfiguration,
    pub sharding_items: Vec<u32>,
    pub execution_type: ExecutionType,
}

impl JobContext {
    fn all_items(config: JobConfiguration, execution_type: ExecutionType) -> Self {
        Self {
            sharding_items: (0..config.total()).collect(),
            config,
            execution_type,
        }
    }
}

pub struct ReadyService {
    store: Arc<dyn CoordinationStore>,
    running: Arc<RunningService>,
    max_depth: usize,
}

impl ReadyService {
    pub fn new(store: Arc<dyn CoordinationStore>, running: Arc<RunningService>) -> Self {
        Self {
            store,
            running,
            max_depth: DEFAULT_READY_QUEUE_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Append a ready entry; `false` when the queue is full
    pub async fn enqueue(&self, job_name: &str) -> Result<bool> {
        let depth = self
            .store
            .get_children_keys(StateNodePath::READY_ROOT)
            .await?
            .len();
        if depth >= self.max_depth {
            warn!(job = %job_name, depth, "Ready queue full, trigger dropped");
            return Ok(false);
        }
        let prefix = StateNodePath::ready(&QueueEntry::node_prefix(job_name));
        let key = self.store.persist_sequential(&prefix, "").await?;
        debug!(job = %job_name, key = %key, "Job enqueued");
        Ok(true)
    }

    /// Entries in sequence order; malformed node names are skipped
    pub async fn pending(&self) -> Result<Vec<QueueEntry>> {
        let mut entries: Vec<QueueEntry> = self
            .store
            .get_children_keys(StateNodePath::READY_ROOT)
            .await?
            .iter()
            .filter_map(|name| match QueueEntry::parse(name) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(node = %name, error = %e, "Ignoring malformed ready entry");
                    None
                }
            })
            .collect();
        entries.sort_by(|a, b| {
            a.sequence
                .cmp(&b.sequence)
                .then_with(|| a.node_name.cmp(&b.node_name))
        });
        Ok(entries)
    }

    /// Take the oldest eligible entry.
    ///
    /// Entries of deleted jobs are dropped. Entries of a running job stay
    /// queued when the job allows misfire and are dropped otherwise. Further
    /// entries of the job being taken are collapsed into it.
    pub async fn dequeue(&self) -> Result<Option<JobContext>> {
        let mut blocked: HashSet<String> = HashSet::new();
        for entry in self.pending().await? {
            if blocked.contains(&entry.job_name) {
                continue;
            }
            let config = match load_job_configuration(self.store.as_ref(), &entry.job_name).await? {
                Some(config) => config,
                None => {
                    info!(job = %entry.job_name, "Dropping ready entry of deleted job");
                    self.remove_entry(&entry).await?;
                    continue;
                }
            };
            if self.running.is_job_running(&entry.job_name).await? {
                if config.misfire {
                    debug!(job = %entry.job_name, "Job running, leaving ready entry queued");
                    blocked.insert(entry.job_name.clone());
                } else {
                    info!(job = %entry.job_name, "Job running and misfire disabled, dropping ready entry");
                    self.remove_entry(&entry).await?;
                }
                continue;
            }
            self.remove_all_of(&entry.job_name).await?;
            return Ok(Some(JobContext::all_items(config, ExecutionType::Ready)));
        }
        Ok(None)
    }

    async fn remove_entry(&self, entry: &QueueEntry) -> Result<()> {
        self.store
            .remove(&StateNodePath::ready(&entry.node_name))
            .await
    }

    async fn remove_all_of(&self, job_name: &str) -> Result<()> {
        for entry in self.pending().await? {
            if entry.job_name == job_name {
                self.remove_entry(&entry).await?;
            }
        }
        Ok(())
    }

    /// Drop every entry of a job (job removal)
    pub async fn remove(&self, job_name: &str) -> Result<()> {
        self.remove_all_of(job_name).await
    }
}

pub struct MisfiredService {
    store: Arc<dyn CoordinationStore>,
    running: Arc<RunningService>,
}

impl MisfiredService {
    pub fn new(store: Arc<dyn CoordinationStore>, running: Arc<RunningService>) -> Self {
        Self { store, running }
    }

    /// Remember that a trigger of `job_name` was skipped; idempotent
    pub async fn add_misfired(&self, job_name: &str) -> Result<()> {
        if self
            .store
            .create(&StateNodePath::misfired(job_name), "")
            .await?
        {
            info!(job = %job_name, "Job added to misfired queue");
        }
        Ok(())
    }

    pub async fn contains(&self, job_name: &str) -> Result<bool> {
        self.store
            .is_existed(&StateNodePath::misfired(job_name))
            .await
    }

    /// Misfired jobs that may run now: not in `ineligible`, not running,
    /// and still configured. Entries of deleted jobs are dropped.
    pub async fn get_all_eligible_job_contexts(
        &self,
        ineligible: &HashSet<String>,
    ) -> Result<Vec<JobContext>> {
        let mut result = Vec::new();
        for job_name in self
            .store
            .get_children_keys(StateNodePath::MISFIRED_ROOT)
            .await?
        {
            if ineligible.contains(&job_name) {
                continue;
            }
            let config = match load_job_configuration(self.store.as_ref(), &job_name).await? {
                Some(config) => config,
                None => {
                    self.remove_misfired(&[job_name.clone()]).await?;
                    continue;
                }
            };
            if self.running.is_job_running(&job_name).await? {
                continue;
            }
            result.push(JobContext::all_items(config, ExecutionType::Misfired));
        }
        Ok(result)
    }

    pub async fn remove_misfired(&self, job_names: &[String]) -> Result<()> {
        for job_name in job_names {
            self.store
                .remove(&StateNodePath::misfired(job_name))
                .await?;
        }
        Ok(())
    }
}
