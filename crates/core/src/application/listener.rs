// Job listeners - hooks around each dispatch

use crate::domain::{ExecutionType, ShardingContexts};
use async_trait::async_trait;
use std::sync::Arc;

/// Outcome of one item in a dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded,
    Failed(String),
    Panicked(String),
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Succeeded)
    }
}

/// What one dispatch did with its items
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub execution_type: ExecutionType,
    pub outcomes: Vec<(u32, ItemOutcome)>,
    /// Items someone else was already running
    pub skipped: Vec<u32>,
    /// Items whose running marker was lost before completion
    pub lost: Vec<u32>,
}

impl DispatchReport {
    pub fn new(execution_type: ExecutionType) -> Self {
        Self {
            execution_type,
            outcomes: Vec::new(),
            skipped: Vec::new(),
            lost: Vec::new(),
        }
    }

    pub fn executed_items(&self) -> Vec<u32> {
        self.outcomes.iter().map(|(item, _)| *item).collect()
    }
}

/// Runs on every instance around its own dispatch
#[async_trait]
pub trait JobListener: Send + Sync {
    async fn before_job_executed(&self, _contexts: &ShardingContexts) {}

    async fn after_job_executed(&self, _contexts: &ShardingContexts, _report: &DispatchReport) {}
}

/// Runs exactly once per cycle across the whole cluster
#[async_trait]
pub trait DistributeOnceJobListener: Send + Sync {
    async fn before_first_shard(&self, contexts: &ShardingContexts);

    async fn after_last_shard(&self, contexts: &ShardingContexts);
}

/// Listeners attached to one job
#[derive(Clone, Default)]
pub struct JobListeners {
    pub per_shard: Vec<Arc<dyn JobListener>>,
    pub distribute_once: Vec<Arc<dyn DistributeOnceJobListener>>,
}

impl JobListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listener(mut self, listener: Arc<dyn JobListener>) -> Self {
        self.per_shard.push(listener);
        self
    }

    pub fn with_distribute_once(mut self, listener: Arc<dyn DistributeOnceJobListener>) -> Self {
        self.distribute_once.push(listener);
        self
    }

    pub(crate) async fn before_job_executed(&self, contexts: &ShardingContexts) {
        futures::future::join_all(
            self.per_shard
                .iter()
                .map(|l| l.before_job_executed(contexts)),
        )
        .await;
    }

    pub(crate) async fn after_job_executed(&self, contexts: &ShardingContexts, report: &DispatchReport) {
        futures::future::join_all(
            self.per_shard
                .iter()
                .map(|l| l.after_job_executed(contexts, report)),
        )
        .await;
    }

    pub(crate) async fn before_first_shard(&self, contexts: &ShardingContexts) {
        for listener in &self.distribute_once {
            listener.before_first_shard(contexts).await;
        }
    }

    pub(crate) async fn after_last_shard(&self, contexts: &ShardingContexts) {
        for listener in &self.distribute_once {
            listener.after_last_shard(contexts).await;
        }
    }
}
