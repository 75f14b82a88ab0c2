//! Shared harness: several instances of one job on an in-process store

#![allow(dead_code)]

use async_trait::async_trait;
use shardline_core::application::{
    DispatchReport, DistributeOnceJobListener, JobFactoryRegistry, JobHandle, JobListener,
    JobListeners, JobRegistry, JobScheduler, JobShardingStrategy, ShardingStrategyRegistry,
    SimpleJob,
};
use shardline_core::domain::{
    Assignment, ExecutionType, JobConfiguration, JobInstanceId, JobNodePath, JobType,
    ShardingContext, ShardingContexts, TaskContext,
};
use shardline_core::port::host_identity::FixedIdentity;
use shardline_core::port::id_provider::SequentialIdProvider;
use shardline_core::error::Result as StoreResult;
use shardline_core::port::{
    CoordinationStore, ExecutionError, StoreTransaction, TransactionOp, WatchStream,
};
use shardline_infra_memory::{MemoryCoordinationServer, MemoryCoordinationStore, SessionId};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const RECORDING_JOB: &str = "recording";

/// Time for watch notifications to reach every dispatcher
pub const EVENT_SETTLE: Duration = Duration::from_millis(100);

/// Records (execution type, item) of every executed item, in order
#[derive(Default)]
pub struct RecordingJob {
    executions: Mutex<Vec<(ExecutionType, u32)>>,
}

impl RecordingJob {
    pub fn executions(&self) -> Vec<(ExecutionType, u32)> {
        self.executions.lock().unwrap().clone()
    }

    pub fn items(&self) -> Vec<u32> {
        let mut items: Vec<u32> = self.executions().iter().map(|(_, item)| *item).collect();
        items.sort_unstable();
        items
    }

    pub fn clear(&self) {
        self.executions.lock().unwrap().clear();
    }
}

#[async_trait]
impl SimpleJob for RecordingJob {
    async fn execute(&self, context: &ShardingContext) -> Result<(), ExecutionError> {
        let task = TaskContext::parse(&context.task_id)
            .map_err(|e| ExecutionError::JobFailed(e.to_string()))?;
        self.executions
            .lock()
            .unwrap()
            .push((task.execution_type, context.sharding_item));
        Ok(())
    }
}

/// Counts barrier callbacks across every instance sharing it
#[derive(Default)]
pub struct CountingListener {
    pub before: AtomicUsize,
    pub after: AtomicUsize,
}

#[async_trait]
impl DistributeOnceJobListener for CountingListener {
    async fn before_first_shard(&self, _contexts: &ShardingContexts) {
        self.before.fetch_add(1, Ordering::SeqCst);
    }

    async fn after_last_shard(&self, _contexts: &ShardingContexts) {
        self.after.fetch_add(1, Ordering::SeqCst);
    }
}

/// Counts per-instance hook calls and the items that succeeded
#[derive(Default)]
pub struct ShardHookCounter {
    pub before: AtomicUsize,
    pub succeeded: AtomicUsize,
}

#[async_trait]
impl JobListener for ShardHookCounter {
    async fn before_job_executed(&self, _contexts: &ShardingContexts) {
        self.before.fetch_add(1, Ordering::SeqCst);
    }

    async fn after_job_executed(&self, _contexts: &ShardingContexts, report: &DispatchReport) {
        let ok = report.outcomes.iter().filter(|(_, o)| o.is_success()).count();
        self.succeeded.fetch_add(ok, Ordering::SeqCst);
    }
}

pub const FIRST_TAKES_ALL: &str = "FIRST_TAKES_ALL";

/// Custom strategy: the lowest instance id owns every item
pub struct FirstTakesAll;

impl JobShardingStrategy for FirstTakesAll {
    fn sharding(&self, instances: &[JobInstanceId], _job_name: &str, total: u32) -> Assignment {
        let mut assignment = Assignment::new();
        if let Some(first) = instances.first() {
            for item in 0..total {
                assignment.assign(item, first.clone());
            }
        }
        assignment
    }
}

pub fn job_config(job_name: &str, total: i32) -> JobConfiguration {
    let mut config = JobConfiguration::new(job_name, JobType::Simple, total).with_job_class(RECORDING_JOB);
    // Sweeps would race the assertions
    config.reconcile_interval_secs = 0;
    config
}

/// One instance: its own session, registry and scheduler
pub struct Node {
    pub store: Arc<MemoryCoordinationStore>,
    pub handle: JobHandle,
    pub job: Arc<RecordingJob>,
}

impl Node {
    pub async fn start(
        server: &MemoryCoordinationServer,
        host: &str,
        process: &str,
        config: JobConfiguration,
        listeners: JobListeners,
    ) -> Node {
        Self::start_with(server, host, process, config, listeners, |store| store).await
    }

    /// Like `start`, but the scheduler talks to the store through `wrap`
    pub async fn start_with(
        server: &MemoryCoordinationServer,
        host: &str,
        process: &str,
        config: JobConfiguration,
        listeners: JobListeners,
        wrap: impl FnOnce(Arc<dyn CoordinationStore>) -> Arc<dyn CoordinationStore>,
    ) -> Node {
        let store = Arc::new(server.connect());
        let job = Arc::new(RecordingJob::default());
        let mut factories = JobFactoryRegistry::new();
        factories.register_simple(RECORDING_JOB, job.clone());
        let mut strategies = ShardingStrategyRegistry::with_builtins();
        strategies.register(FIRST_TAKES_ALL, Arc::new(FirstTakesAll));
        let scheduler = JobScheduler::new(
            wrap(store.clone() as Arc<dyn CoordinationStore>),
            Arc::new(FixedIdentity::new(host, process)),
            Arc::new(JobRegistry::new()),
        )
        .with_factories(factories)
        .with_strategies(strategies)
        .with_id_provider(Arc::new(SequentialIdProvider::default()));
        let handle = scheduler
            .start(config, listeners)
            .await
            .expect("job should start");
        Node { store, handle, job }
    }

    pub fn session(&self) -> SessionId {
        self.store.session_id()
    }
}

/// Rejects the next reshard commit once armed, as a store would when the
/// leader check inside the transaction fails
pub struct RejectReshardOnce {
    inner: Arc<dyn CoordinationStore>,
    armed: AtomicBool,
    pub rejected: AtomicUsize,
}

impl RejectReshardOnce {
    pub fn new(inner: Arc<dyn CoordinationStore>) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(false),
            rejected: AtomicUsize::new(0),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CoordinationStore for RejectReshardOnce {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn is_existed(&self, key: &str) -> StoreResult<bool> {
        self.inner.is_existed(key).await
    }

    async fn persist(&self, key: &str, value: &str) -> StoreResult<()> {
        self.inner.persist(key, value).await
    }

    async fn persist_ephemeral(&self, key: &str, value: &str) -> StoreResult<()> {
        self.inner.persist_ephemeral(key, value).await
    }

    async fn update(&self, key: &str, value: &str) -> StoreResult<bool> {
        self.inner.update(key, value).await
    }

    async fn create(&self, key: &str, value: &str) -> StoreResult<bool> {
        self.inner.create(key, value).await
    }

    async fn create_ephemeral(&self, key: &str, value: &str) -> StoreResult<bool> {
        self.inner.create_ephemeral(key, value).await
    }

    async fn persist_sequential(&self, prefix: &str, value: &str) -> StoreResult<String> {
        self.inner.persist_sequential(prefix, value).await
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.inner.remove(key).await
    }

    async fn get_children_keys(&self, key: &str) -> StoreResult<Vec<String>> {
        self.inner.get_children_keys(key).await
    }

    async fn watch(&self, key: &str) -> StoreResult<WatchStream> {
        self.inner.watch(key).await
    }

    async fn commit(&self, transaction: StoreTransaction) -> StoreResult<bool> {
        let is_reshard = transaction.ops().iter().any(
            |op| matches!(op, TransactionOp::Delete(key) if key.ends_with("/leader/sharding/necessary")),
        );
        if is_reshard && self.armed.swap(false, Ordering::SeqCst) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Ok(false);
        }
        self.inner.commit(transaction).await
    }
}

/// Start `count` instances on distinct hosts; the first one leads
pub async fn start_cluster(
    server: &MemoryCoordinationServer,
    config: &JobConfiguration,
    count: usize,
    listeners: JobListeners,
) -> Vec<Node> {
    let mut nodes = Vec::new();
    for n in 0..count {
        let host = format!("10.0.0.{}", n + 1);
        nodes.push(Node::start(server, &host, "1", config.clone(), listeners.clone()).await);
    }
    tokio::time::sleep(EVENT_SETTLE).await;
    nodes
}

/// Item owners as written by the last reshard
pub async fn assignment(
    store: &dyn CoordinationStore,
    job_name: &str,
    total: u32,
) -> BTreeMap<u32, Option<String>> {
    let path = JobNodePath::new(job_name);
    let mut owners = BTreeMap::new();
    for item in 0..total {
        owners.insert(item, store.get(&path.item_instance(item)).await.unwrap());
    }
    owners
}

/// Poll `check` until it holds or `within` elapses
pub async fn eventually<F, Fut>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
