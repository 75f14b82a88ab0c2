// Job Executor - one cycle of a job on this instance
//
// should_run -> sharding_if_necessary -> plan (FAILOVER before READY)
// -> misfire check -> start barrier over every planned item
// -> per dispatch: running markers, items on the worker pool, completion
// -> completion barrier -> misfired reruns -> failover claims left over

use crate::application::config::ConfigurationService;
use crate::application::failover::FailoverService;
use crate::application::guarantee::{BarrierPhase, GuaranteeService};
use crate::application::job::JobBody;
use crate::application::listener::{DispatchReport, ItemOutcome, JobListeners};
use crate::application::registry::JobRegistry;
use crate::application::running::RunningService;
use crate::application::server::ServerService;
use crate::application::sharding::ShardingService;
use crate::application::worker::constants::DEFAULT_POOL_SIZE_PER_CPU;
use crate::application::worker::{spawn_guarded, PanicGuardResult, ShutdownToken};
use crate::domain::sharding::parse_item_parameters;
use crate::domain::{ExecutionType, JobConfiguration, JobInstance, ShardingContexts, TaskContext};
use crate::error::Result;
use crate::port::IdProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Everything one cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// `should_run` said no; nothing was attempted
    pub skipped: bool,
    pub dispatches: Vec<DispatchReport>,
}

impl CycleReport {
    /// (execution type, item) of every executed item, in dispatch order
    pub fn executed(&self) -> Vec<(ExecutionType, u32)> {
        self.dispatches
            .iter()
            .flat_map(|d| d.outcomes.iter().map(move |(item, _)| (d.execution_type, *item)))
            .collect()
    }
}

/// Default pool size: CPU count times two
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * DEFAULT_POOL_SIZE_PER_CPU
}

/// Services an executor needs, grouped to keep construction readable
pub struct ExecutorServices {
    pub configs: Arc<ConfigurationService>,
    pub servers: Arc<ServerService>,
    pub sharding: Arc<ShardingService>,
    pub running: Arc<RunningService>,
    pub failover: Arc<FailoverService>,
    pub guarantee: Arc<GuaranteeService>,
    pub registry: Arc<JobRegistry>,
    pub id_provider: Arc<dyn IdProvider>,
}

pub struct JobExecutor {
    job_name: String,
    instance: JobInstance,
    body: JobBody,
    listeners: JobListeners,
    services: ExecutorServices,
    pool: Arc<Semaphore>,
    shutdown: ShutdownToken,
}

impl JobExecutor {
    pub fn new(
        config: &JobConfiguration,
        instance: JobInstance,
        body: JobBody,
        listeners: JobListeners,
        services: ExecutorServices,
        shutdown: ShutdownToken,
    ) -> Self {
        let pool_size = config.worker_pool_size.unwrap_or_else(default_pool_size);
        debug!(job = %config.job_name, pool_size, "Worker pool sized");
        Self {
            job_name: config.job_name.clone(),
            instance,
            body,
            listeners,
            services,
            pool: Arc::new(Semaphore::new(pool_size)),
            shutdown,
        }
    }

    /// Gate asked by the trigger source before each cycle
    pub async fn should_run(&self) -> Result<bool> {
        let s = &self.services;
        if s.registry.is_shutdown(&self.job_name) {
            return Ok(false);
        }
        let config = s.configs.load().await?;
        if config.disabled {
            return Ok(false);
        }
        if !s.servers.is_enable_server(self.instance.server_ip()).await? {
            return Ok(false);
        }
        if s.registry.is_job_running(&self.job_name) && !config.misfire {
            return Ok(false);
        }
        Ok(true)
    }

    pub async fn execute_cycle(&self) -> Result<CycleReport> {
        let s = &self.services;
        let job = self.job_name.as_str();
        let mut report = CycleReport::default();

        if !self.should_run().await? {
            debug!(job = %job, "Cycle skipped");
            report.skipped = true;
            return Ok(report);
        }

        s.sharding.sharding_if_necessary().await?;
        let config = s.configs.load().await?;

        let mut plan = Vec::new();
        for contexts in self.plan(&config).await? {
            if contexts.execution_type() == ExecutionType::Ready
                && config.misfire
                && s.running.misfire_if_running(job, contexts.items()).await?
            {
                let mut skipped = DispatchReport::new(ExecutionType::Ready);
                skipped.skipped = contexts.items().to_vec();
                report.dispatches.push(skipped);
                continue;
            }
            plan.push(contexts);
        }

        // Planned FAILOVER and READY items share one set per cycle
        let barrier = self.barrier_contexts(&plan);
        let barrier_timeout = Duration::from_millis(config.barrier_timeout_ms);
        if let Some(contexts) = &barrier {
            s.guarantee
                .await_barrier(BarrierPhase::Started, contexts.items(), barrier_timeout, || {
                    self.listeners.before_first_shard(contexts)
                })
                .await?;
        }

        let mut still_owned = Vec::new();
        for contexts in plan {
            let dispatch = self.dispatch(contexts).await?;
            still_owned.extend(
                dispatch
                    .executed_items()
                    .into_iter()
                    .filter(|item| !dispatch.lost.contains(item)),
            );
            report.dispatches.push(dispatch);
        }

        if let Some(mut contexts) = barrier {
            if !still_owned.is_empty() {
                still_owned.sort_unstable();
                contexts.retain_items(&still_owned);
                s.guarantee
                    .await_barrier(BarrierPhase::Completed, &still_owned, barrier_timeout, || {
                        self.listeners.after_last_shard(&contexts)
                    })
                    .await?;
            }
        }

        if config.misfire {
            loop {
                let local = s.sharding.get_local_sharding_items().await?;
                let misfired = s.running.misfired_items(job, &local).await?;
                if misfired.is_empty() {
                    break;
                }
                s.running.clear_misfire(job, &misfired).await?;
                info!(job = %job, items = ?misfired, "Re-running misfired items");
                let contexts = self.contexts(&config, ExecutionType::Misfired, misfired)?;
                report.dispatches.push(self.dispatch(contexts).await?);
            }
        }

        while let Some(item) = s.failover.failover_if_necessary().await? {
            let contexts = self.contexts(&config, ExecutionType::Failover, vec![item])?;
            report.dispatches.push(self.dispatch(contexts).await?);
        }

        Ok(report)
    }

    /// Dispatches for this cycle: claimed failover items first, then the
    /// locally owned items nobody took over
    pub async fn plan(&self, config: &JobConfiguration) -> Result<Vec<ShardingContexts>> {
        let s = &self.services;
        let mut plan = Vec::new();

        let failover_items = s.failover.get_local_failover_items().await?;
        if !failover_items.is_empty() {
            plan.push(self.contexts(config, ExecutionType::Failover, failover_items.clone())?);
        }

        let mut ready = s.sharding.get_local_sharding_items().await?;
        let taken_off = s.failover.get_local_take_off_items(&ready).await?;
        ready.retain(|item| !taken_off.contains(item) && !failover_items.contains(item));
        if !ready.is_empty() {
            plan.push(self.contexts(config, ExecutionType::Ready, ready)?);
        }
        Ok(plan)
    }

    /// Contexts handed to the distribute-once callbacks: every item of the
    /// plan, typed after its READY dispatch when there is one
    fn barrier_contexts(&self, plan: &[ShardingContexts]) -> Option<ShardingContexts> {
        if self.listeners.distribute_once.is_empty() {
            return None;
        }
        let mut items: Vec<u32> = plan.iter().flat_map(|c| c.items().to_vec()).collect();
        if items.is_empty() {
            return None;
        }
        items.sort_unstable();
        items.dedup();
        let mut contexts = plan
            .iter()
            .find(|c| c.execution_type() == ExecutionType::Ready)
            .or_else(|| plan.first())?
            .clone();
        contexts.task.sharding_items = items;
        Some(contexts)
    }

    fn contexts(
        &self,
        config: &JobConfiguration,
        execution_type: ExecutionType,
        items: Vec<u32>,
    ) -> Result<ShardingContexts> {
        let task = TaskContext::new(
            &self.job_name,
            items,
            execution_type,
            self.instance.id.clone(),
            self.services.id_provider.generate_id(),
        );
        Ok(ShardingContexts::new(
            task,
            config.total(),
            config.job_parameter.clone(),
            parse_item_parameters(&config.sharding_item_parameters)?,
        ))
    }

    async fn dispatch(&self, mut contexts: ShardingContexts) -> Result<DispatchReport> {
        let s = &self.services;
        let job = self.job_name.as_str();
        let execution_type = contexts.execution_type();
        let items = contexts.items().to_vec();
        let task_id = contexts.task.id();
        let mut report = DispatchReport::new(execution_type);

        let mut claimed = Vec::new();
        for item in &items {
            match s.running.try_start(job, *item, &contexts.task).await {
                Ok(true) => claimed.push(*item),
                Ok(false) => report.skipped.push(*item),
                Err(e) => {
                    self.release(&claimed, &task_id).await;
                    return Err(e);
                }
            }
        }
        contexts.retain_items(&claimed);

        if !claimed.is_empty() {
            self.listeners.before_job_executed(&contexts).await;
            s.registry.set_job_running(job, true);
            report.outcomes = self.run_items(&contexts).await;
            s.registry.set_job_running(job, false);
        }

        for item in &claimed {
            match s.running.complete(job, *item, &task_id).await {
                Ok(true) => {}
                Ok(false) => report.lost.push(*item),
                Err(e) => {
                    error!(job = %job, item, error = %e, "Failed to complete running marker");
                    report.lost.push(*item);
                }
            }
        }

        if execution_type == ExecutionType::Failover {
            s.failover.update_failover_complete(&items).await?;
        }
        if !claimed.is_empty() {
            self.listeners.after_job_executed(&contexts, &report).await;
        }

        info!(
            job = %job,
            execution_type = %execution_type,
            executed = ?report.executed_items(),
            failed = report.outcomes.iter().filter(|(_, o)| !o.is_success()).count(),
            skipped = ?report.skipped,
            lost = ?report.lost,
            "Dispatch finished"
        );
        Ok(report)
    }

    /// Run every item of `contexts` on the pool, one task per item
    async fn run_items(&self, contexts: &ShardingContexts) -> Vec<(u32, ItemOutcome)> {
        let mut outcomes = Vec::new();
        let mut tasks = JoinSet::new();
        for item in contexts.items() {
            let item = *item;
            let permit = match self.pool.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    outcomes.push((item, ItemOutcome::Failed("worker pool closed".to_string())));
                    continue;
                }
            };
            let body = self.body.clone();
            let context = contexts.context_for(item);
            let shutdown = self.shutdown.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = match spawn_guarded(async move { body.run(&context, &shutdown).await }).await {
                    PanicGuardResult::Success(Ok(())) => ItemOutcome::Succeeded,
                    PanicGuardResult::Success(Err(e)) => ItemOutcome::Failed(e.to_string()),
                    PanicGuardResult::Panicked(msg) => ItemOutcome::Panicked(msg),
                    PanicGuardResult::Cancelled => ItemOutcome::Failed("cancelled".to_string()),
                };
                (item, outcome)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((item, outcome)) => {
                    match &outcome {
                        ItemOutcome::Succeeded => debug!(job = %self.job_name, item, "Item succeeded"),
                        ItemOutcome::Failed(e) => {
                            warn!(job = %self.job_name, item, error = %e, "Item failed")
                        }
                        ItemOutcome::Panicked(msg) => {
                            error!(job = %self.job_name, item, panic_msg = %msg, "Item panicked")
                        }
                    }
                    outcomes.push((item, outcome));
                }
                Err(e) => error!(job = %self.job_name, error = %e, "Item task failed to join"),
            }
        }
        outcomes.sort_by_key(|(item, _)| *item);
        outcomes
    }

    async fn release(&self, items: &[u32], task_id: &str) {
        for item in items {
            if let Err(e) = self.services.running.complete(&self.job_name, *item, task_id).await {
                warn!(job = %self.job_name, item, error = %e, "Failed to release running marker");
            }
        }
    }
}
