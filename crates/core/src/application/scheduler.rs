//! Job Scheduler - brings a job instance up and owns its loops
//!
//! `start` wires the per-job services, publishes this instance, runs the
//! first election and spawns three tasks: the event dispatcher, the cycle
//! worker and the reconcile worker. The returned `JobHandle` is what a
//! trigger source talks to.

use crate::application::config::ConfigurationService;
use crate::application::dispatcher::EventDispatcher;
use crate::application::election::LeaderElectionService;
use crate::application::executor::{CycleReport, ExecutorServices, JobExecutor};
use crate::application::failover::FailoverService;
use crate::application::guarantee::GuaranteeService;
use crate::application::instance::InstanceService;
use crate::application::job::JobFactoryRegistry;
use crate::application::listener::JobListeners;
use crate::application::reconcile::ReconcileService;
use crate::application::registry::JobRegistry;
use crate::application::running::RunningService;
use crate::application::server::ServerService;
use crate::application::sharding::{ShardingService, ShardingStrategyRegistry};
use crate::application::worker::constants::SHUTDOWN_GRACE_PERIOD;
use crate::application::worker::{shutdown_channel, CycleWorker, JobControl};
use crate::domain::{JobConfiguration, JobInstance, JobInstanceId, JobNodePath};
use crate::error::{AppError, Result};
use crate::port::id_provider::UuidProvider;
use crate::port::time_provider::SystemTimeProvider;
use crate::port::{CoordinationStore, HostIdentity, IdProvider, TimeProvider};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Starts job instances of this process against one coordination store
pub struct JobScheduler {
    store: Arc<dyn CoordinationStore>,
    identity: Arc<dyn HostIdentity>,
    registry: Arc<JobRegistry>,
    strategies: Arc<ShardingStrategyRegistry>,
    factories: Arc<JobFactoryRegistry>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl JobScheduler {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        identity: Arc<dyn HostIdentity>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        Self {
            store,
            identity,
            registry,
            strategies: Arc::new(ShardingStrategyRegistry::with_builtins()),
            factories: Arc::new(JobFactoryRegistry::new()),
            id_provider: Arc::new(UuidProvider),
            time_provider: Arc::new(SystemTimeProvider),
        }
    }

    pub fn with_factories(mut self, factories: JobFactoryRegistry) -> Self {
        self.factories = Arc::new(factories);
        self
    }

    pub fn with_strategies(mut self, strategies: ShardingStrategyRegistry) -> Self {
        self.strategies = Arc::new(strategies);
        self
    }

    pub fn with_id_provider(mut self, id_provider: Arc<dyn IdProvider>) -> Self {
        self.id_provider = id_provider;
        self
    }

    pub fn with_time_provider(mut self, time_provider: Arc<dyn TimeProvider>) -> Self {
        self.time_provider = time_provider;
        self
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Bring up one job on this instance.
    ///
    /// Configuration problems fail with `AppError::Config` before anything
    /// is written for the job; other jobs are unaffected.
    pub async fn start(&self, config: JobConfiguration, listeners: JobListeners) -> Result<JobHandle> {
        let job = config.job_name.clone();
        config
            .validate()
            .map_err(|e| AppError::Config(format!("job '{}': {}", job, e)))?;
        self.strategies.resolve(&config.sharding_strategy)?;
        self.factories.resolve(&config)?;

        if !self.registry.is_shutdown(&job) {
            return Err(AppError::InvalidState(format!(
                "job '{}' is already running on this instance",
                job
            )));
        }

        let store = self.store.clone();
        let configs = Arc::new(ConfigurationService::new(store.clone(), &job));
        let config = configs.persist(&config).await?;
        // The stored configuration wins unless overwrite was asked for
        config
            .validate()
            .map_err(|e| AppError::Config(format!("job '{}': {}", job, e)))?;
        self.strategies.resolve(&config.sharding_strategy)?;
        let body = self.factories.resolve(&config)?;

        let instance = JobInstance::from_identity(self.identity.as_ref());
        self.registry.register(&job, instance.clone(), config.total());

        let servers = Arc::new(ServerService::new(store.clone(), &job));
        let instances = Arc::new(InstanceService::new(store.clone(), &job, instance.clone()));
        let running = Arc::new(RunningService::new(store.clone(), self.time_provider.clone()));
        let election = Arc::new(LeaderElectionService::new(
            store.clone(),
            &job,
            instance.clone(),
            servers.clone(),
            self.registry.clone(),
        ));
        let sharding = Arc::new(ShardingService::new(
            store.clone(),
            &job,
            instance.clone(),
            instances.clone(),
            election.clone(),
            configs.clone(),
            running.clone(),
            self.strategies.clone(),
            self.registry.clone(),
        ));
        let failover = Arc::new(FailoverService::new(
            store.clone(),
            &job,
            instance.clone(),
            configs.clone(),
            running.clone(),
            self.registry.clone(),
        ));
        let guarantee = Arc::new(GuaranteeService::new(
            store.clone(),
            &job,
            instance.clone(),
            configs.clone(),
        ));

        // Subscribe before publishing so no change after this point is missed
        let events = match store.watch(&JobNodePath::new(&job).root()).await {
            Ok(events) => events,
            Err(e) => {
                self.registry.mark_shutdown(&job);
                return Err(e);
            }
        };
        let published = async {
            servers
                .persist_online(instance.server_ip(), !config.disabled)
                .await?;
            instances.persist_online().await?;
            sharding.set_resharding_flag().await
        }
        .await;
        if let Err(e) = published {
            self.registry.mark_shutdown(&job);
            return Err(e);
        }
        if let Err(e) = election.elect_leader().await {
            // A later reshard or marker removal retries the election
            warn!(job = %job, error = %e, "Initial election failed");
        }

        let (shutdown_tx, shutdown_rx) = shutdown_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let control = JobControl::new(&job, commands_tx, shutdown_tx);

        let executor = Arc::new(JobExecutor::new(
            &config,
            instance.clone(),
            body,
            listeners,
            ExecutorServices {
                configs: configs.clone(),
                servers: servers.clone(),
                sharding: sharding.clone(),
                running: running.clone(),
                failover: failover.clone(),
                guarantee,
                registry: self.registry.clone(),
                id_provider: self.id_provider.clone(),
            },
            shutdown_rx.clone(),
        ));

        let dispatcher = EventDispatcher::new(
            &job,
            instance.clone(),
            self.registry.clone(),
            instances.clone(),
            election.clone(),
            sharding.clone(),
            failover,
            control.clone(),
        );
        let reconcile = ReconcileService::new(
            &job,
            election.clone(),
            sharding,
            config.reconcile_interval_secs,
        );
        let worker = CycleWorker::new(&job, executor.clone(), commands_rx);

        let tasks = vec![
            tokio::spawn(dispatcher.run(events, shutdown_rx.clone())),
            tokio::spawn(reconcile.run(shutdown_rx.clone())),
        ];
        let worker_task = tokio::spawn(worker.run(shutdown_rx));

        let handle = JobHandle {
            inner: Arc::new(JobRuntime {
                job_name: job.clone(),
                instance,
                registry: self.registry.clone(),
                running,
                election,
                instances,
                executor,
                control,
                tasks: Mutex::new(tasks),
                worker_task: Mutex::new(Some(worker_task)),
            }),
        };
        info!(job = %job, instance = %handle.instance_id(), total = config.total(), "Job started");
        Ok(handle)
    }
}

struct JobRuntime {
    job_name: String,
    instance: JobInstance,
    registry: Arc<JobRegistry>,
    running: Arc<RunningService>,
    election: Arc<LeaderElectionService>,
    instances: Arc<InstanceService>,
    executor: Arc<JobExecutor>,
    control: JobControl,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    worker_task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a started job instance; clones share the same runtime
#[derive(Clone)]
pub struct JobHandle {
    inner: Arc<JobRuntime>,
}

impl JobHandle {
    pub fn job_name(&self) -> &str {
        &self.inner.job_name
    }

    pub fn instance_id(&self) -> &JobInstanceId {
        &self.inner.instance.id
    }

    /// Run one cycle now and wait for it
    pub async fn dispatch_cycle(&self) -> Result<CycleReport> {
        if self.inner.registry.is_shutdown(&self.inner.job_name) {
            return Err(AppError::Shutdown(self.inner.job_name.clone()));
        }
        self.inner.control.run_cycle().await
    }

    /// Queue a cycle without waiting
    pub fn trigger(&self) {
        self.inner.control.trigger();
    }

    /// Asked by the trigger source before firing
    pub async fn should_run(&self) -> Result<bool> {
        self.inner.executor.should_run().await
    }

    pub async fn is_leader(&self) -> Result<bool> {
        self.inner.election.is_leader().await
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.registry.is_shutdown(&self.inner.job_name)
    }

    /// Best-effort local shutdown. Session expiry covers whatever fails here.
    pub async fn shutdown(&self) -> Result<()> {
        let rt = &self.inner;
        let job = rt.job_name.as_str();
        let first = rt.registry.mark_shutdown(job);
        rt.control.stop();

        let worker = rt
            .worker_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(worker) = worker {
            if tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, worker).await.is_err() {
                warn!(job = %job, "Cycle still running after grace period, leaving it behind");
            }
        }
        let tasks: Vec<JoinHandle<()>> = rt
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }

        if !first {
            return Ok(());
        }

        let mut failed = None;
        match rt
            .running
            .clear_running_of_instance(job, rt.instance.id.as_str())
            .await
        {
            Ok(cleared) if cleared > 0 => info!(job = %job, cleared, "Running markers released"),
            Ok(_) => {}
            Err(e) => {
                error!(job = %job, error = %e, "Failed to release running markers");
                failed = Some(e);
            }
        }
        if let Err(e) = rt.election.remove_leader().await {
            error!(job = %job, error = %e, "Failed to release leadership");
            failed = Some(e);
        }
        if let Err(e) = rt.instances.remove_instance().await {
            error!(job = %job, error = %e, "Failed to remove instance node");
            failed = Some(e);
        }
        info!(job = %job, "Job shut down");
        match failed {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("job_name", &self.inner.job_name)
            .field("instance", &self.inner.instance.id)
            .finish()
    }
}
