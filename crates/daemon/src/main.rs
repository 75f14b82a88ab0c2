//! Shardline daemon - Main Entry Point
//!
//! Runs the configured jobs on one or more simulated instances sharing an
//! in-process coordination store.

mod jobs;
mod logging;
mod settings;
mod trigger;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use shardline_core::application::worker::constants::SHUTDOWN_GRACE_PERIOD;
use shardline_core::application::{
    shutdown_channel, AdminService, JobFactoryRegistry, JobListeners, JobRegistry, JobScheduler,
    MisfiredService, ReadyService, RunningService,
};
use shardline_core::port::host_identity::FixedIdentity;
use shardline_core::port::time_provider::SystemTimeProvider;
use shardline_core::port::{CoordinationStore, HostIdentity, ScriptExecutor, TimeProvider};
use shardline_infra_memory::MemoryCoordinationServer;
use shardline_infra_system::{SubprocessScriptExecutor, SysinfoHostIdentity};

use settings::DaemonConfig;
use trigger::TriggerSource;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Logging first so configuration errors are visible
    let _log_guard = logging::init_logging()?;
    info!("Shardline v{} starting...", shardline_core::VERSION);

    // 2. Load configuration
    let config = DaemonConfig::load()?;
    info!(
        instances = config.instances,
        jobs = config.jobs.len(),
        cycle_interval_secs = config.cycle_interval_secs,
        "Configuration loaded"
    );

    // 3. Shared adapters
    let server = MemoryCoordinationServer::new();
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let host = SysinfoHostIdentity::new(config.host.clone());
    let mut script_executor =
        SubprocessScriptExecutor::new(time_provider.clone(), config.script_env_allowlist.clone());
    if config.script_timeout_secs > 0 {
        script_executor = script_executor.with_timeout(Duration::from_secs(config.script_timeout_secs));
    }
    let script_executor: Arc<dyn ScriptExecutor> = Arc::new(script_executor);

    // 4. One session, registry and scheduler per instance
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let mut handles = Vec::new();
    let mut trigger_tasks = Vec::new();
    for n in 0..config.instances {
        let store: Arc<dyn CoordinationStore> = Arc::new(server.connect());
        let process = if config.instances == 1 {
            host.process()
        } else {
            format!("{}-{}", host.process(), n)
        };
        let identity = Arc::new(FixedIdentity::new(host.host(), process));
        let registry = Arc::new(JobRegistry::new());

        let mut factories = JobFactoryRegistry::new().with_script_executor(script_executor.clone());
        jobs::register_builtin_jobs(&mut factories);
        let scheduler = JobScheduler::new(store.clone(), identity, registry.clone())
            .with_factories(factories)
            .with_time_provider(time_provider.clone());

        let mut local = Vec::new();
        for job in &config.jobs {
            match scheduler.start(job.clone(), JobListeners::new()).await {
                Ok(handle) => local.push(handle),
                // Fatal for this job only
                Err(e) => error!(job = %job.job_name, error = %e, "Job failed to start"),
            }
        }
        info!(instance = n, jobs = ?registry.job_names(), "Instance jobs registered");

        let running = Arc::new(RunningService::new(store.clone(), time_provider.clone()));
        let trigger = TriggerSource::new(
            local.clone(),
            running.clone(),
            ReadyService::new(store.clone(), running.clone())
                .with_max_depth(config.ready_queue_max_depth),
            MisfiredService::new(store.clone(), running),
            AdminService::new(store),
            Duration::from_secs(config.cycle_interval_secs),
        );
        trigger_tasks.push(tokio::spawn(trigger.run(shutdown_rx.clone())));
        handles.extend(local);
    }

    info!(started = handles.len(), "System ready");
    info!("Press Ctrl+C to shutdown");

    // 5. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 6. Graceful shutdown
    shutdown_tx.shutdown();
    for handle in &handles {
        if let Err(e) = handle.shutdown().await {
            warn!(job = %handle.job_name(), instance = %handle.instance_id(), error = %e, "Job shutdown incomplete");
        }
    }
    for task in trigger_tasks {
        let _ = tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, task).await;
    }

    info!("Shutdown complete.");
    Ok(())
}
