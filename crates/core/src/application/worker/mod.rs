// Worker - per-job cycle loop

pub mod constants;
mod panic_guard;
mod shutdown;

pub use panic_guard::{spawn_guarded, PanicGuardResult};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::executor::{CycleReport, JobExecutor};
use crate::error::{AppError, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

/// Requests handled by a job's cycle worker
pub enum JobCommand {
    RunCycle {
        reply: Option<oneshot::Sender<Result<CycleReport>>>,
    },
}

/// Cheap handle for asking a job's worker to act and for stopping it
#[derive(Clone)]
pub struct JobControl {
    job_name: String,
    commands: mpsc::UnboundedSender<JobCommand>,
    shutdown: ShutdownSender,
}

impl JobControl {
    pub fn new(
        job_name: impl Into<String>,
        commands: mpsc::UnboundedSender<JobCommand>,
        shutdown: ShutdownSender,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            commands,
            shutdown,
        }
    }

    /// Queue a cycle without waiting for it
    pub fn trigger(&self) {
        if self
            .commands
            .send(JobCommand::RunCycle { reply: None })
            .is_err()
        {
            info!(job = %self.job_name, "Trigger ignored, worker stopped");
        }
    }

    /// Queue a cycle and wait for its report
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(JobCommand::RunCycle { reply: Some(tx) })
            .map_err(|_| AppError::Shutdown(self.job_name.clone()))?;
        rx.await
            .map_err(|_| AppError::Shutdown(self.job_name.clone()))?
    }

    pub fn stop(&self) {
        self.shutdown.shutdown();
    }

    pub fn token(&self) -> ShutdownToken {
        self.shutdown.token()
    }
}

/// Runs cycles one at a time as commands arrive
pub struct CycleWorker {
    job_name: String,
    executor: Arc<JobExecutor>,
    commands: mpsc::UnboundedReceiver<JobCommand>,
}

impl CycleWorker {
    pub fn new(
        job_name: impl Into<String>,
        executor: Arc<JobExecutor>,
        commands: mpsc::UnboundedReceiver<JobCommand>,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            executor,
            commands,
        }
    }

    /// Run worker loop with graceful shutdown support
    pub async fn run(mut self, mut shutdown: ShutdownToken) {
        info!(job = %self.job_name, "Cycle worker started");
        loop {
            if shutdown.is_shutdown() {
                info!(job = %self.job_name, "Cycle worker shutting down");
                break;
            }
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(JobCommand::RunCycle { reply }) => {
                        let result = self.executor.execute_cycle().await;
                        if let Err(e) = &result {
                            error!(job = %self.job_name, error = %e, "Cycle failed");
                        }
                        if let Some(reply) = reply {
                            let _ = reply.send(result);
                        }
                    }
                    None => break,
                },
                _ = shutdown.wait() => {
                    info!(job = %self.job_name, "Cycle worker interrupted while idle");
                    break;
                }
            }
        }
        info!(job = %self.job_name, "Cycle worker stopped");
    }
}
