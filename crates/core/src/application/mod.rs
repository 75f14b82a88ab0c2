// Application Layer - Coordination services and per-job runtime

pub mod admin;
pub mod config;
pub mod dispatcher;
pub mod election;
pub mod executor;
pub mod failover;
pub mod guarantee;
pub mod instance;
pub mod job;
pub mod latch;
pub mod listener;
pub mod queue;
pub mod reconcile;
pub mod registry;
pub mod running;
pub mod scheduler;
pub mod server;
pub mod sharding;
pub mod worker;

// Re-exports
pub use admin::{AdminService, InstanceScope};
pub use election::{LeaderElectionService, LeadershipState};
pub use executor::{CycleReport, JobExecutor};
pub use job::{DataflowJob, JobBody, JobFactoryRegistry, SimpleJob};
pub use latch::execute_in_leader;
pub use listener::{DispatchReport, DistributeOnceJobListener, ItemOutcome, JobListener, JobListeners};
pub use queue::{JobContext, MisfiredService, ReadyService};
pub use registry::JobRegistry;
pub use running::RunningService;
pub use scheduler::{JobHandle, JobScheduler};
pub use sharding::{JobShardingStrategy, ShardingService, ShardingStrategyRegistry};
pub use worker::{shutdown_channel, ShutdownSender, ShutdownToken};
