// Domain Layer - Pure coordination model and value types

pub mod config;
pub mod error;
pub mod instance;
pub mod node_path;
pub mod queue;
pub mod server;
pub mod sharding;
pub mod task;

// Re-exports
pub use config::{JobConfiguration, JobType};
pub use error::DomainError;
pub use instance::{JobInstance, JobInstanceId};
pub use node_path::{JobNodePath, StateNodePath};
pub use queue::QueueEntry;
pub use server::{InstanceMark, ServerStatus};
pub use sharding::{Assignment, ShardingContext, ShardingContexts};
pub use task::{ExecutionType, RunningRecord, TaskContext};

/// Delimiter shared by every composite identifier stored in the tree
pub const DELIMITER: &str = "@-@";
