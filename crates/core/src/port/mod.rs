// Port Layer - Interfaces for external dependencies

pub mod coordination_store;
pub mod host_identity;
pub mod id_provider; // For deterministic testing
pub mod script_executor;
pub mod time_provider;
pub mod transaction;

// Re-exports
pub use coordination_store::{CoordinationStore, StoreEvent, StoreEventKind, WatchStream};
pub use host_identity::HostIdentity;
pub use id_provider::IdProvider;
pub use script_executor::{ExecutionError, ExecutionResult, ExecutionStatus, ScriptExecutor};
pub use time_provider::TimeProvider;
pub use transaction::{StoreTransaction, TransactionOp};
