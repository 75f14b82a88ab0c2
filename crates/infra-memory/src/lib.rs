// Shardline Infrastructure - In-Memory Coordination Store
// Implements: CoordinationStore (sessions, ephemeral nodes, sequential
// names, prefix watches, atomic transactions)

mod server;
mod store;
mod tree;

pub use server::{MemoryCoordinationServer, SessionId};
pub use store::MemoryCoordinationStore;
