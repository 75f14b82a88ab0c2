// Coordination Store Port (Interface)
//
// Key-value tree with ephemeral nodes bound to the client session,
// sequential names and change notifications. Every call may block on the
// network; implementations report timeouts as `AppError::StoreUnavailable`.

use crate::error::Result;
use crate::port::transaction::StoreTransaction;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// What happened to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEventKind {
    Created,
    Updated,
    Removed,
}

/// Change notification for a watched key or one of its descendants
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub kind: StoreEventKind,
    pub key: String,
    /// New value, or for `Removed` the last value the node held
    pub value: Option<String>,
}

impl StoreEvent {
    pub fn is_removed(&self, key: &str) -> bool {
        self.kind == StoreEventKind::Removed && self.key == key
    }
}

/// Receiving end of a watch. Delivery is at-least-once while connected and
/// may skip events across a reconnect.
pub type WatchStream = mpsc::UnboundedReceiver<StoreEvent>;

/// Coordination store client bound to one session
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Read a node value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Check node existence
    async fn is_existed(&self, key: &str) -> Result<bool>;

    /// Create or update a persistent node (parents created as needed)
    async fn persist(&self, key: &str, value: &str) -> Result<()>;

    /// Create or replace an ephemeral node owned by this session
    async fn persist_ephemeral(&self, key: &str, value: &str) -> Result<()>;

    /// Overwrite the value of an existing node, keeping its kind; `false` if absent
    async fn update(&self, key: &str, value: &str) -> Result<bool>;

    /// Create a persistent node only if absent; `false` if it already exists
    async fn create(&self, key: &str, value: &str) -> Result<bool>;

    /// Create an ephemeral node only if absent; `false` if it already exists
    async fn create_ephemeral(&self, key: &str, value: &str) -> Result<bool>;

    /// Create a persistent node named `prefix` + monotonically increasing
    /// zero-padded sequence; returns the full key
    async fn persist_sequential(&self, prefix: &str, value: &str) -> Result<String>;

    /// Remove a node and all its descendants; absent nodes are not an error
    async fn remove(&self, key: &str) -> Result<()>;

    /// Child node names, sorted ascending
    async fn get_children_keys(&self, key: &str) -> Result<Vec<String>>;

    /// Subscribe to changes of `key` and its descendants
    async fn watch(&self, key: &str) -> Result<WatchStream>;

    /// Apply a batch of operations atomically. `Ok(false)` means a check
    /// failed and nothing was applied.
    async fn commit(&self, transaction: StoreTransaction) -> Result<bool>;
}
