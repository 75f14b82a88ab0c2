// In-memory CoordinationStore - one client session of a MemoryCoordinationServer

use crate::server::{MemoryCoordinationServer, SessionId};
use crate::tree::{validate_key, NodeTree};
use async_trait::async_trait;
use shardline_core::error::Result;
use shardline_core::port::{
    CoordinationStore, StoreEvent, StoreTransaction, TransactionOp, WatchStream,
};
use tracing::debug;

pub struct MemoryCoordinationStore {
    server: MemoryCoordinationServer,
    session: SessionId,
}

impl MemoryCoordinationStore {
    pub(crate) fn new(server: MemoryCoordinationServer, session: SessionId) -> Self {
        Self { server, session }
    }

    pub fn session_id(&self) -> SessionId {
        self.session
    }

    pub fn server(&self) -> &MemoryCoordinationServer {
        &self.server
    }

    fn run<T>(
        &self,
        key: &str,
        op: impl FnOnce(&mut NodeTree, &mut Vec<StoreEvent>) -> Result<T>,
    ) -> Result<T> {
        validate_key(key)?;
        self.server.with_session(self.session, op)
    }
}

/// All checks pass and no `Create` targets an existing node
fn preconditions_hold(tree: &NodeTree, ops: &[TransactionOp]) -> bool {
    ops.iter().all(|op| match op {
        TransactionOp::CheckExists(key) => tree.contains(key),
        TransactionOp::CheckValue { key, value } => {
            tree.get(key).map(|n| &n.value == value).unwrap_or(false)
        }
        TransactionOp::Create { key, .. } => !tree.contains(key),
        TransactionOp::Put { .. } | TransactionOp::Delete(_) => true,
    })
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.run(key, |tree, _| Ok(tree.get(key).map(|n| n.value.clone())))
    }

    async fn is_existed(&self, key: &str) -> Result<bool> {
        self.run(key, |tree, _| Ok(tree.contains(key)))
    }

    async fn persist(&self, key: &str, value: &str) -> Result<()> {
        self.run(key, |tree, events| {
            tree.put(key, value, events);
            Ok(())
        })
    }

    async fn persist_ephemeral(&self, key: &str, value: &str) -> Result<()> {
        let session = self.session;
        self.run(key, |tree, events| {
            tree.remove_subtree(key, events);
            tree.insert(key, value, Some(session), events);
            Ok(())
        })
    }

    async fn update(&self, key: &str, value: &str) -> Result<bool> {
        self.run(key, |tree, events| Ok(tree.set_value(key, value, events)))
    }

    async fn create(&self, key: &str, value: &str) -> Result<bool> {
        self.run(key, |tree, events| {
            if tree.contains(key) {
                return Ok(false);
            }
            tree.insert(key, value, None, events);
            Ok(true)
        })
    }

    async fn create_ephemeral(&self, key: &str, value: &str) -> Result<bool> {
        let session = self.session;
        self.run(key, |tree, events| {
            if tree.contains(key) {
                return Ok(false);
            }
            tree.insert(key, value, Some(session), events);
            Ok(true)
        })
    }

    async fn persist_sequential(&self, prefix: &str, value: &str) -> Result<String> {
        self.run(prefix, |tree, events| {
            let key = tree.next_sequential_key(prefix);
            tree.insert(&key, value, None, events);
            Ok(key)
        })
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.run(key, |tree, events| {
            tree.remove_subtree(key, events);
            Ok(())
        })
    }

    async fn get_children_keys(&self, key: &str) -> Result<Vec<String>> {
        self.run(key, |tree, _| Ok(tree.children(key)))
    }

    async fn watch(&self, key: &str) -> Result<WatchStream> {
        validate_key(key)?;
        self.server.register_watch(self.session, key)
    }

    async fn commit(&self, transaction: StoreTransaction) -> Result<bool> {
        let ops = transaction.into_ops();
        for op in &ops {
            match op {
                TransactionOp::CheckExists(key) | TransactionOp::Delete(key) => validate_key(key)?,
                TransactionOp::CheckValue { key, .. }
                | TransactionOp::Create { key, .. }
                | TransactionOp::Put { key, .. } => validate_key(key)?,
            }
        }
        let session = self.session;
        self.server.with_session(session, |tree, events| {
            if !preconditions_hold(tree, &ops) {
                debug!(session, ops = ops.len(), "Transaction rejected");
                return Ok(false);
            }
            for op in &ops {
                match op {
                    TransactionOp::CheckExists(_) | TransactionOp::CheckValue { .. } => {}
                    TransactionOp::Create { key, value } | TransactionOp::Put { key, value } => {
                        tree.put(key, value, events)
                    }
                    TransactionOp::Delete(key) => {
                        tree.remove_subtree(key, events);
                    }
                }
            }
            Ok(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardline_core::port::StoreEventKind;
    use shardline_core::AppError;

    #[tokio::test]
    async fn test_ephemeral_nodes_vanish_with_session() {
        let server = MemoryCoordinationServer::new();
        let a = server.connect();
        let b = server.connect();
        let mut events = b.watch("/job").await.unwrap();

        assert!(a.create_ephemeral("/job/instances/a", "").await.unwrap());
        assert!(!b.create_ephemeral("/job/instances/a", "").await.unwrap());
        a.persist("/job/config", "{}").await.unwrap();

        server.expire_session(a.session_id());

        assert!(!b.is_existed("/job/instances/a").await.unwrap());
        assert!(b.is_existed("/job/config").await.unwrap());
        assert!(matches!(
            a.get("/job/config").await,
            Err(AppError::StoreUnavailable(_))
        ));

        let mut removed = None;
        while let Ok(event) = events.try_recv() {
            if event.kind == StoreEventKind::Removed {
                removed = Some(event);
            }
        }
        assert_eq!(
            removed.map(|e| e.key),
            Some("/job/instances/a".to_string())
        );
    }

    #[tokio::test]
    async fn test_watch_of_expired_session_closes() {
        let server = MemoryCoordinationServer::new();
        let a = server.connect();
        let mut events = a.watch("/job").await.unwrap();
        server.expire_session(a.session_id());
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_check_applies_nothing() {
        let server = MemoryCoordinationServer::new();
        let store = server.connect();
        store.persist("/job/sharding/0/running", "task-a").await.unwrap();

        let tx = StoreTransaction::new()
            .check_value("/job/sharding/0/running", "task-b")
            .put("/job/sharding/0/completed", "task-b")
            .delete("/job/sharding/0/running");
        assert!(!store.commit(tx).await.unwrap());
        assert_eq!(
            store.get("/job/sharding/0/running").await.unwrap().as_deref(),
            Some("task-a")
        );
        assert!(!store.is_existed("/job/sharding/0/completed").await.unwrap());

        let tx = StoreTransaction::new()
            .check_value("/job/sharding/0/running", "task-a")
            .put("/job/sharding/0/completed", "task-a")
            .delete("/job/sharding/0/running");
        assert!(store.commit(tx).await.unwrap());
        assert!(!store.is_existed("/job/sharding/0/running").await.unwrap());
    }

    #[tokio::test]
    async fn test_transaction_create_conflict_aborts() {
        let server = MemoryCoordinationServer::new();
        let store = server.connect();
        store.persist("/job/a", "1").await.unwrap();
        let tx = StoreTransaction::new().put("/job/b", "2").create("/job/a", "3");
        assert!(!store.commit(tx).await.unwrap());
        assert!(!store.is_existed("/job/b").await.unwrap());
    }

    #[tokio::test]
    async fn test_sequential_names_sort_in_creation_order() {
        let server = MemoryCoordinationServer::new();
        let store = server.connect();
        let first = store.persist_sequential("/state/ready/jobB@-@", "").await.unwrap();
        let second = store.persist_sequential("/state/ready/jobA@-@", "").await.unwrap();
        assert_eq!(first, "/state/ready/jobB@-@0000000000");
        assert_eq!(second, "/state/ready/jobA@-@0000000001");
        assert_eq!(
            store.get_children_keys("/state/ready").await.unwrap(),
            vec!["jobA@-@0000000001", "jobB@-@0000000000"]
        );
    }

    #[tokio::test]
    async fn test_update_keeps_ephemeral_kind() {
        let server = MemoryCoordinationServer::new();
        let a = server.connect();
        let b = server.connect();
        a.create_ephemeral("/job/instances/a", "").await.unwrap();
        assert!(b.update("/job/instances/a", "TRIGGER").await.unwrap());
        assert!(!b.update("/job/instances/missing", "TRIGGER").await.unwrap());
        server.expire_session(a.session_id());
        assert!(!b.is_existed("/job/instances/a").await.unwrap());
    }

    #[tokio::test]
    async fn test_paused_delivery_drops_events() {
        let server = MemoryCoordinationServer::new();
        let store = server.connect();
        let mut events = store.watch("/job").await.unwrap();
        server.set_watch_delivery(store.session_id(), false);
        store.persist("/job/config", "{}").await.unwrap();
        server.set_watch_delivery(store.session_id(), true);
        store.persist("/job/config", "{\"a\":1}").await.unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, StoreEventKind::Updated);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_watch_prefix_does_not_match_sibling_names() {
        let server = MemoryCoordinationServer::new();
        let store = server.connect();
        let mut events = store.watch("/job").await.unwrap();
        store.persist("/jobs/config", "{}").await.unwrap();
        store.persist("/job", "").await.unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(event.key, "/job");
    }

    #[tokio::test]
    async fn test_invalid_key_is_rejected() {
        let server = MemoryCoordinationServer::new();
        let store = server.connect();
        assert!(matches!(
            store.get("job/config").await,
            Err(AppError::Validation(_))
        ));
    }
}
