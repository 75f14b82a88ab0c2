// In-memory coordination server
//
// One shared tree, many client sessions. A session owns the ephemeral nodes
// it created and the watches it registered; expiring it removes both, the
// way a lost connection does on a real coordination service.

use crate::store::MemoryCoordinationStore;
use crate::tree::NodeTree;
use shardline_core::error::{AppError, Result};
use shardline_core::port::StoreEvent;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info};

pub type SessionId = u64;

struct Watcher {
    session: SessionId,
    key: String,
    tx: mpsc::UnboundedSender<StoreEvent>,
}

impl Watcher {
    fn matches(&self, key: &str) -> bool {
        key == self.key
            || (key.starts_with(self.key.as_str()) && key[self.key.len()..].starts_with('/'))
    }
}

struct SessionState {
    alive: bool,
    /// Cleared to simulate notifications lost on the wire
    deliver: bool,
}

#[derive(Default)]
pub(crate) struct ServerState {
    pub(crate) tree: NodeTree,
    sessions: HashMap<SessionId, SessionState>,
    watchers: Vec<Watcher>,
    next_session: SessionId,
}

impl ServerState {
    fn dispatch(&mut self, events: Vec<StoreEvent>) {
        if events.is_empty() {
            return;
        }
        let sessions = &self.sessions;
        self.watchers.retain(|watcher| {
            let deliver = sessions
                .get(&watcher.session)
                .map(|s| s.alive && s.deliver)
                .unwrap_or(false);
            if !deliver {
                return true;
            }
            events
                .iter()
                .filter(|e| watcher.matches(&e.key))
                .all(|e| watcher.tx.send(e.clone()).is_ok())
        });
    }
}

/// Shared in-process coordination service. Clones refer to the same tree.
#[derive(Clone, Default)]
pub struct MemoryCoordinationServer {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryCoordinationServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new client session
    pub fn connect(&self) -> MemoryCoordinationStore {
        let session = {
            let mut state = self.lock();
            state.next_session += 1;
            let session = state.next_session;
            state.sessions.insert(
                session,
                SessionState {
                    alive: true,
                    deliver: true,
                },
            );
            session
        };
        debug!(session, "Session opened");
        MemoryCoordinationStore::new(self.clone(), session)
    }

    /// End a session: its ephemeral nodes are removed (other sessions see
    /// the removals), its watches close and its further calls fail.
    pub fn expire_session(&self, session: SessionId) {
        let mut state = self.lock();
        match state.sessions.get_mut(&session) {
            Some(s) if s.alive => s.alive = false,
            _ => return,
        }
        state.watchers.retain(|w| w.session != session);
        let mut events = Vec::new();
        for key in state.tree.owned_by(session) {
            state.tree.remove_subtree(&key, &mut events);
        }
        info!(session, removed = events.len(), "Session expired");
        state.dispatch(events);
    }

    pub fn is_session_alive(&self, session: SessionId) -> bool {
        self.lock()
            .sessions
            .get(&session)
            .map(|s| s.alive)
            .unwrap_or(false)
    }

    /// Stop (or resume) delivering notifications to a session's watches.
    /// Events dropped meanwhile are not replayed.
    pub fn set_watch_delivery(&self, session: SessionId, enabled: bool) {
        if let Some(s) = self.lock().sessions.get_mut(&session) {
            s.deliver = enabled;
        }
    }

    /// `(key, value)` of `prefix` and everything below it, sorted by key
    pub fn snapshot(&self, prefix: &str) -> Vec<(String, String)> {
        self.lock().tree.snapshot(prefix)
    }

    /// Run `op` for a live session, then deliver the events it produced
    pub(crate) fn with_session<T>(
        &self,
        session: SessionId,
        op: impl FnOnce(&mut NodeTree, &mut Vec<StoreEvent>) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.lock();
        Self::ensure_alive(&state, session)?;
        let mut events = Vec::new();
        let result = op(&mut state.tree, &mut events);
        state.dispatch(events);
        result
    }

    pub(crate) fn register_watch(
        &self,
        session: SessionId,
        key: &str,
    ) -> Result<mpsc::UnboundedReceiver<StoreEvent>> {
        let mut state = self.lock();
        Self::ensure_alive(&state, session)?;
        let (tx, rx) = mpsc::unbounded_channel();
        state.watchers.push(Watcher {
            session,
            key: key.to_string(),
            tx,
        });
        Ok(rx)
    }

    fn ensure_alive(state: &ServerState, session: SessionId) -> Result<()> {
        match state.sessions.get(&session) {
            Some(s) if s.alive => Ok(()),
            _ => Err(AppError::StoreUnavailable(format!(
                "session {} expired",
                session
            ))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
