// Leader Election - one leader per job via an ephemeral marker node
//
// The leader marker lives at /{job}/leader/election/instance and holds the
// leader's instance id. Creating it is atomic, so racing candidates cannot
// both win; it vanishes with the leader's session.

use crate::application::latch::execute_in_leader;
use crate::application::registry::JobRegistry;
use crate::application::server::ServerService;
use crate::application::worker::constants::{ELECTION_RETRY_INTERVAL, ELECTION_RETRY_JITTER_MS};
use crate::domain::{JobInstance, JobNodePath};
use crate::error::{AppError, Result};
use crate::port::CoordinationStore;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// This instance's view of its own role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipState {
    Follower,
    /// Election attempt in flight
    Candidate,
    Leader,
}

impl LeadershipState {
    pub fn is_leader(&self) -> bool {
        matches!(self, LeadershipState::Leader)
    }
}

pub struct LeaderElectionService {
    store: Arc<dyn CoordinationStore>,
    path: JobNodePath,
    instance: JobInstance,
    servers: Arc<ServerService>,
    registry: Arc<JobRegistry>,
    state_tx: watch::Sender<LeadershipState>,
}

impl LeaderElectionService {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        job_name: &str,
        instance: JobInstance,
        servers: Arc<ServerService>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        let (state_tx, _) = watch::channel(LeadershipState::Follower);
        Self {
            store,
            path: JobNodePath::new(job_name),
            instance,
            servers,
            registry,
            state_tx,
        }
    }

    /// Observe leadership changes of this instance
    pub fn subscribe(&self) -> watch::Receiver<LeadershipState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> LeadershipState {
        *self.state_tx.borrow()
    }

    /// Try once to become leader. Losing the race is not an error; a store
    /// failure is, and leaves this instance a follower.
    pub async fn elect_leader(&self) -> Result<()> {
        let job = self.path.job_name();
        self.set_state(LeadershipState::Candidate);
        let leader_key = self.path.leader_instance();
        let me = self.instance.id.as_str();
        let created = execute_in_leader(
            self.store.as_ref(),
            &self.path.election_latch(),
            me,
            || async {
                if self.store.is_existed(&leader_key).await? {
                    return Ok(false);
                }
                self.store.create_ephemeral(&leader_key, me).await
            },
        )
        .await;
        match created {
            Ok(true) => {
                info!(job = %job, instance = %self.instance.id, "Elected leader");
                self.set_state(LeadershipState::Leader);
                Ok(())
            }
            Ok(false) => {
                // The marker may still be ours from an earlier attempt
                self.is_leader().await?;
                debug!(job = %job, state = ?self.state(), "Leader already present");
                Ok(())
            }
            Err(e) => {
                warn!(job = %job, error = %e, "Election attempt failed");
                self.set_state(LeadershipState::Follower);
                Err(e)
            }
        }
    }

    /// Re-read the marker; local state alone is never trusted
    pub async fn is_leader(&self) -> Result<bool> {
        let leader = self.store.get(&self.path.leader_instance()).await?;
        let is_leader = !self.registry.is_shutdown(self.path.job_name())
            && leader.as_deref() == Some(self.instance.id.as_str());
        self.set_state(if is_leader {
            LeadershipState::Leader
        } else {
            LeadershipState::Follower
        });
        Ok(is_leader)
    }

    pub async fn has_leader(&self) -> Result<bool> {
        self.store.is_existed(&self.path.leader_instance()).await
    }

    /// Block until some instance is leader, electing this one if it is
    /// eligible, then report whether it is this one. Gives up once no
    /// available server is left to lead.
    pub async fn is_leader_until_block(&self) -> Result<bool> {
        let job = self.path.job_name();
        while !self.has_leader().await? {
            if self.registry.is_shutdown(job) {
                return Err(AppError::Shutdown(job.to_string()));
            }
            if !self.servers.has_available_servers().await? {
                debug!(job = %job, "No available server to lead");
                break;
            }
            let jitter = rand::thread_rng().gen_range(0..=ELECTION_RETRY_JITTER_MS);
            tokio::time::sleep(ELECTION_RETRY_INTERVAL + Duration::from_millis(jitter)).await;
            if !self.has_leader().await?
                && self.servers.is_available_server(self.instance.server_ip()).await?
            {
                self.elect_leader().await?;
            }
        }
        self.is_leader().await
    }

    /// Step down if this instance holds the marker
    pub async fn remove_leader(&self) -> Result<()> {
        let key = self.path.leader_instance();
        if self.store.get(&key).await?.as_deref() == Some(self.instance.id.as_str()) {
            self.store.remove(&key).await?;
            info!(job = %self.path.job_name(), "Leadership released");
        }
        self.set_state(LeadershipState::Follower);
        Ok(())
    }

    /// Reaction to the marker disappearing
    pub async fn on_leader_removed(&self) -> Result<()> {
        if self.registry.is_shutdown(self.path.job_name()) {
            return Ok(());
        }
        self.set_state(LeadershipState::Follower);
        if self
            .servers
            .is_available_server(self.instance.server_ip())
            .await?
        {
            self.elect_leader().await?;
        }
        Ok(())
    }

    fn set_state(&self, state: LeadershipState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobInstanceId;
    use crate::port::coordination_store::MockCoordinationStore;

    fn service(store: MockCoordinationStore) -> LeaderElectionService {
        let store: Arc<dyn CoordinationStore> = Arc::new(store);
        let registry = Arc::new(JobRegistry::new());
        let instance = JobInstance::new(JobInstanceId::new("10.0.0.1", "1"));
        registry.register("billing", instance.clone(), 2);
        let servers = Arc::new(ServerService::new(store.clone(), "billing"));
        LeaderElectionService::new(store, "billing", instance, servers, registry)
    }

    #[tokio::test]
    async fn test_unavailable_store_is_not_read_as_no_leader() {
        let mut store = MockCoordinationStore::new();
        store
            .expect_is_existed()
            .returning(|_| Err(AppError::StoreUnavailable("read timeout".to_string())));
        let election = service(store);

        let err = election.is_leader_until_block().await.unwrap_err();
        assert!(err.is_unavailable(), "Expected StoreUnavailable, got {}", err);
    }

    fn closed_watch() -> crate::port::WatchStream {
        let (_tx, rx) = tokio::sync::mpsc::unbounded_channel();
        rx
    }

    #[tokio::test]
    async fn test_failed_election_leaves_follower() {
        let mut store = MockCoordinationStore::new();
        store.expect_watch().returning(|_| Ok(closed_watch()));
        store
            .expect_create_ephemeral()
            .returning(|_, _| Err(AppError::StoreUnavailable("session lost".to_string())));
        let election = service(store);
        let rx = election.subscribe();

        assert!(election.elect_leader().await.is_err());
        assert_eq!(*rx.borrow(), LeadershipState::Follower);
    }

    #[tokio::test]
    async fn test_winning_election_publishes_leader_state() {
        let mut store = MockCoordinationStore::new();
        store.expect_watch().returning(|_| Ok(closed_watch()));
        store
            .expect_create_ephemeral()
            .withf(|key, _| key == "/billing/leader/election/latch")
            .returning(|_, _| Ok(true));
        store.expect_is_existed().returning(|_| Ok(false));
        store
            .expect_create_ephemeral()
            .withf(|key, value| {
                key == "/billing/leader/election/instance" && value == "10.0.0.1@-@1"
            })
            .returning(|_, _| Ok(true));
        store.expect_remove().times(1).returning(|_| Ok(()));
        let election = service(store);
        let mut rx = election.subscribe();

        election.elect_leader().await.unwrap();
        assert!(rx.borrow_and_update().is_leader());
    }
}
