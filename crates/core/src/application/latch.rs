// Leader latch over an ephemeral lock node
//
// Used wherever exactly one instance must run a section at a time
// (failover claim). The lock is ephemeral, so a holder whose session dies
// releases it implicitly.

use crate::application::worker::constants::LATCH_RECHECK_INTERVAL;
use crate::error::Result;
use crate::port::{CoordinationStore, WatchStream};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, warn};

/// Run `callback` while holding the lock at `lock_key`, waiting for any
/// current holder to release it first. The lock is released whether the
/// callback succeeds or fails; the callback's result is returned.
pub async fn execute_in_leader<F, Fut, T>(
    store: &dyn CoordinationStore,
    lock_key: &str,
    owner: &str,
    callback: F,
) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    loop {
        // Subscribe before trying so a release between the two calls is seen
        let mut events = store.watch(lock_key).await?;
        if store.create_ephemeral(lock_key, owner).await? {
            debug!(lock = %lock_key, owner = %owner, "Latch acquired");
            let result = callback().await;
            if let Err(e) = store.remove(lock_key).await {
                warn!(lock = %lock_key, error = %e, "Failed to release latch");
            }
            return result;
        }
        debug!(lock = %lock_key, "Latch held elsewhere, waiting for release");
        wait_for_removal(&mut events, lock_key, LATCH_RECHECK_INTERVAL).await;
    }
}

/// Wait until `key` is reported removed or `max_wait` elapses.
///
/// Returns `true` only when the removal was observed. A closed stream is
/// treated like a silent store: sleep out the window and let the caller
/// re-read.
pub(crate) async fn wait_for_removal(
    events: &mut WatchStream,
    key: &str,
    max_wait: Duration,
) -> bool {
    let deadline = Instant::now() + max_wait;
    loop {
        match timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) if event.is_removed(key) => return true,
            Ok(Some(_)) => continue,
            Ok(None) => {
                sleep_until(deadline).await;
                return false;
            }
            Err(_) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::port::coordination_store::MockCoordinationStore;
    use tokio::sync::mpsc;

    fn closed_watch() -> WatchStream {
        let (_tx, rx) = mpsc::unbounded_channel();
        rx
    }

    #[tokio::test]
    async fn test_callback_error_still_releases_lock() {
        let mut store = MockCoordinationStore::new();
        store.expect_watch().returning(|_| Ok(closed_watch()));
        store
            .expect_create_ephemeral()
            .times(1)
            .returning(|_, _| Ok(true));
        store
            .expect_remove()
            .withf(|key| key == "/job/leader/failover/latch")
            .times(1)
            .returning(|_| Ok(()));

        let result: Result<()> = execute_in_leader(
            &store,
            "/job/leader/failover/latch",
            "me",
            || async { Err(AppError::Internal("boom".to_string())) },
        )
        .await;

        assert!(
            matches!(result, Err(AppError::Internal(_))),
            "Callback error must surface to the caller"
        );
    }

    #[tokio::test]
    async fn test_store_failure_is_not_a_lost_race() {
        let mut store = MockCoordinationStore::new();
        store.expect_watch().returning(|_| Ok(closed_watch()));
        store
            .expect_create_ephemeral()
            .returning(|_, _| Err(AppError::StoreUnavailable("timeout".to_string())));

        let result = execute_in_leader(&store, "/job/latch", "me", || async { Ok(1) }).await;
        assert!(result.unwrap_err().is_unavailable());
    }

    #[tokio::test]
    async fn test_wait_for_removal_ignores_other_keys() {
        let (tx, mut events) = mpsc::unbounded_channel();
        tx.send(crate::port::StoreEvent {
            kind: crate::port::StoreEventKind::Removed,
            key: "/k/child".to_string(),
            value: None,
        })
        .unwrap();
        let observed = wait_for_removal(&mut events, "/k", Duration::from_millis(50)).await;
        assert!(!observed, "Removal of a descendant is not a release");

        tx.send(crate::port::StoreEvent {
            kind: crate::port::StoreEventKind::Removed,
            key: "/k".to_string(),
            value: Some("holder".to_string()),
        })
        .unwrap();
        assert!(wait_for_removal(&mut events, "/k", Duration::from_millis(50)).await);
    }
}
