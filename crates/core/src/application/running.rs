// Running Service - per-item running markers and misfire marks
//
// A running marker at /{job}/sharding/{item}/running is ephemeral and holds
// a JSON RunningRecord. Completion writes the completed record and removes
// the marker in one transaction, so an observer that sees the marker gone
// without a matching completed record knows the holder crashed.

use crate::domain::{JobNodePath, RunningRecord, TaskContext};
use crate::error::Result;
use crate::port::{CoordinationStore, StoreTransaction, TimeProvider};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct RunningService {
    store: Arc<dyn CoordinationStore>,
    time_provider: Arc<dyn TimeProvider>,
}

impl RunningService {
    pub fn new(store: Arc<dyn CoordinationStore>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            store,
            time_provider,
        }
    }

    /// Claim `item` for `task`. `false` means someone already holds it and
    /// the caller must skip the item this cycle.
    pub async fn try_start(&self, job_name: &str, item: u32, task: &TaskContext) -> Result<bool> {
        let path = JobNodePath::new(job_name);
        let record = RunningRecord::new(task.id(), self.time_provider.now_millis());
        let raw = serde_json::to_string(&record)?;
        let created = self
            .store
            .create_ephemeral(&path.item_running(item), &raw)
            .await?;
        if !created {
            debug!(job = %job_name, item, "Item already running elsewhere, skipping");
        }
        Ok(created)
    }

    /// Release `item` after `task_id` finished with it. Returns `false`
    /// when the marker is gone or belongs to someone else; the outcome of
    /// this run must then not be reported as the item's completion.
    pub async fn complete(&self, job_name: &str, item: u32, task_id: &str) -> Result<bool> {
        let path = JobNodePath::new(job_name);
        let running_key = path.item_running(item);
        let raw = match self.store.get(&running_key).await? {
            Some(raw) => raw,
            None => {
                warn!(job = %job_name, item, "Running marker lost before completion");
                return Ok(false);
            }
        };
        let holder = serde_json::from_str::<RunningRecord>(&raw)
            .map(|r| r.task_id)
            .unwrap_or_default();
        if holder != task_id {
            warn!(job = %job_name, item, holder = %holder, "Running marker taken over");
            return Ok(false);
        }
        let tx = StoreTransaction::new()
            .check_value(running_key.clone(), raw)
            .put(path.item_completed(item), task_id)
            .delete(running_key);
        let committed = self.store.commit(tx).await?;
        if !committed {
            warn!(job = %job_name, item, "Running marker changed during completion");
        }
        Ok(committed)
    }

    pub async fn is_task_running(&self, job_name: &str, item: u32) -> Result<bool> {
        self.store
            .is_existed(&JobNodePath::new(job_name).item_running(item))
            .await
    }

    pub async fn running_record(&self, job_name: &str, item: u32) -> Result<Option<RunningRecord>> {
        let key = JobNodePath::new(job_name).item_running(item);
        match self.store.get(&key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Start time of the current run of `item`, if any
    pub async fn running_since(&self, job_name: &str, item: u32) -> Result<Option<i64>> {
        Ok(self
            .running_record(job_name, item)
            .await?
            .map(|r| r.started_at))
    }

    /// Items with a running marker
    pub async fn running_items(&self, job_name: &str) -> Result<Vec<u32>> {
        let mut result = Vec::new();
        for item in self.known_items(job_name).await? {
            if self.is_task_running(job_name, item).await? {
                result.push(item);
            }
        }
        Ok(result)
    }

    pub async fn is_job_running(&self, job_name: &str) -> Result<bool> {
        for item in self.known_items(job_name).await? {
            if self.is_task_running(job_name, item).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Drop every running marker of the job and any item node left empty
    pub async fn clear_running(&self, job_name: &str) -> Result<()> {
        let path = JobNodePath::new(job_name);
        for item in self.known_items(job_name).await? {
            self.store.remove(&path.item_running(item)).await?;
            let item_key = path.sharding_item(item);
            if self.store.get_children_keys(&item_key).await?.is_empty() {
                self.store.remove(&item_key).await?;
            }
        }
        let root = path.sharding_root();
        if self.store.is_existed(&root).await?
            && self.store.get_children_keys(&root).await?.is_empty()
        {
            self.store.remove(&root).await?;
        }
        info!(job = %job_name, "Running markers cleared");
        Ok(())
    }

    /// Remove the markers held by tasks of `instance_id` (local shutdown).
    /// Removed without a completed record, so other instances fail them over.
    pub async fn clear_running_of_instance(&self, job_name: &str, instance_id: &str) -> Result<usize> {
        let path = JobNodePath::new(job_name);
        let mut cleared = 0;
        for item in self.known_items(job_name).await? {
            let owned = match self.running_record(job_name, item).await {
                Ok(Some(record)) => TaskContext::parse(&record.task_id)
                    .map(|task| task.instance_id.as_str() == instance_id)
                    .unwrap_or(false),
                Ok(None) => false,
                Err(e) => {
                    warn!(job = %job_name, item, error = %e, "Unreadable running marker");
                    false
                }
            };
            if owned {
                self.store.remove(&path.item_running(item)).await?;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    /// Mark every given item misfired when any of them is still running.
    /// Returns whether the caller must skip this dispatch.
    pub async fn misfire_if_running(&self, job_name: &str, items: &[u32]) -> Result<bool> {
        let mut any_running = false;
        for item in items {
            if self.is_task_running(job_name, *item).await? {
                any_running = true;
                break;
            }
        }
        if any_running {
            self.set_misfire(job_name, items).await?;
            info!(job = %job_name, ?items, "Previous run still active, marked misfired");
        }
        Ok(any_running)
    }

    pub async fn set_misfire(&self, job_name: &str, items: &[u32]) -> Result<()> {
        let path = JobNodePath::new(job_name);
        for item in items {
            self.store.create(&path.item_misfire(*item), "").await?;
        }
        Ok(())
    }

    /// Subset of `items` carrying a misfire mark
    pub async fn misfired_items(&self, job_name: &str, items: &[u32]) -> Result<Vec<u32>> {
        let path = JobNodePath::new(job_name);
        let mut result = Vec::new();
        for item in items {
            if self.store.is_existed(&path.item_misfire(*item)).await? {
                result.push(*item);
            }
        }
        Ok(result)
    }

    pub async fn clear_misfire(&self, job_name: &str, items: &[u32]) -> Result<()> {
        let path = JobNodePath::new(job_name);
        for item in items {
            self.store.remove(&path.item_misfire(*item)).await?;
        }
        Ok(())
    }

    /// Numeric children of the sharding root, ascending
    async fn known_items(&self, job_name: &str) -> Result<Vec<u32>> {
        let root = JobNodePath::new(job_name).sharding_root();
        let mut items: Vec<u32> = self
            .store
            .get_children_keys(&root)
            .await?
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect();
        items.sort_unstable();
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExecutionType, JobInstanceId};
    use crate::error::AppError;
    use crate::port::coordination_store::MockCoordinationStore;
    use crate::port::time_provider::mocks::ManualTimeProvider;

    fn task() -> TaskContext {
        TaskContext::new(
            "billing",
            vec![1],
            ExecutionType::Ready,
            JobInstanceId::new("10.0.0.1", "1"),
            "t0",
        )
    }

    fn service(store: MockCoordinationStore) -> RunningService {
        RunningService::new(Arc::new(store), Arc::new(ManualTimeProvider::new(1_000)))
    }

    #[tokio::test]
    async fn test_try_start_records_task_and_time() {
        let expected = serde_json::to_string(&RunningRecord::new(task().id(), 1_000)).unwrap();
        let mut store = MockCoordinationStore::new();
        store
            .expect_create_ephemeral()
            .withf(move |key, value| key == "/billing/sharding/1/running" && value == expected)
            .times(1)
            .returning(|_, _| Ok(true));

        assert!(service(store).try_start("billing", 1, &task()).await.unwrap());
    }

    #[tokio::test]
    async fn test_complete_refuses_foreign_marker() {
        let foreign = serde_json::to_string(&RunningRecord::new("someone-else", 5)).unwrap();
        let mut store = MockCoordinationStore::new();
        store
            .expect_get()
            .returning(move |_| Ok(Some(foreign.clone())));
        store.expect_commit().never();

        let owned = service(store)
            .complete("billing", 1, &task().id())
            .await
            .unwrap();
        assert!(!owned, "A marker held by another task must not be released");
    }

    #[tokio::test]
    async fn test_complete_writes_record_and_removes_marker_atomically() {
        let task_id = task().id();
        let raw = serde_json::to_string(&RunningRecord::new(task_id.clone(), 5)).unwrap();
        let raw_for_get = raw.clone();
        let mut store = MockCoordinationStore::new();
        store
            .expect_get()
            .returning(move |_| Ok(Some(raw_for_get.clone())));
        let expected_id = task_id.clone();
        store
            .expect_commit()
            .withf(move |tx| {
                tx.ops()
                    == [
                        crate::port::TransactionOp::CheckValue {
                            key: "/billing/sharding/1/running".to_string(),
                            value: raw.clone(),
                        },
                        crate::port::TransactionOp::Put {
                            key: "/billing/sharding/1/completed".to_string(),
                            value: expected_id.clone(),
                        },
                        crate::port::TransactionOp::Delete(
                            "/billing/sharding/1/running".to_string(),
                        ),
                    ]
            })
            .times(1)
            .returning(|_| Ok(true));

        assert!(service(store).complete("billing", 1, &task_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_running_check_propagates_store_failure() {
        let mut store = MockCoordinationStore::new();
        store
            .expect_is_existed()
            .returning(|_| Err(AppError::StoreUnavailable("timeout".to_string())));

        let result = service(store).misfire_if_running("billing", &[0, 1]).await;
        assert!(result.unwrap_err().is_unavailable());
    }
}
