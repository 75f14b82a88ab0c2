//! Sharding Definition of Done (DoD) Integration Tests
//!
//! Every item has exactly one owner among the live instances, and the
//! assignment follows membership and shard count changes.

mod common;

use common::{
    assignment, job_config, start_cluster, Node, RejectReshardOnce, EVENT_SETTLE, FIRST_TAKES_ALL,
};
use futures::future::join_all;
use shardline_core::application::JobListeners;
use shardline_core::domain::{ExecutionType, JobNodePath};
use shardline_core::port::CoordinationStore;
use shardline_infra_memory::MemoryCoordinationServer;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

/// DoD 1: One cycle per instance runs every item exactly once cluster-wide
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_items_partitioned_across_instances() {
    let server = MemoryCoordinationServer::new();
    let config = job_config("orders", 8);
    let nodes = start_cluster(&server, &config, 3, JobListeners::new()).await;

    let reports = join_all(nodes.iter().map(|n| n.handle.dispatch_cycle())).await;
    for report in reports {
        let report = report.unwrap();
        assert!(!report.skipped);
        assert!(report.executed().iter().all(|(t, _)| *t == ExecutionType::Ready));
    }

    let mut all: Vec<u32> = nodes.iter().flat_map(|n| n.job.items()).collect();
    all.sort_unstable();
    assert_eq!(all, (0..8).collect::<Vec<u32>>());

    // Average allocation over the sorted ids: 3 + 3 + 2
    assert_eq!(nodes[0].job.items(), vec![0, 1, 6]);
    assert_eq!(nodes[1].job.items(), vec![2, 3, 7]);
    assert_eq!(nodes[2].job.items(), vec![4, 5]);

    let owners = assignment(nodes[0].store.as_ref(), "orders", 8).await;
    assert!(owners.values().all(|owner| owner.is_some()));
}

/// DoD 2: A lost instance's items move to the survivors on the next cycle
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reshard_after_instance_loss() {
    let server = MemoryCoordinationServer::new();
    let config = job_config("orders", 6);
    let nodes = start_cluster(&server, &config, 3, JobListeners::new()).await;
    join_all(nodes.iter().map(|n| n.handle.dispatch_cycle())).await;

    server.expire_session(nodes[2].session());
    tokio::time::sleep(EVENT_SETTLE).await;

    let path = JobNodePath::new("orders");
    assert!(nodes[0].store.is_existed(&path.sharding_necessary()).await.unwrap());

    nodes[0].handle.dispatch_cycle().await.unwrap();
    let owners = assignment(nodes[0].store.as_ref(), "orders", 6).await;
    let live: HashSet<String> = nodes[..2]
        .iter()
        .map(|n| n.handle.instance_id().to_string())
        .collect();
    for (item, owner) in &owners {
        let owner = owner.as_deref().unwrap_or_default();
        assert!(live.contains(owner), "item {} owned by {}", item, owner);
    }
    assert!(!nodes[0].store.is_existed(&path.sharding_necessary()).await.unwrap());
}

/// DoD 3: Shrinking the shard count drops the items beyond the new total
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shard_count_change_removes_stale_items() {
    let server = MemoryCoordinationServer::new();
    let config = job_config("orders", 6);
    let nodes = start_cluster(&server, &config, 2, JobListeners::new()).await;
    join_all(nodes.iter().map(|n| n.handle.dispatch_cycle())).await;

    let path = JobNodePath::new("orders");
    let mut shrunk = config.clone();
    shrunk.sharding_total_count = 3;
    nodes[1]
        .store
        .persist(&path.config(), &serde_json::to_string(&shrunk).unwrap())
        .await
        .unwrap();
    tokio::time::sleep(EVENT_SETTLE).await;

    for node in &nodes {
        node.job.clear();
    }
    nodes[0].handle.dispatch_cycle().await.unwrap();
    nodes[1].handle.dispatch_cycle().await.unwrap();

    let remaining = nodes[0]
        .store
        .get_children_keys(&path.sharding_root())
        .await
        .unwrap();
    assert_eq!(remaining, vec!["0", "1", "2"]);

    let mut all: Vec<u32> = nodes.iter().flat_map(|n| n.job.items()).collect();
    all.sort_unstable();
    assert_eq!(all, vec![0, 1, 2]);
}

/// DoD 4: A strategy registered by name is used for the job
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_custom_strategy_selected_by_name() {
    let server = MemoryCoordinationServer::new();
    let config = job_config("orders", 5).with_strategy(FIRST_TAKES_ALL);
    let nodes = start_cluster(&server, &config, 3, JobListeners::new()).await;

    join_all(nodes.iter().map(|n| n.handle.dispatch_cycle())).await;
    assert_eq!(nodes[0].job.items(), vec![0, 1, 2, 3, 4]);
    assert!(nodes[1].job.items().is_empty());
    assert!(nodes[2].job.items().is_empty());

    let owners = assignment(nodes[0].store.as_ref(), "orders", 5).await;
    let first = nodes[0].handle.instance_id().as_str().to_string();
    assert!(owners.values().all(|owner| owner.as_deref() == Some(first.as_str())));
}

/// DoD 5: A rejected reshard commit is retried before any item runs
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rejected_reshard_commit_does_not_run_stale_assignment() {
    let server = MemoryCoordinationServer::new();
    let config = job_config("orders", 2);
    let wrapper: Arc<Mutex<Option<Arc<RejectReshardOnce>>>> = Arc::new(Mutex::new(None));
    let slot = wrapper.clone();
    let leader = Node::start_with(
        &server,
        "10.0.0.1",
        "1",
        config.clone(),
        JobListeners::new(),
        move |inner| {
            let store = Arc::new(RejectReshardOnce::new(inner));
            *slot.lock().unwrap() = Some(store.clone());
            store as Arc<dyn CoordinationStore>
        },
    )
    .await;
    let store = wrapper.lock().unwrap().clone().unwrap();

    leader.handle.dispatch_cycle().await.unwrap();
    assert_eq!(leader.job.items(), vec![0, 1]);
    leader.job.clear();

    store.arm();
    let joined = Node::start(&server, "10.0.0.2", "1", config, JobListeners::new()).await;
    tokio::time::sleep(EVENT_SETTLE).await;

    leader.handle.dispatch_cycle().await.unwrap();
    assert_eq!(store.rejected.load(Ordering::SeqCst), 1);
    // Only the item of the new assignment ran
    assert_eq!(leader.job.items(), vec![0]);

    let path = JobNodePath::new("orders");
    assert!(!leader.store.is_existed(&path.sharding_necessary()).await.unwrap());
    let owners = assignment(leader.store.as_ref(), "orders", 2).await;
    assert_eq!(owners[&1].as_deref(), Some(joined.handle.instance_id().as_str()));
}
