//! Leader Election Definition of Done (DoD) Integration Tests
//!
//! At most one leader per job at any time, and a new one after the
//! leader's session is lost.

mod common;

use common::{eventually, job_config, start_cluster, Node, EVENT_SETTLE};
use shardline_core::application::{AdminService, InstanceScope, JobListeners};
use shardline_core::domain::JobNodePath;
use shardline_core::port::CoordinationStore;
use shardline_infra_memory::MemoryCoordinationServer;
use std::sync::Arc;
use std::time::Duration;

async fn leader_count(nodes: &[Node]) -> usize {
    let mut count = 0;
    for node in nodes {
        if !node.handle.is_shutdown() && node.handle.is_leader().await.unwrap_or(false) {
            count += 1;
        }
    }
    count
}

/// DoD 1: Concurrent starts elect exactly one leader
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_leader_among_concurrent_starts() {
    let server = MemoryCoordinationServer::new();
    let config = job_config("reports", 4);
    let starts = (0..4).map(|n| {
        let server = server.clone();
        let config = config.clone();
        tokio::spawn(async move {
            Node::start(&server, &format!("10.0.1.{}", n + 1), "1", config, JobListeners::new()).await
        })
    });
    let mut nodes = Vec::new();
    for start in starts {
        nodes.push(start.await.unwrap());
    }

    assert_eq!(leader_count(&nodes).await, 1);
    let marker = nodes[0]
        .store
        .get(&JobNodePath::new("reports").leader_instance())
        .await
        .unwrap()
        .unwrap();
    assert!(nodes.iter().any(|n| n.handle.instance_id().as_str() == marker));
}

/// DoD 2: Losing the leader's session elects one of the survivors
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reelection_after_leader_session_expires() {
    let server = MemoryCoordinationServer::new();
    let config = job_config("reports", 4);
    let nodes = start_cluster(&server, &config, 3, JobListeners::new()).await;
    assert!(nodes[0].handle.is_leader().await.unwrap());

    server.expire_session(nodes[0].session());

    let survivors = &nodes[1..];
    assert!(
        eventually(Duration::from_secs(5), || async move { leader_count(survivors).await == 1 }).await,
        "no survivor took over leadership"
    );
    tokio::time::sleep(EVENT_SETTLE).await;
    assert_eq!(leader_count(survivors).await, 1);
}

/// DoD 3: Shutting the leader down through the admin surface hands over
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_admin_shutdown_of_leader_hands_over() {
    let server = MemoryCoordinationServer::new();
    let config = job_config("reports", 2);
    let nodes = start_cluster(&server, &config, 2, JobListeners::new()).await;

    let admin = AdminService::new(Arc::new(server.connect()));
    let leader_id = nodes[0].handle.instance_id().clone();
    let removed = admin
        .shutdown("reports", &InstanceScope::Instance(leader_id))
        .await
        .unwrap();
    assert_eq!(removed, 1);

    let (leader, follower) = (&nodes[0], &nodes[1]);
    assert!(
        eventually(Duration::from_secs(5), || async move { leader.handle.is_shutdown() }).await,
        "leader did not stop after its instance node was removed"
    );
    assert!(
        eventually(Duration::from_secs(5), || async move {
            follower.handle.is_leader().await.unwrap_or(false)
        })
        .await,
        "follower was not elected"
    );
}
