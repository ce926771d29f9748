//! Cluster admin surface, heartbeat probing, and election over real nodes.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::spawn_participant;
use lockstep::cluster::heartbeat::{self, HeartbeatMonitor};
use lockstep::cluster::{Membership, NodeRecord};
use lockstep::protocol::{
    AddNodeRequest, JoinRequest, RemoveNodeRequest, SetNameRequest,
};
use lockstep::transport::RpcClient;

const RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// An address nothing listens on; probes fail with connection refused. Port
/// 1 also sorts before any ephemeral port, which the dead-leader test below
/// relies on.
const DEAD_ADDR: &str = "127.0.0.1:1";

#[tokio::test]
async fn health_and_role_report_the_wire_role_strings() {
    let node = spawn_participant(RPC_TIMEOUT).await;
    let client = RpcClient::new(RPC_TIMEOUT).unwrap();

    let health = client.health(&node.addr).await.unwrap();
    assert_eq!(health.status, "OK");
    assert_eq!(health.address, node.addr);
    assert_eq!(health.role, "SLAVE");

    node.membership.set_leader(Some(&node.addr));
    let role = client.role(&node.addr).await.unwrap();
    assert_eq!(role.role, "MASTER");
}

#[tokio::test]
async fn admin_endpoints_mutate_membership() {
    let node = spawn_participant(RPC_TIMEOUT).await;
    let client = RpcClient::new(RPC_TIMEOUT).unwrap();

    let added = client
        .add_node(
            &node.addr,
            &AddNodeRequest {
                address: "peer:9999".to_string(),
                name: Some("shard-two".to_string()),
                database: Some("data/two.db".to_string()),
            },
        )
        .await
        .unwrap();
    assert!(added.success);

    let info = client.cluster_info(&node.addr).await.unwrap();
    let peer = info
        .nodes
        .iter()
        .find(|n| n.address == "peer:9999")
        .expect("added node listed");
    assert_eq!(peer.name.as_deref(), Some("shard-two"));
    assert_eq!(peer.database.as_deref(), Some("data/two.db"));

    let renamed = client
        .set_node_name(
            &node.addr,
            &SetNameRequest {
                address: "peer:9999".to_string(),
                name: "shard-2".to_string(),
            },
        )
        .await
        .unwrap();
    assert!(renamed.success);
    assert_eq!(
        node.membership.get("peer:9999").unwrap().name.as_deref(),
        Some("shard-2")
    );

    let removed = client
        .remove_node(
            &node.addr,
            &RemoveNodeRequest {
                address: "peer:9999".to_string(),
            },
        )
        .await
        .unwrap();
    assert!(removed.success);
    assert!(node.membership.get("peer:9999").is_none());

    // Unknown node rename is an error response, not a transport failure.
    let missing = client
        .set_node_name(
            &node.addr,
            &SetNameRequest {
                address: "ghost:1".to_string(),
                name: "x".to_string(),
            },
        )
        .await
        .unwrap();
    assert!(!missing.success);
    assert!(missing.error.unwrap_or_default().contains("not found"));
}

#[tokio::test]
async fn join_returns_the_cluster_view() {
    let node = spawn_participant(RPC_TIMEOUT).await;
    node.membership.set_leader(Some(&node.addr));

    let client = RpcClient::new(RPC_TIMEOUT).unwrap();
    let joined = client
        .join(
            &node.addr,
            &JoinRequest {
                address: "newcomer:7000".to_string(),
            },
        )
        .await
        .unwrap();

    assert!(joined.success);
    assert!(joined.cluster_nodes.contains(&"newcomer:7000".to_string()));
    assert!(joined.cluster_nodes.contains(&node.addr));
    // The newcomer's address sorts after nothing relevant here; the leader
    // pointer must reference a listed node either way.
    assert!(joined.cluster_nodes.contains(&joined.master_addr));
}

#[tokio::test]
async fn heartbeat_sweep_marks_liveness_and_elects() {
    let alive_a = spawn_participant(RPC_TIMEOUT).await;
    let alive_b = spawn_participant(RPC_TIMEOUT).await;

    let membership = Arc::new(Membership::new());
    membership.add_node(NodeRecord::new(alive_a.addr.clone()));
    membership.add_node(NodeRecord::new(alive_b.addr.clone()));
    membership.add_node(NodeRecord::new(DEAD_ADDR));

    let probe_client = RpcClient::new(Duration::from_secs(2)).unwrap();
    heartbeat::sweep(&membership, &probe_client).await;

    assert!(membership.get(&alive_a.addr).unwrap().alive);
    assert!(membership.get(&alive_b.addr).unwrap().alive);
    assert!(!membership.get(DEAD_ADDR).unwrap().alive);

    let expected_leader = membership
        .live()
        .into_iter()
        .map(|n| n.addr)
        .min()
        .unwrap();
    assert_eq!(membership.leader_addr(), Some(expected_leader));
}

#[tokio::test]
async fn heartbeat_monitor_runs_and_stops() {
    let node = spawn_participant(RPC_TIMEOUT).await;

    let membership = Arc::new(Membership::new());
    membership.add_node(NodeRecord::new(node.addr.clone()));
    membership.add_node(NodeRecord::new(DEAD_ADDR));

    let monitor =
        HeartbeatMonitor::new(Arc::clone(&membership), Duration::from_millis(50)).unwrap();
    monitor.start();

    // The first sweep runs immediately; give it room to finish.
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(!membership.get(DEAD_ADDR).unwrap().alive);
    assert_eq!(membership.leader_addr(), Some(node.addr.clone()));

    monitor.stop().await;
}

#[tokio::test]
async fn dead_leader_is_replaced_on_the_next_sweep() {
    let survivor = spawn_participant(RPC_TIMEOUT).await;

    let membership = Arc::new(Membership::new());
    // The dead address sorts first, so the initial view elects it.
    membership.add_node(NodeRecord::new(DEAD_ADDR));
    membership.add_node(NodeRecord::new(survivor.addr.clone()));
    membership.check_and_elect();
    assert_eq!(membership.leader_addr(), Some(DEAD_ADDR.to_string()));

    let probe_client = RpcClient::new(Duration::from_secs(2)).unwrap();
    heartbeat::sweep(&membership, &probe_client).await;

    assert_eq!(membership.leader_addr(), Some(survivor.addr.clone()));
    assert_eq!(
        membership.get(DEAD_ADDR).unwrap().role,
        lockstep::protocol::NodeRole::Follower
    );
}

#[tokio::test]
async fn transactions_endpoint_pages_and_filters() {
    let node = spawn_participant(RPC_TIMEOUT).await;

    for i in 0..3 {
        let tx_id = format!("api-tx-{i}");
        let payload = json!({"table": "users", "values": {"id": i, "name": "x"}});
        node.store.prepare(&tx_id, &payload).unwrap();
        if i == 0 {
            node.store.abort(&tx_id).unwrap();
        } else {
            node.store.commit(&tx_id).unwrap();
        }
    }

    let client = RpcClient::new(RPC_TIMEOUT).unwrap();

    let all = client
        .transactions(&node.addr, 1, 10, None)
        .await
        .unwrap();
    assert_eq!(all.total, 3);
    assert_eq!(all.transactions.len(), 3);
    assert!(all.has_db);
    assert_eq!(all.address, node.addr);

    let committed = client
        .transactions(&node.addr, 1, 10, Some("COMMITTED"))
        .await
        .unwrap();
    assert_eq!(committed.total, 2);
    assert!(committed
        .transactions
        .iter()
        .all(|t| t.status == "COMMITTED"));

    let paged = client.transactions(&node.addr, 2, 2, None).await.unwrap();
    assert_eq!(paged.transactions.len(), 1);
    assert_eq!(paged.total, 3);
}

#[tokio::test]
async fn metrics_endpoint_reports_counters() {
    let node = spawn_participant(RPC_TIMEOUT).await;

    let payload = json!({"table": "users", "values": {"id": 1, "name": "x"}});
    node.store.prepare("m-1", &payload).unwrap();
    node.store.commit("m-1").unwrap();
    node.store.prepare("m-2", &payload).unwrap();
    node.store.abort("m-2").unwrap();

    let client = RpcClient::new(RPC_TIMEOUT).unwrap();
    let metrics = client.metrics(&node.addr).await.unwrap();

    assert_eq!(metrics.prepared, 2);
    assert_eq!(metrics.committed, 1);
    assert_eq!(metrics.aborted, 1);
    assert_eq!(metrics.in_flight, 0);
}

#[tokio::test]
async fn retry_wrapper_recovers_an_intermittent_read() {
    let node = spawn_participant(RPC_TIMEOUT).await;

    // One refused attempt against a dead port would fail outright; against a
    // live node the retry path must not change the result.
    let client = RpcClient::new(Duration::from_millis(500))
        .unwrap()
        .with_retry(2, Duration::from_millis(20));

    let health = client.health(&node.addr).await.unwrap();
    assert_eq!(health.status, "OK");

    let err = client.health(DEAD_ADDR).await;
    assert!(err.is_err());
}
