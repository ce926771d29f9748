//! End-to-end two-phase commit across real nodes.
//!
//! Each test boots full nodes (store + HTTP surface) on ephemeral ports and
//! drives the coordinator against them, checking both the response and the
//! durable audit state on every participant. The misbehaving participant in
//! the timeout test is a scripted stub, like the original's failure-injection
//! servers.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use common::{count_users, form_cluster, spawn_participant};
use lockstep::protocol::{TransactionRequest, TxStatus};
use lockstep::transport::RpcClient;

const RPC_TIMEOUT: Duration = Duration::from_secs(5);

fn users_payload(id: i64, name: &str) -> Value {
    json!({"table": "users", "values": {"id": id, "name": name}})
}

#[tokio::test]
async fn commit_reaches_every_participant() {
    let leader = spawn_participant(RPC_TIMEOUT).await;
    let f1 = spawn_participant(RPC_TIMEOUT).await;
    let f2 = spawn_participant(RPC_TIMEOUT).await;
    form_cluster(&leader, &[&f1, &f2]);

    let response = leader.coordinator.execute(users_payload(1, "Alice")).await;

    assert!(response.success, "unexpected failure: {:?}", response.error);
    assert_eq!(
        response.message.as_deref(),
        Some("Transaction committed on 3 nodes")
    );
    assert!(!response.transaction_id.is_empty());

    for node in [&leader, &f1, &f2] {
        assert_eq!(count_users(node), 1, "row missing on {}", node.addr);
        assert_eq!(
            node.store
                .transaction_status(&response.transaction_id)
                .unwrap(),
            Some(TxStatus::Committed),
            "audit row wrong on {}",
            node.addr
        );
        assert!(!node.store.is_pending(&response.transaction_id));
    }
}

#[tokio::test]
async fn transaction_endpoint_drives_the_protocol() {
    let leader = spawn_participant(RPC_TIMEOUT).await;
    let follower = spawn_participant(RPC_TIMEOUT).await;
    form_cluster(&leader, &[&follower]);

    let client = RpcClient::new(RPC_TIMEOUT).unwrap();
    let response = client
        .start_transaction(
            &leader.addr,
            &TransactionRequest {
                payload: users_payload(7, "Grace"),
            },
        )
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(
        response.message.as_deref(),
        Some("Transaction committed on 2 nodes")
    );
    assert_eq!(count_users(&leader), 1);
    assert_eq!(count_users(&follower), 1);
}

#[tokio::test]
async fn follower_rejects_transaction_requests() {
    let follower = spawn_participant(RPC_TIMEOUT).await;

    let client = RpcClient::new(RPC_TIMEOUT).unwrap();
    let response = client
        .start_transaction(
            &follower.addr,
            &TransactionRequest {
                payload: users_payload(1, "Niklaus"),
            },
        )
        .await
        .unwrap();

    assert!(!response.success);
    assert_eq!(
        response.error.as_deref(),
        Some("This node is not the master")
    );
}

/// Scripted participant: prepare stalls past the coordinator timeout, abort
/// and commit are counted.
async fn spawn_stalling_stub(prepare_delay: Duration) -> (String, Arc<AtomicU32>, Arc<AtomicU32>) {
    let aborts = Arc::new(AtomicU32::new(0));
    let commits = Arc::new(AtomicU32::new(0));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let abort_count = Arc::clone(&aborts);
    let commit_count = Arc::clone(&commits);
    let app = Router::new()
        .route(
            "/prepare",
            post(move |_body: Json<Value>| async move {
                tokio::time::sleep(prepare_delay).await;
                Json(json!({"status": "READY"}))
            }),
        )
        .route(
            "/abort",
            post(move |_body: Json<Value>| {
                let aborts = Arc::clone(&abort_count);
                async move {
                    aborts.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"success": true}))
                }
            }),
        )
        .route(
            "/commit",
            post(move |_body: Json<Value>| {
                let commits = Arc::clone(&commit_count);
                async move {
                    commits.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"success": true}))
                }
            }),
        );

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (addr, aborts, commits)
}

#[tokio::test]
async fn prepare_timeout_aborts_everyone() {
    let coord_timeout = Duration::from_millis(200);

    let leader = spawn_participant(coord_timeout).await;
    let healthy = spawn_participant(RPC_TIMEOUT).await;
    let (stall_addr, stall_aborts, stall_commits) =
        spawn_stalling_stub(Duration::from_secs(2)).await;

    form_cluster(&leader, &[&healthy]);
    leader
        .membership
        .add_node(lockstep::cluster::NodeRecord::new(stall_addr.clone()));

    let response = leader.coordinator.execute(users_payload(1, "Edsger")).await;

    assert!(!response.success);
    let error = response.error.clone().unwrap_or_default();
    assert!(
        error.contains(&stall_addr),
        "error should name the timed-out node, got: {error}"
    );

    // Prepared participants rolled back and recorded the outcome.
    for node in [&leader, &healthy] {
        assert_eq!(count_users(node), 0, "write leaked on {}", node.addr);
        assert_eq!(
            node.store
                .transaction_status(&response.transaction_id)
                .unwrap(),
            Some(TxStatus::Aborted),
            "audit row wrong on {}",
            node.addr
        );
    }

    // The stalling node was told to abort even though its prepare response
    // was never seen; nothing was ever committed.
    assert!(stall_aborts.load(Ordering::SeqCst) >= 1);
    assert_eq!(stall_commits.load(Ordering::SeqCst), 0);
}

/// Scripted participant that prepares fine but refuses to commit.
async fn spawn_commit_refusing_stub() -> (String, Arc<AtomicU32>) {
    let aborts = Arc::new(AtomicU32::new(0));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let abort_count = Arc::clone(&aborts);
    let app = Router::new()
        .route(
            "/prepare",
            post(|_body: Json<Value>| async { Json(json!({"status": "READY"})) }),
        )
        .route(
            "/commit",
            post(|_body: Json<Value>| async {
                Json(json!({"success": false, "error": "disk full"}))
            }),
        )
        .route(
            "/abort",
            post(move |_body: Json<Value>| {
                let aborts = Arc::clone(&abort_count);
                async move {
                    aborts.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"success": true}))
                }
            }),
        );

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (addr, aborts)
}

#[tokio::test]
async fn commit_failure_is_reported_not_rolled_back() {
    let leader = spawn_participant(RPC_TIMEOUT).await;
    let (refusing_addr, refusing_aborts) = spawn_commit_refusing_stub().await;

    form_cluster(&leader, &[]);
    leader
        .membership
        .add_node(lockstep::cluster::NodeRecord::new(refusing_addr));

    let response = leader.coordinator.execute(users_payload(1, "Leslie")).await;

    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("Some commits failed"));

    // Past the point of no return: the local participant stays committed and
    // nobody is asked to abort.
    assert_eq!(count_users(&leader), 1);
    assert_eq!(
        leader
            .store
            .transaction_status(&response.transaction_id)
            .unwrap(),
        Some(TxStatus::Committed)
    );
    assert_eq!(refusing_aborts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_local_prepare_aborts_remotes() {
    let leader = spawn_participant(RPC_TIMEOUT).await;
    let follower = spawn_participant(RPC_TIMEOUT).await;
    form_cluster(&leader, &[&follower]);

    // UPDATE without a where clause fails validation on the leader before
    // any database work.
    let response = leader
        .coordinator
        .execute(json!({
            "table": "users",
            "operation": "UPDATE",
            "values": {"name": "nobody"}
        }))
        .await;

    assert!(!response.success);
    let error = response.error.unwrap_or_default();
    assert!(error.contains("(local)"), "got: {error}");

    assert_eq!(count_users(&leader), 0);
    assert_eq!(count_users(&follower), 0);
    assert!(!follower.store.is_pending(&response.transaction_id));
}

#[tokio::test]
async fn execute_without_participants_fails() {
    let membership = Arc::new(lockstep::cluster::Membership::new());
    let client = RpcClient::new(RPC_TIMEOUT).unwrap();
    let coordinator =
        lockstep::coordinator::Coordinator::new(membership, "lonely:1", None, client);

    let response = coordinator.execute(users_payload(1, "Ada")).await;

    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("No participants available"));
    assert!(!response.transaction_id.is_empty());
}

#[tokio::test]
async fn concurrent_executes_serialise_and_both_commit() {
    let leader = spawn_participant(RPC_TIMEOUT).await;
    let follower = spawn_participant(RPC_TIMEOUT).await;
    form_cluster(&leader, &[&follower]);

    let c1 = Arc::clone(&leader.coordinator);
    let c2 = Arc::clone(&leader.coordinator);
    let (r1, r2) = tokio::join!(
        c1.execute(users_payload(1, "Barbara")),
        c2.execute(users_payload(2, "Frances")),
    );

    assert!(r1.success, "{:?}", r1.error);
    assert!(r2.success, "{:?}", r2.error);
    assert_ne!(r1.transaction_id, r2.transaction_id);

    for node in [&leader, &follower] {
        assert_eq!(count_users(node), 2);
        for tx_id in [&r1.transaction_id, &r2.transaction_id] {
            assert_eq!(
                node.store.transaction_status(tx_id).unwrap(),
                Some(TxStatus::Committed)
            );
        }
    }
}

#[tokio::test]
async fn duplicate_prepare_is_rejected_over_the_wire() {
    let node = spawn_participant(RPC_TIMEOUT).await;
    let client = RpcClient::new(RPC_TIMEOUT).unwrap();

    let req = lockstep::protocol::PrepareRequest {
        transaction_id: "dup-1".to_string(),
        payload: users_payload(1, "Tony"),
    };

    let first = client.prepare(&node.addr, &req).await.unwrap();
    assert_eq!(first.status, lockstep::protocol::PrepareStatus::Ready);

    let second = client.prepare(&node.addr, &req).await.unwrap();
    assert_eq!(second.status, lockstep::protocol::PrepareStatus::Abort);
    assert!(second
        .error
        .unwrap_or_default()
        .contains("already in progress"));

    // Resolve the pending transaction so the node shuts down clean.
    client
        .abort(
            &node.addr,
            &lockstep::protocol::AbortRequest {
                transaction_id: "dup-1".to_string(),
            },
        )
        .await
        .unwrap();
}
