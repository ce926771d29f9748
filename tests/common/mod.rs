//! Shared fixtures for multi-node integration tests.
//!
//! `spawn_participant` boots a full node on an ephemeral port: a scratch
//! SQLite database seeded with a `users` table, a participant store, a
//! membership table containing only the node itself, and the complete HTTP
//! surface. Tests wire leaders and followers together by mutating the
//! returned membership handles, mirroring how the binary seeds its view
//! from configuration.

#![allow(dead_code)] // Each test binary uses a different subset.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::task::JoinHandle;

use lockstep::cluster::{Membership, NodeRecord};
use lockstep::coordinator::Coordinator;
use lockstep::server::build_router;
use lockstep::state::AppState;
use lockstep::store::ParticipantStore;
use lockstep::transport::RpcClient;

pub struct TestNode {
    pub addr: String,
    pub db_path: PathBuf,
    pub store: Arc<ParticipantStore>,
    pub membership: Arc<Membership>,
    pub coordinator: Arc<Coordinator>,
    _dir: TempDir,
    server: JoinHandle<()>,
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Boot a node with a real store and HTTP surface on an ephemeral port.
///
/// `rpc_timeout` configures the node's own coordinator client, which only
/// matters for the node acting as leader.
pub async fn spawn_participant(rpc_timeout: Duration) -> TestNode {
    let dir = TempDir::new().expect("create temp dir");
    let db_path = dir.path().join("node.db");

    let conn = rusqlite::Connection::open(&db_path).expect("open scratch db");
    conn.execute("CREATE TABLE users (id INTEGER, name TEXT)", [])
        .expect("create users table");
    drop(conn);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr").to_string();

    let store = Arc::new(ParticipantStore::open(&addr, &db_path).expect("open store"));
    let membership = Arc::new(Membership::new());
    membership.add_node(NodeRecord::with_store(&addr, Arc::clone(&store)));

    let client = RpcClient::new(rpc_timeout).expect("build rpc client");
    let coordinator = Arc::new(Coordinator::new(
        Arc::clone(&membership),
        &addr,
        Some(Arc::clone(&store)),
        client.clone(),
    ));

    let state = AppState::new(
        &addr,
        Arc::clone(&membership),
        Arc::clone(&coordinator),
        Arc::clone(&store),
        client,
    );
    let app = build_router(state);
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    TestNode {
        addr,
        db_path,
        store,
        membership,
        coordinator,
        _dir: dir,
        server,
    }
}

/// Promote `leader` in its own view and teach it about the followers.
pub fn form_cluster(leader: &TestNode, followers: &[&TestNode]) {
    for follower in followers {
        leader
            .membership
            .add_node(NodeRecord::new(follower.addr.clone()));
    }
    leader.membership.set_leader(Some(&leader.addr));
}

/// Count rows in a node's `users` table through a fresh connection.
pub fn count_users(node: &TestNode) -> i64 {
    let conn = rusqlite::Connection::open(&node.db_path).expect("open scratch db");
    conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
        .expect("count users")
}
