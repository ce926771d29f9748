//! Axum router wiring the RPC surface.
//!
//! Routes:
//! - `GET  /health` - liveness probe, answers with address and role
//! - `GET  /role` - current role
//! - `GET  /metrics` - local transaction counters
//! - `POST /prepare` - 2PC prepare phase
//! - `POST /commit` - 2PC commit phase
//! - `POST /abort` - 2PC abort
//! - `POST /transaction` - start a distributed transaction (leader only)
//! - `GET  /transactions` - paginated audit-table listing, proxied by address
//! - `POST /cluster/join` - a node announcing itself
//! - `POST /cluster/add` - admin: add a node
//! - `POST /cluster/remove` - admin: remove a node
//! - `POST /cluster/name` - admin: set a node's display name
//! - `GET  /cluster/nodes` - membership and telemetry
//! - `GET  /cluster/summary` - alias of /cluster/nodes

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

use super::handlers;

/// Build the complete router for one node.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/role", get(handlers::role))
        .route("/metrics", get(handlers::metrics))
        .route("/prepare", post(handlers::prepare))
        .route("/commit", post(handlers::commit))
        .route("/abort", post(handlers::abort))
        .route("/transaction", post(handlers::transaction))
        .route("/transactions", get(handlers::transactions))
        .route("/cluster/join", post(handlers::cluster_join))
        .route("/cluster/add", post(handlers::cluster_add))
        .route("/cluster/remove", post(handlers::cluster_remove))
        .route("/cluster/name", post(handlers::cluster_name))
        .route("/cluster/nodes", get(handlers::cluster_nodes))
        .route("/cluster/summary", get(handlers::cluster_nodes))
        .with_state(state)
}
