//! Request handlers for the node's RPC surface.
//!
//! Handlers decode JSON bodies, call into the participant store, membership
//! table, or coordinator, and answer with a status code reflecting server vs
//! client fault. Role strings on the wire stay `MASTER` / `SLAVE`.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use futures::future::join_all;
use serde::Deserialize;

use crate::protocol::{
    AbortRequest, AbortResponse, AddNodeRequest, AddNodeResponse, ClusterInfoResponse,
    CommitRequest, CommitResponse, HealthResponse, JoinRequest, JoinResponse, NodeInfo,
    NodeMetrics, NodeRole, PrepareRequest, PrepareResponse, PrepareStatus, RemoveNodeRequest,
    RemoveNodeResponse, RoleResponse, SetNameRequest, SetNameResponse, TransactionListResponse,
    TransactionRequest, TransactionResponse,
};
use crate::cluster::NodeRecord;
use crate::state::AppState;

fn local_role(state: &AppState) -> NodeRole {
    state
        .membership
        .get(&state.local_addr)
        .map(|n| n.role)
        .unwrap_or(NodeRole::Follower)
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "OK".to_string(),
        address: state.local_addr.clone(),
        role: local_role(&state).as_str().to_string(),
    })
}

/// `GET /role`
pub async fn role(State(state): State<AppState>) -> impl IntoResponse {
    Json(RoleResponse {
        role: local_role(&state).as_str().to_string(),
        address: state.local_addr.clone(),
    })
}

/// `GET /metrics`
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.metrics())
}

/// `POST /prepare`
pub async fn prepare(
    State(state): State<AppState>,
    Json(req): Json<PrepareRequest>,
) -> impl IntoResponse {
    tracing::info!(tx_id = %req.transaction_id, "received prepare request");

    match state.store.prepare(&req.transaction_id, &req.payload) {
        Ok(()) => (
            StatusCode::OK,
            Json(PrepareResponse {
                status: PrepareStatus::Ready,
                error: None,
            }),
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(PrepareResponse {
                status: PrepareStatus::Abort,
                error: Some(err.to_string()),
            }),
        ),
    }
}

/// `POST /commit`
pub async fn commit(
    State(state): State<AppState>,
    Json(req): Json<CommitRequest>,
) -> impl IntoResponse {
    tracing::info!(tx_id = %req.transaction_id, "received commit request");

    match state.store.commit(&req.transaction_id) {
        Ok(()) => (
            StatusCode::OK,
            Json(CommitResponse {
                success: true,
                error: None,
            }),
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(CommitResponse {
                success: false,
                error: Some(err.to_string()),
            }),
        ),
    }
}

/// `POST /abort`
pub async fn abort(
    State(state): State<AppState>,
    Json(req): Json<AbortRequest>,
) -> impl IntoResponse {
    tracing::info!(tx_id = %req.transaction_id, "received abort request");

    match state.store.abort(&req.transaction_id) {
        Ok(()) => (
            StatusCode::OK,
            Json(AbortResponse {
                success: true,
                error: None,
            }),
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(AbortResponse {
                success: false,
                error: Some(err.to_string()),
            }),
        ),
    }
}

/// `POST /transaction` - leader-only entry point for distributed writes.
pub async fn transaction(
    State(state): State<AppState>,
    Json(req): Json<TransactionRequest>,
) -> impl IntoResponse {
    if local_role(&state) != NodeRole::Leader {
        return (
            StatusCode::BAD_REQUEST,
            Json(TransactionResponse {
                transaction_id: String::new(),
                success: false,
                message: None,
                error: Some("This node is not the master".to_string()),
            }),
        );
    }

    tracing::info!("received transaction request");
    let response = state.coordinator.execute(req.payload).await;
    let code = if response.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (code, Json(response))
}

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub status: Option<String>,
}

/// `GET /transactions` - audit-table listing, proxied when another node's
/// address is requested.
pub async fn transactions(
    State(state): State<AppState>,
    Query(query): Query<TransactionsQuery>,
) -> impl IntoResponse {
    let page = query.page.unwrap_or(1);
    let limit = query.limit.unwrap_or(0);
    let target = query
        .address
        .clone()
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| state.local_addr.clone());

    if target != state.local_addr {
        return match state
            .client
            .transactions(&target, page, limit, query.status.as_deref())
            .await
        {
            Ok(listing) => (StatusCode::OK, Json(listing)).into_response(),
            Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
        };
    }

    match state
        .store
        .list_transactions(page, limit, query.status.as_deref())
    {
        Ok((transactions, total)) => (
            StatusCode::OK,
            Json(TransactionListResponse {
                transactions,
                total,
                page,
                limit,
                address: target,
                has_db: state.store.has_datasource(),
            }),
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

/// `POST /cluster/join` - a node announcing itself to the cluster.
pub async fn cluster_join(
    State(state): State<AppState>,
    Json(req): Json<JoinRequest>,
) -> impl IntoResponse {
    if req.address.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(JoinResponse {
                success: false,
                master_addr: String::new(),
                cluster_nodes: Vec::new(),
                error: Some("Address is required".to_string()),
            }),
        );
    }

    state.membership.add_node(NodeRecord::new(req.address.clone()));
    state.membership.check_and_elect();
    tracing::info!(addr = %req.address, "node joined the cluster");

    (
        StatusCode::OK,
        Json(JoinResponse {
            success: true,
            master_addr: state.membership.leader_addr().unwrap_or_default(),
            cluster_nodes: state.membership.sorted_addresses(),
            error: None,
        }),
    )
}

/// `POST /cluster/add` - admin: register a node.
pub async fn cluster_add(
    State(state): State<AppState>,
    Json(req): Json<AddNodeRequest>,
) -> impl IntoResponse {
    if req.address.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(AddNodeResponse {
                success: false,
                error: Some("Address is required".to_string()),
            }),
        );
    }

    let mut record = NodeRecord::new(req.address.clone());
    if let Some(name) = req.name.filter(|n| !n.is_empty()) {
        record = record.named(name);
    }
    if let Some(database) = req.database.filter(|d| !d.is_empty()) {
        record = record.with_database(database);
    }
    state.membership.add_node(record);
    state.membership.check_and_elect();
    tracing::info!(addr = %req.address, "added node to cluster");

    (
        StatusCode::OK,
        Json(AddNodeResponse {
            success: true,
            error: None,
        }),
    )
}

/// `POST /cluster/remove` - admin: remove a node.
pub async fn cluster_remove(
    State(state): State<AppState>,
    Json(req): Json<RemoveNodeRequest>,
) -> impl IntoResponse {
    if req.address.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(RemoveNodeResponse {
                success: false,
                error: Some("Address is required".to_string()),
            }),
        );
    }

    state.membership.remove_node(&req.address);
    state.membership.check_and_elect();
    tracing::info!(addr = %req.address, "removed node from cluster");

    (
        StatusCode::OK,
        Json(RemoveNodeResponse {
            success: true,
            error: None,
        }),
    )
}

/// `POST /cluster/name` - admin: set a node's display name.
pub async fn cluster_name(
    State(state): State<AppState>,
    Json(req): Json<SetNameRequest>,
) -> impl IntoResponse {
    if req.address.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(SetNameResponse {
                success: false,
                error: Some("Address is required".to_string()),
            }),
        );
    }

    if !state.membership.set_node_name(&req.address, &req.name) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(SetNameResponse {
                success: false,
                error: Some(format!("node {} not found", req.address)),
            }),
        );
    }

    (
        StatusCode::OK,
        Json(SetNameResponse {
            success: true,
            error: None,
        }),
    )
}

/// `GET /cluster/nodes` (and `/cluster/summary`) - membership view with
/// per-node telemetry.
///
/// Metrics come straight from the local store for the local node and are
/// fetched over RPC for remotes; a fetch failure leaves that node's counters
/// zeroed rather than failing the whole view.
pub async fn cluster_nodes(State(state): State<AppState>) -> impl IntoResponse {
    let addrs = state.membership.sorted_addresses();

    let infos = join_all(addrs.into_iter().filter_map(|addr| {
        let record = state.membership.get(&addr)?;
        let state = state.clone();
        Some(async move {
            let metrics = if record.addr == state.local_addr {
                state.store.metrics()
            } else {
                state
                    .client
                    .metrics(&record.addr)
                    .await
                    .unwrap_or_else(|_| NodeMetrics::default())
            };

            NodeInfo {
                name: record.name.clone(),
                address: record.addr.clone(),
                role: record.role.as_str().to_string(),
                alive: record.alive,
                database: record.database.clone(),
                metrics,
            }
        })
    }))
    .await;

    Json(ClusterInfoResponse {
        master_addr: state.membership.leader_addr().unwrap_or_default(),
        nodes: infos,
        generated_at: Utc::now(),
    })
}
