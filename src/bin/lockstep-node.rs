//! Lockstep node binary - cluster node entry point.
//!
//! Every node runs this binary: it opens the local datasource, seeds the
//! membership table from `--nodes`, runs an initial election, starts the
//! heartbeat loop, and serves the full RPC surface. The deterministic
//! election decides which node acts as leader; the leader-only transaction
//! endpoint is gated by role at request time, so no separate leader binary
//! exists.
//!
//! # Usage
//!
//! ```bash
//! lockstep-node --addr localhost:8080 \
//!     --nodes localhost:8080,localhost:8081,localhost:8082 \
//!     --dsn data/node-8080.db
//! ```
//!
//! Exit is zero on clean SIGINT/SIGTERM shutdown; bind or datasource
//! failures at startup exit non-zero.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use lockstep::cluster::heartbeat::HeartbeatMonitor;
use lockstep::cluster::{Membership, NodeRecord};
use lockstep::config;
use lockstep::coordinator::Coordinator;
use lockstep::server::build_router;
use lockstep::state::AppState;
use lockstep::store::ParticipantStore;
use lockstep::transport::RpcClient;

#[derive(Debug, Parser)]
#[command(name = "lockstep-node", about = "Lockstep cluster node")]
struct Args {
    /// Address to bind; doubles as this node's identity in the cluster.
    #[arg(long, default_value = "localhost:8080")]
    addr: String,

    /// Comma-separated initial membership, including this node.
    #[arg(long)]
    nodes: Option<String>,

    /// Seconds between heartbeat sweeps.
    #[arg(long, default_value_t = config::DEFAULT_HEARTBEAT_SECS)]
    heartbeat: u64,

    /// Per-RPC timeout inside the coordinator, in seconds.
    #[arg(long = "coord-timeout", default_value_t = config::DEFAULT_COORD_TIMEOUT_SECS)]
    coord_timeout: u64,

    /// Datasource for the local store; falls back to the POSTGRES_DSN
    /// environment variable.
    #[arg(long)]
    dsn: Option<String>,

    /// Display name for this node.
    #[arg(long)]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let dsn = config::resolve_dsn(args.dsn).context("resolve datasource")?;
    let peers = config::parse_peers(args.nodes.as_deref().unwrap_or(""));

    let store = Arc::new(
        ParticipantStore::open(&args.addr, &dsn)
            .with_context(|| format!("open datasource {dsn}"))?,
    );

    let membership = Arc::new(Membership::new());
    let mut local =
        NodeRecord::with_store(&args.addr, Arc::clone(&store)).with_database(config::mask_dsn(&dsn));
    if let Some(name) = &args.name {
        local = local.named(name.clone());
    }
    membership.add_node(local);
    for peer in &peers {
        if peer != &args.addr {
            membership.add_node(NodeRecord::new(peer.clone()));
        }
    }

    let client =
        RpcClient::new(Duration::from_secs(args.coord_timeout)).context("build rpc client")?;
    let coordinator = Arc::new(Coordinator::new(
        Arc::clone(&membership),
        &args.addr,
        Some(Arc::clone(&store)),
        client.clone(),
    ));

    // Initial election from the configured view; the heartbeat loop refines
    // it as liveness changes.
    membership.check_and_elect();

    let heartbeat = HeartbeatMonitor::new(
        Arc::clone(&membership),
        Duration::from_secs(args.heartbeat),
    )
    .context("build heartbeat monitor")?;
    heartbeat.start();

    let state = AppState::new(&args.addr, membership, coordinator, store, client);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&args.addr)
        .await
        .with_context(|| format!("bind {}", args.addr))?;
    tracing::info!(addr = %args.addr, peers = ?peers, "node listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;

    heartbeat.stop().await;
    tracing::info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install sigterm handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
