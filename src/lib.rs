//! Lockstep: atomic multi-node database writes over two-phase commit.
//!
//! A small cluster of peer nodes, each backing a distinct relational store,
//! accepts insert/update payloads that must take effect on every live
//! participant or on none. The crate provides the coordination plane:
//! deterministic leader election over a fixed membership with liveness
//! tracked by heartbeats, the 2PC state machine the leader drives against
//! itself and all live peers, and the per-participant prepared-transaction
//! store that binds an in-progress database transaction to a durable audit
//! row.
//!
//! The pieces compose in `bin/lockstep-node`: every node runs the same
//! binary, serves the full RPC surface, and may become leader at any time.

/// Cluster membership, election, and the heartbeat loop.
pub mod cluster;
/// Configuration parsing and datasource resolution.
pub mod config;
/// The two-phase commit coordinator.
pub mod coordinator;
/// Wire message types and role/state enums.
pub mod protocol;
/// HTTP router and request handlers.
pub mod server;
/// Shared per-process application state.
pub mod state;
/// The per-node participant store.
pub mod store;
/// Outbound RPC client.
pub mod transport;

pub use cluster::heartbeat::HeartbeatMonitor;
pub use cluster::{Membership, NodeRecord};
pub use coordinator::Coordinator;
pub use server::build_router;
pub use state::AppState;
pub use store::{ParticipantStore, StoreError};
pub use transport::{RpcClient, TransportError};
