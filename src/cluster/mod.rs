//! Cluster membership: the shared table of known peers.
//!
//! Every node keeps a membership table mapping peer addresses to node
//! records annotated with role and liveness. Mutators and readers serialise
//! on one reader-writer lock; read accessors hand out cloned snapshots so
//! callers never observe a half-applied mutation.

pub mod election;
pub mod heartbeat;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::protocol::NodeRole;
use crate::store::ParticipantStore;

/// One known peer.
///
/// The address doubles as the node's identity and its election key. At any
/// instant at most one record in the table carries [`NodeRole::Leader`].
#[derive(Clone)]
pub struct NodeRecord {
    pub addr: String,
    pub role: NodeRole,
    pub alive: bool,
    pub name: Option<String>,
    pub database: Option<String>,
    pub store: Option<Arc<ParticipantStore>>,
}

impl NodeRecord {
    /// A remote peer, assumed alive until the heartbeat loop says otherwise.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            role: NodeRole::Follower,
            alive: true,
            name: None,
            database: None,
            store: None,
        }
    }

    /// The local node, carrying a handle to its participant store.
    pub fn with_store(addr: impl Into<String>, store: Arc<ParticipantStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::new(addr)
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }
}

impl std::fmt::Debug for NodeRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRecord")
            .field("addr", &self.addr)
            .field("role", &self.role)
            .field("alive", &self.alive)
            .field("name", &self.name)
            .field("database", &self.database)
            .field("store", &self.store.is_some())
            .finish()
    }
}

#[derive(Default)]
pub(crate) struct MembershipInner {
    pub(crate) nodes: HashMap<String, NodeRecord>,
    pub(crate) leader: Option<String>,
}

/// The membership table.
#[derive(Default)]
pub struct Membership {
    inner: RwLock<MembershipInner>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a node record. The address is canonicalised by
    /// trimming whitespace.
    pub fn add_node(&self, mut record: NodeRecord) {
        record.addr = record.addr.trim().to_string();
        if record.addr.is_empty() {
            return;
        }

        let mut inner = self.inner.write();
        inner.nodes.insert(record.addr.clone(), record);
    }

    /// Remove a node. Removing the current leader clears the leader pointer;
    /// a subsequent election is expected.
    pub fn remove_node(&self, addr: &str) {
        let mut inner = self.inner.write();
        if inner.nodes.remove(addr).is_some() && inner.leader.as_deref() == Some(addr) {
            inner.leader = None;
        }
    }

    /// Snapshot of one node record.
    pub fn get(&self, addr: &str) -> Option<NodeRecord> {
        self.inner.read().nodes.get(addr).cloned()
    }

    /// Snapshot of every node record.
    pub fn all(&self) -> Vec<NodeRecord> {
        self.inner.read().nodes.values().cloned().collect()
    }

    /// Snapshot of the live nodes.
    pub fn live(&self) -> Vec<NodeRecord> {
        self.inner
            .read()
            .nodes
            .values()
            .filter(|n| n.alive)
            .cloned()
            .collect()
    }

    /// Snapshot of the live non-leader nodes: the remote participant set for
    /// a transaction.
    pub fn live_followers(&self) -> Vec<NodeRecord> {
        self.inner
            .read()
            .nodes
            .values()
            .filter(|n| n.alive && n.role == NodeRole::Follower)
            .cloned()
            .collect()
    }

    /// Snapshot of the current leader, if any.
    pub fn leader(&self) -> Option<NodeRecord> {
        let inner = self.inner.read();
        inner
            .leader
            .as_ref()
            .and_then(|addr| inner.nodes.get(addr))
            .cloned()
    }

    /// Address of the current leader, if any.
    pub fn leader_addr(&self) -> Option<String> {
        self.inner.read().leader.clone()
    }

    /// Whether the current leader exists and is live.
    pub fn is_leader_alive(&self) -> bool {
        let inner = self.inner.read();
        inner
            .leader
            .as_ref()
            .and_then(|addr| inner.nodes.get(addr))
            .map(|n| n.alive)
            .unwrap_or(false)
    }

    /// Point the table at a new leader, demoting the previous one. Passing
    /// an address not present in the table clears the pointer.
    pub fn set_leader(&self, addr: Option<&str>) {
        let mut inner = self.inner.write();

        if let Some(prev) = inner.leader.take() {
            if let Some(node) = inner.nodes.get_mut(&prev) {
                node.role = NodeRole::Follower;
            }
        }

        if let Some(addr) = addr {
            if let Some(node) = inner.nodes.get_mut(addr) {
                node.role = NodeRole::Leader;
                inner.leader = Some(addr.to_string());
            }
        }
    }

    /// All known addresses, sorted.
    pub fn sorted_addresses(&self) -> Vec<String> {
        let mut addrs: Vec<String> = self.inner.read().nodes.keys().cloned().collect();
        addrs.sort();
        addrs
    }

    /// Number of known nodes.
    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().nodes.is_empty()
    }

    /// Update a node's liveness. Returns the previous value, or `None` when
    /// the node is unknown.
    pub fn set_alive(&self, addr: &str, alive: bool) -> Option<bool> {
        let mut inner = self.inner.write();
        let node = inner.nodes.get_mut(addr)?;
        let was = node.alive;
        node.alive = alive;
        Some(was)
    }

    /// Set a node's display name. Returns false when the node is unknown.
    pub fn set_node_name(&self, addr: &str, name: &str) -> bool {
        let mut inner = self.inner.write();
        match inner.nodes.get_mut(addr) {
            Some(node) => {
                node.name = Some(name.to_string());
                true
            }
            None => false,
        }
    }

    pub(crate) fn write_inner(&self) -> parking_lot::RwLockWriteGuard<'_, MembershipInner> {
        self.inner.write()
    }
}
