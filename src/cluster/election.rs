//! Deterministic leader election.
//!
//! The leader is the lexicographically smallest address among live members;
//! with no live member there is no leader. Election is a pure function of
//! the membership snapshot, so every node that sees the same liveness view
//! picks the same leader without any message exchange.

use crate::protocol::NodeRole;

use super::{Membership, MembershipInner};

impl Membership {
    /// Run the election against the current view.
    ///
    /// Resets every record's role to follower, then promotes the smallest
    /// live address (if any) and updates the leader pointer. Returns whether
    /// the leader changed.
    pub fn run_election(&self) -> bool {
        let mut inner = self.write_inner();
        elect_locked(&mut inner)
    }

    /// Demote a dead leader, then re-run the selection.
    ///
    /// This is the sole path that changes the leader pointer during normal
    /// operation; the heartbeat loop and the membership mutators call it
    /// after every change in the liveness view. Returns whether the leader
    /// changed.
    pub fn check_and_elect(&self) -> bool {
        let mut inner = self.write_inner();

        let mut current = inner.leader.clone();
        if let Some(addr) = &current {
            let dead = inner.nodes.get(addr).map(|n| !n.alive).unwrap_or(true);
            if dead {
                tracing::warn!(leader = %addr, "leader is dead, triggering election");
                if let Some(node) = inner.nodes.get_mut(addr) {
                    node.role = NodeRole::Follower;
                }
                inner.leader = None;
                current = None;
            }
        }

        let lowest = lowest_live_locked(&inner);
        let Some(lowest) = lowest else {
            // Nothing left to elect.
            if let Some(addr) = inner.leader.take() {
                if let Some(node) = inner.nodes.get_mut(&addr) {
                    node.role = NodeRole::Follower;
                }
            }
            return false;
        };

        if current.as_deref() != Some(lowest.as_str()) {
            return elect_locked(&mut inner);
        }

        false
    }
}

/// Smallest live address in the table, if any.
fn lowest_live_locked(inner: &MembershipInner) -> Option<String> {
    inner
        .nodes
        .values()
        .filter(|n| n.alive)
        .map(|n| n.addr.as_str())
        .min()
        .map(str::to_string)
}

/// Promote the smallest live address and demote everyone else.
fn elect_locked(inner: &mut MembershipInner) -> bool {
    let previous = inner.leader.clone();

    let Some(lowest) = lowest_live_locked(inner) else {
        tracing::info!("no live nodes, no leader elected");
        for node in inner.nodes.values_mut() {
            node.role = NodeRole::Follower;
        }
        inner.leader = None;
        return false;
    };

    for node in inner.nodes.values_mut() {
        node.role = NodeRole::Follower;
    }
    if let Some(node) = inner.nodes.get_mut(&lowest) {
        node.role = NodeRole::Leader;
    }
    inner.leader = Some(lowest.clone());

    let changed = previous.as_deref() != Some(lowest.as_str());
    if changed {
        tracing::info!(leader = %lowest, "elected new leader");
    }
    changed
}
