//! Heartbeat loop: periodic liveness probing.
//!
//! Each tick snapshots the membership table, probes every member's `/health`
//! endpoint in parallel with a short timeout, records liveness transitions,
//! and re-runs the election. Stop is cooperative: the loop finishes the
//! in-flight sweep before exiting.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::transport::{RpcClient, TransportError};

use super::Membership;

/// Probe timeout, independent of (and much shorter than) the coordinator's
/// RPC timeout.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default interval between sweeps.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Periodic liveness prober for the whole membership table.
pub struct HeartbeatMonitor {
    membership: Arc<Membership>,
    client: RpcClient,
    interval: Duration,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatMonitor {
    /// Build a monitor that sweeps every `interval`.
    pub fn new(membership: Arc<Membership>, interval: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            membership,
            client: RpcClient::new(PROBE_TIMEOUT)?,
            interval,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    /// Start the loop. The first sweep runs immediately.
    pub fn start(&self) {
        let membership = Arc::clone(&self.membership);
        let client = self.client.clone();
        let interval = self.interval;
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => sweep(&membership, &client).await,
                    _ = cancel.cancelled() => break,
                }
            }
        });

        *self.task.lock() = Some(handle);
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "heartbeat started");
    }

    /// Stop the loop, draining the in-flight sweep.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        tracing::info!("heartbeat stopped");
    }

    /// Probe one node immediately and return its resulting liveness.
    pub async fn check_node(&self, addr: &str) -> bool {
        probe(&self.membership, &self.client, addr).await;
        self.membership.get(addr).map(|n| n.alive).unwrap_or(false)
    }
}

/// One full sweep: probe everyone, then re-run the election.
///
/// The election observes only the liveness values set by probes that
/// completed in this sweep; a probe racing in from a manual check lands in
/// the next cycle.
pub async fn sweep(membership: &Arc<Membership>, client: &RpcClient) {
    let nodes = membership.all();
    if nodes.is_empty() {
        return;
    }

    join_all(
        nodes
            .iter()
            .map(|node| probe(membership, client, &node.addr)),
    )
    .await;

    membership.check_and_elect();
}

async fn probe(membership: &Arc<Membership>, client: &RpcClient, addr: &str) {
    match client.health(addr).await {
        Ok(_) => {
            if membership.set_alive(addr, true) == Some(false) {
                tracing::info!(%addr, "node is now alive");
            }
        }
        Err(err) => {
            if membership.set_alive(addr, false) == Some(true) {
                tracing::warn!(%addr, error = %err, "node is now dead");
            }
        }
    }
}
