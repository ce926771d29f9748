//! The two-phase commit coordinator.
//!
//! The leader drives one transaction at a time: prepare every live
//! participant in parallel, decide, then commit the prepared set or abort
//! everyone that was sent a prepare. The coordinator holds a process-wide
//! mutex for the duration of an `execute` call, so concurrent submissions
//! queue; that keeps the local participant's pending map free of id
//! collisions.
//!
//! The decision itself is not persisted. A leader crash between the decision
//! and the finalisation fan-out leaves prepared remotes holding database
//! locks; operators resolve those by inspecting the audit tables.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use uuid::Uuid;

use crate::cluster::Membership;
use crate::protocol::{
    AbortRequest, CommitRequest, PrepareRequest, PrepareStatus, TransactionResponse,
};
use crate::store::ParticipantStore;
use crate::transport::RpcClient;

/// Drives the 2PC state machine on the current leader.
pub struct Coordinator {
    membership: Arc<Membership>,
    local_addr: String,
    local_store: Option<Arc<ParticipantStore>>,
    client: RpcClient,
    gate: tokio::sync::Mutex<()>,
}

impl Coordinator {
    /// Build a coordinator.
    ///
    /// The leader participates in its own transactions iff `local_store` is
    /// present.
    pub fn new(
        membership: Arc<Membership>,
        local_addr: impl Into<String>,
        local_store: Option<Arc<ParticipantStore>>,
        client: RpcClient,
    ) -> Self {
        Self {
            membership,
            local_addr: local_addr.into(),
            local_store,
            client,
            gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Run the full protocol for one payload.
    ///
    /// The returned response always carries the transaction id, even on
    /// failure, so the outcome can be correlated with participants' audit
    /// tables.
    pub async fn execute(&self, payload: Value) -> TransactionResponse {
        let _serialised = self.gate.lock().await;

        let tx_id = Uuid::new_v4().to_string();
        tracing::info!(%tx_id, "starting two-phase commit");

        // The remote participant set: live followers, excluding ourselves.
        let remotes: Vec<String> = self
            .membership
            .live_followers()
            .into_iter()
            .map(|n| n.addr)
            .filter(|addr| *addr != self.local_addr)
            .collect();

        let include_local = self.local_store.is_some();
        if remotes.is_empty() && !include_local {
            return TransactionResponse {
                transaction_id: tx_id,
                success: false,
                message: None,
                error: Some("No participants available".to_string()),
            };
        }

        tracing::info!(
            %tx_id,
            participants = remotes.len() + include_local as usize,
            include_local,
            "prepare phase"
        );

        // Prepare the local participant first so local validation rejects
        // quickly; semantically the prepares are concurrent.
        let mut local_prepared = false;
        let mut failed: Vec<String> = Vec::new();

        if let Some(store) = &self.local_store {
            match store.prepare(&tx_id, &payload) {
                Ok(()) => local_prepared = true,
                Err(err) => {
                    tracing::warn!(%tx_id, error = %err, "local prepare failed");
                    failed.push(format!("{} (local)", self.local_addr));
                }
            }
        }

        let prepare_req = PrepareRequest {
            transaction_id: tx_id.clone(),
            payload: payload.clone(),
        };
        let outcomes = join_all(remotes.iter().map(|addr| {
            let client = self.client.clone();
            let req = prepare_req.clone();
            async move {
                let ready = match client.prepare(addr, &req).await {
                    Ok(resp) => resp.status == PrepareStatus::Ready,
                    Err(err) => {
                        tracing::warn!(tx_id = %req.transaction_id, %addr, error = %err, "prepare rpc failed");
                        false
                    }
                };
                (addr.clone(), ready)
            }
        }))
        .await;

        let mut prepared_remotes: Vec<String> = Vec::new();
        for (addr, ready) in outcomes {
            if ready {
                prepared_remotes.push(addr);
            } else {
                failed.push(addr);
            }
        }

        if failed.is_empty() {
            self.commit_phase(&tx_id, local_prepared, &prepared_remotes)
                .await
        } else {
            self.abort_phase(&tx_id, local_prepared, &remotes, failed)
                .await
        }
    }

    /// Decision = commit: instruct every prepared participant to commit.
    ///
    /// Past this point failures are reported, never rolled back.
    async fn commit_phase(
        &self,
        tx_id: &str,
        local_prepared: bool,
        prepared_remotes: &[String],
    ) -> TransactionResponse {
        tracing::info!(tx_id, "all participants ready, committing");

        let mut all_committed = true;

        if local_prepared {
            if let Some(store) = &self.local_store {
                if let Err(err) = store.commit(tx_id) {
                    tracing::error!(tx_id, error = %err, "local commit failed");
                    all_committed = false;
                }
            }
        }

        let results = join_all(prepared_remotes.iter().map(|addr| {
            let client = self.client.clone();
            let req = CommitRequest {
                transaction_id: tx_id.to_string(),
            };
            async move {
                let ok = match client.commit(addr, &req).await {
                    Ok(resp) if resp.success => true,
                    Ok(resp) => {
                        tracing::error!(tx_id = %req.transaction_id, %addr, error = ?resp.error, "commit refused");
                        false
                    }
                    Err(err) => {
                        tracing::error!(tx_id = %req.transaction_id, %addr, error = %err, "commit rpc failed");
                        false
                    }
                };
                ok
            }
        }))
        .await;
        all_committed &= results.into_iter().all(|ok| ok);

        if all_committed {
            let total = prepared_remotes.len() + local_prepared as usize;
            TransactionResponse {
                transaction_id: tx_id.to_string(),
                success: true,
                message: Some(format!("Transaction committed on {total} nodes")),
                error: None,
            }
        } else {
            TransactionResponse {
                transaction_id: tx_id.to_string(),
                success: false,
                message: None,
                error: Some("Some commits failed".to_string()),
            }
        }
    }

    /// Decision = abort: instruct every participant that was sent a prepare,
    /// not only those that answered ready, so a participant whose response
    /// was lost still cleans up.
    async fn abort_phase(
        &self,
        tx_id: &str,
        local_prepared: bool,
        remotes: &[String],
        failed: Vec<String>,
    ) -> TransactionResponse {
        tracing::warn!(tx_id, failed = ?failed, "prepare failed, aborting");

        if local_prepared {
            if let Some(store) = &self.local_store {
                if let Err(err) = store.abort(tx_id) {
                    tracing::error!(tx_id, error = %err, "local abort failed");
                }
            }
        }

        join_all(remotes.iter().map(|addr| {
            let client = self.client.clone();
            let req = AbortRequest {
                transaction_id: tx_id.to_string(),
            };
            async move {
                match client.abort(addr, &req).await {
                    Ok(resp) if !resp.success => {
                        tracing::error!(tx_id = %req.transaction_id, %addr, error = ?resp.error, "abort refused");
                    }
                    Err(err) => {
                        tracing::error!(tx_id = %req.transaction_id, %addr, error = %err, "abort rpc failed");
                    }
                    Ok(_) => {}
                }
            }
        }))
        .await;

        TransactionResponse {
            transaction_id: tx_id.to_string(),
            success: false,
            message: None,
            error: Some(format!("Prepare failed for nodes: [{}]", failed.join(", "))),
        }
    }
}
