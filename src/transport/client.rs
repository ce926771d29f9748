//! Outbound JSON-over-HTTP client.
//!
//! Failure modes are transport errors (connect, timeout), non-success
//! response codes on reads, and body-level error fields, which the callers
//! interpret. The retry wrapper applies only to idempotent reads; prepare,
//! commit, and abort are issued exactly once per coordinator phase, so a
//! lost response is surfaced rather than replayed.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use snafu::{ResultExt, Snafu};

use crate::protocol::{
    AbortRequest, AbortResponse, AddNodeRequest, AddNodeResponse, ClusterInfoResponse,
    CommitRequest, CommitResponse, HealthResponse, JoinRequest, JoinResponse, NodeMetrics,
    PrepareRequest, PrepareResponse, RemoveNodeRequest, RemoveNodeResponse, RoleResponse,
    SetNameRequest, SetNameResponse, TransactionListResponse, TransactionRequest,
    TransactionResponse,
};

/// Transport-level errors.
#[derive(Debug, Snafu)]
pub enum TransportError {
    #[snafu(display("failed to build http client: {source}"))]
    Build { source: reqwest::Error },

    #[snafu(display("request to {url} failed: {source}"))]
    Request { url: String, source: reqwest::Error },

    #[snafu(display("{url} answered with status {code}"))]
    Status { url: String, code: u16 },

    #[snafu(display("failed to decode response from {url}: {source}"))]
    Decode { url: String, source: reqwest::Error },
}

/// JSON RPC client with a fixed per-request timeout.
#[derive(Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl RpcClient {
    /// Build a client whose every request times out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context(BuildSnafu)?;
        Ok(Self {
            http,
            max_retries: 0,
            retry_delay: Duration::ZERO,
        })
    }

    /// Enable retry-with-backoff for idempotent reads.
    ///
    /// Retries never apply to prepare/commit/abort: replaying those would
    /// break the at-most-one finalisation contract.
    pub fn with_retry(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Probe a node's health.
    pub async fn health(&self, addr: &str) -> Result<HealthResponse, TransportError> {
        self.get_json(addr, "health").await
    }

    /// Fetch a node's current role.
    pub async fn role(&self, addr: &str) -> Result<RoleResponse, TransportError> {
        self.get_json(addr, "role").await
    }

    /// Fetch a node's transaction counters.
    pub async fn metrics(&self, addr: &str) -> Result<NodeMetrics, TransportError> {
        self.get_json(addr, "metrics").await
    }

    /// Fetch membership and telemetry from a node.
    pub async fn cluster_info(&self, addr: &str) -> Result<ClusterInfoResponse, TransportError> {
        self.get_json(addr, "cluster/nodes").await
    }

    /// Fetch a page of a node's audit table.
    pub async fn transactions(
        &self,
        addr: &str,
        page: u32,
        limit: u32,
        status: Option<&str>,
    ) -> Result<TransactionListResponse, TransportError> {
        let mut path = format!("transactions?page={page}&limit={limit}");
        if let Some(status) = status {
            path.push_str("&status=");
            path.push_str(status);
        }
        self.get_json(addr, &path).await
    }

    /// Send a prepare request. The response body is decoded even on a 5xx
    /// status; the participant reports its refusal inside it.
    pub async fn prepare(
        &self,
        addr: &str,
        req: &PrepareRequest,
    ) -> Result<PrepareResponse, TransportError> {
        self.post_json(addr, "prepare", req).await
    }

    /// Send a commit request.
    pub async fn commit(
        &self,
        addr: &str,
        req: &CommitRequest,
    ) -> Result<CommitResponse, TransportError> {
        self.post_json(addr, "commit", req).await
    }

    /// Send an abort request.
    pub async fn abort(
        &self,
        addr: &str,
        req: &AbortRequest,
    ) -> Result<AbortResponse, TransportError> {
        self.post_json(addr, "abort", req).await
    }

    /// Submit a transaction to the leader.
    pub async fn start_transaction(
        &self,
        leader_addr: &str,
        req: &TransactionRequest,
    ) -> Result<TransactionResponse, TransportError> {
        self.post_json(leader_addr, "transaction", req).await
    }

    /// Ask a node to admit us into its cluster view.
    pub async fn join(&self, addr: &str, req: &JoinRequest) -> Result<JoinResponse, TransportError> {
        self.post_json(addr, "cluster/join", req).await
    }

    /// Register a node with the cluster.
    pub async fn add_node(
        &self,
        addr: &str,
        req: &AddNodeRequest,
    ) -> Result<AddNodeResponse, TransportError> {
        self.post_json(addr, "cluster/add", req).await
    }

    /// Remove a node from the cluster.
    pub async fn remove_node(
        &self,
        addr: &str,
        req: &RemoveNodeRequest,
    ) -> Result<RemoveNodeResponse, TransportError> {
        self.post_json(addr, "cluster/remove", req).await
    }

    /// Set a node's display name.
    pub async fn set_node_name(
        &self,
        addr: &str,
        req: &SetNameRequest,
    ) -> Result<SetNameResponse, TransportError> {
        self.post_json(addr, "cluster/name", req).await
    }

    /// GET with optional retry; non-2xx is an error.
    async fn get_json<T: DeserializeOwned>(
        &self,
        addr: &str,
        path: &str,
    ) -> Result<T, TransportError> {
        let url = format!("http://{addr}/{path}");
        let attempts = self.max_retries + 1;
        let mut last_err = None;

        for attempt in 0..attempts {
            if attempt > 0 && !self.retry_delay.is_zero() {
                tokio::time::sleep(self.retry_delay).await;
            }

            match self.http.get(&url).send().await {
                Ok(response) => {
                    let code = response.status();
                    if code.is_success() {
                        return response
                            .json::<T>()
                            .await
                            .context(DecodeSnafu { url: url.clone() });
                    }
                    last_err = Some(TransportError::Status {
                        url: url.clone(),
                        code: code.as_u16(),
                    });
                    // Client-fault statuses will not get better on retry.
                    if !code.is_server_error() {
                        break;
                    }
                }
                Err(source) => {
                    last_err = Some(TransportError::Request {
                        url: url.clone(),
                        source,
                    });
                }
            }
        }

        Err(last_err.unwrap_or(TransportError::Status { url, code: 0 }))
    }

    /// POST once and decode the body regardless of the status code; the
    /// body carries the success/error verdict.
    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        addr: &str,
        path: &str,
        body: &B,
    ) -> Result<T, TransportError> {
        let url = format!("http://{addr}/{path}");
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .context(RequestSnafu { url: url.clone() })?;

        response.json::<T>().await.context(DecodeSnafu { url })
    }
}
