//! Wire protocol types shared by the coordinator, participants, and the
//! cluster admin surface.
//!
//! Every request/response body exchanged between nodes lives here, together
//! with the role and transaction-state enums. Role strings on the wire are the
//! literal `MASTER` / `SLAVE` for backward compatibility with existing
//! tooling; internally we talk about leaders and followers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a node in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    /// The single coordinator role at any instant.
    #[serde(rename = "MASTER")]
    Leader,
    /// Passive participant role.
    #[serde(rename = "SLAVE")]
    Follower,
}

impl NodeRole {
    /// The wire-compatible string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Leader => "MASTER",
            NodeRole::Follower => "SLAVE",
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable status of a transaction in a participant's audit table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    /// The data write is applied inside a still-open database transaction.
    #[serde(rename = "PREPARED")]
    Prepared,
    /// The database transaction was committed.
    #[serde(rename = "COMMITTED")]
    Committed,
    /// The database transaction was rolled back.
    #[serde(rename = "ABORTED")]
    Aborted,
}

impl TxStatus {
    /// The string stored in the audit table's `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Prepared => "PREPARED",
            TxStatus::Committed => "COMMITTED",
            TxStatus::Aborted => "ABORTED",
        }
    }

    /// Parse an audit-table status string.
    pub fn parse(s: &str) -> Option<TxStatus> {
        match s {
            "PREPARED" => Some(TxStatus::Prepared),
            "COMMITTED" => Some(TxStatus::Committed),
            "ABORTED" => Some(TxStatus::Aborted),
            _ => None,
        }
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the prepare phase reported by a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrepareStatus {
    /// The participant applied the write and holds an open transaction.
    #[serde(rename = "READY")]
    Ready,
    /// The participant could not prepare; the coordinator must abort.
    #[serde(rename = "ABORT")]
    Abort,
}

/// Prepare-phase request sent by the coordinator to every participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareRequest {
    pub transaction_id: String,
    pub payload: serde_json::Value,
}

/// Prepare-phase response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareResponse {
    pub status: PrepareStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Commit-phase request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRequest {
    pub transaction_id: String,
}

/// Commit-phase response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Abort request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbortRequest {
    pub transaction_id: String,
}

/// Abort response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbortResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Health probe response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub address: String,
    pub role: String,
}

/// Current role of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleResponse {
    pub role: String,
    pub address: String,
}

/// Client request to start a distributed transaction (leader only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub payload: serde_json::Value,
}

/// Result of a distributed transaction.
///
/// The transaction id is always present, even on failure, so operators can
/// correlate the outcome with participants' audit tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub transaction_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Request from a node asking to join the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub address: String,
}

/// Join response carrying the current cluster view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResponse {
    pub success: bool,
    pub master_addr: String,
    pub cluster_nodes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Admin request to add a node to the membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddNodeRequest {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

/// Admin response for add.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddNodeResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Admin request to remove a node from the membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveNodeRequest {
    pub address: String,
}

/// Admin response for remove.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveNodeResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Admin request to set a node's display name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetNameRequest {
    pub address: String,
    pub name: String,
}

/// Admin response for set-name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetNameResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-node transaction counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub prepared: u64,
    pub committed: u64,
    pub aborted: u64,
    pub failed: u64,
    pub in_flight: u64,
}

/// One node's entry in the cluster info view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub address: String,
    pub role: String,
    pub alive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default)]
    pub metrics: NodeMetrics,
}

/// Cluster membership and telemetry, as served by `/cluster/nodes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterInfoResponse {
    pub master_addr: String,
    pub nodes: Vec<NodeInfo>,
    pub generated_at: DateTime<Utc>,
}

/// One row of a participant's audit table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub tx_id: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Paginated audit-table listing, as served by `/transactions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionListResponse {
    pub transactions: Vec<TransactionRecord>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub address: String,
    pub has_db: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_strings_are_wire_compatible() {
        assert_eq!(NodeRole::Leader.as_str(), "MASTER");
        assert_eq!(NodeRole::Follower.as_str(), "SLAVE");
        assert_eq!(
            serde_json::to_string(&NodeRole::Leader).unwrap(),
            "\"MASTER\""
        );
        let role: NodeRole = serde_json::from_str("\"SLAVE\"").unwrap();
        assert_eq!(role, NodeRole::Follower);
    }

    #[test]
    fn prepare_response_omits_empty_error() {
        let ready = PrepareResponse {
            status: PrepareStatus::Ready,
            error: None,
        };
        assert_eq!(
            serde_json::to_string(&ready).unwrap(),
            "{\"status\":\"READY\"}"
        );

        let abort = PrepareResponse {
            status: PrepareStatus::Abort,
            error: Some("prepare failed".into()),
        };
        let json = serde_json::to_string(&abort).unwrap();
        assert!(json.contains("\"ABORT\""));
        assert!(json.contains("prepare failed"));
    }

    #[test]
    fn tx_status_round_trips() {
        for status in [TxStatus::Prepared, TxStatus::Committed, TxStatus::Aborted] {
            assert_eq!(TxStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TxStatus::parse("UNKNOWN"), None);
    }
}
