//! Shared application state handed to every request handler.

use std::sync::Arc;

use crate::cluster::Membership;
use crate::coordinator::Coordinator;
use crate::store::ParticipantStore;
use crate::transport::RpcClient;

/// Per-process state: the local node's identity, its participant store, the
/// membership table, and the coordinator. Cloning is cheap; everything is
/// behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub local_addr: String,
    pub membership: Arc<Membership>,
    pub coordinator: Arc<Coordinator>,
    pub store: Arc<ParticipantStore>,
    pub client: RpcClient,
}

impl AppState {
    pub fn new(
        local_addr: impl Into<String>,
        membership: Arc<Membership>,
        coordinator: Arc<Coordinator>,
        store: Arc<ParticipantStore>,
        client: RpcClient,
    ) -> Self {
        Self {
            local_addr: local_addr.into(),
            membership,
            coordinator,
            store,
            client,
        }
    }
}
