//! Request/response transport between nodes.

pub mod client;

pub use client::{RpcClient, TransportError};
