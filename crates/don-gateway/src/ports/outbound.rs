//! Outbound ports for the gateway.

use async_trait::async_trait;
use shared_types::Request;

use crate::domain::error::DonError;

/// Per-node send primitive owned by the node connection layer.
///
/// `node_address` is the member's lower-case `0x` address.
#[async_trait]
pub trait NodeSender: Send + Sync {
    /// Queue `request` for one node. Fails if the node is not connected
    /// or its connection is closed.
    async fn send_to_node(&self, node_address: &str, request: &Request) -> Result<(), DonError>;
}
