//! Channel-backed [`NodeSender`] for embedded nodes and tests.
//!
//! Each connected node gets a bounded queue; the node side drains the
//! receiver returned by [`ChannelNodeSender::connect`].

use async_trait::async_trait;
use dashmap::DashMap;
use shared_types::Request;
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::error::DonError;
use crate::ports::NodeSender;

/// Default per-node queue depth.
pub const DEFAULT_NODE_QUEUE: usize = 64;

/// Node address → request queue.
pub struct ChannelNodeSender {
    nodes: DashMap<String, mpsc::Sender<Request>>,
    capacity: usize,
}

impl ChannelNodeSender {
    /// Sender with [`DEFAULT_NODE_QUEUE`] slots per node.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_NODE_QUEUE)
    }

    /// Sender with `capacity` queued requests per node (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Connect `address`, replacing any earlier connection.
    pub fn connect(&self, address: &str) -> mpsc::Receiver<Request> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.nodes.insert(address.to_lowercase(), tx);
        debug!(node = address, "Node connected");
        rx
    }

    /// Disconnect `address`. Returns true if it was connected.
    pub fn disconnect(&self, address: &str) -> bool {
        self.nodes.remove(&address.to_lowercase()).is_some()
    }

    /// Whether `address` is connected and its receiver still open.
    pub fn is_connected(&self, address: &str) -> bool {
        self.nodes
            .get(&address.to_lowercase())
            .is_some_and(|tx| !tx.is_closed())
    }
}

impl Default for ChannelNodeSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeSender for ChannelNodeSender {
    async fn send_to_node(&self, node_address: &str, request: &Request) -> Result<(), DonError> {
        // No shard lock across the await.
        let tx = self
            .nodes
            .get(&node_address.to_lowercase())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DonError::UnknownNode(node_address.to_string()))?;

        tx.send(request.clone()).await.map_err(|_| DonError::Send {
            node: node_address.to_string(),
            reason: "connection closed".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE: &str = "0x00000000000000000000000000000000000000AA";

    #[tokio::test]
    async fn test_send_reaches_connected_node() {
        let sender = ChannelNodeSender::new();
        let mut rx = sender.connect(NODE);

        sender
            .send_to_node(&NODE.to_lowercase(), &Request::new("r1", "m", None))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().id, "r1");
    }

    #[tokio::test]
    async fn test_unknown_node() {
        let sender = ChannelNodeSender::new();
        let err = sender
            .send_to_node(NODE, &Request::new("r1", "m", None))
            .await
            .unwrap_err();
        assert!(matches!(err, DonError::UnknownNode(_)));
    }

    #[tokio::test]
    async fn test_closed_receiver() {
        let sender = ChannelNodeSender::new();
        drop(sender.connect(NODE));
        assert!(!sender.is_connected(NODE));

        let err = sender
            .send_to_node(NODE, &Request::new("r1", "m", None))
            .await
            .unwrap_err();
        assert!(matches!(err, DonError::Send { .. }));
    }

    #[test]
    fn test_disconnect() {
        let sender = ChannelNodeSender::new();
        let _rx = sender.connect(NODE);
        assert!(sender.is_connected(NODE));
        assert!(sender.disconnect(NODE));
        assert!(!sender.disconnect(NODE));
    }
}
