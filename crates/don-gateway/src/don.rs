//! DON facade: fan-out to every member node.

use std::sync::Arc;

use futures::future::join_all;
use shared_types::Request;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::config::{DonConfig, NodeConfig};
use crate::domain::error::DonError;
use crate::ports::NodeSender;

/// Members of one DON and the primitive used to reach them.
pub struct DonFacade {
    don_id: String,
    members: Vec<NodeConfig>,
    sender: Arc<dyn NodeSender>,
}

impl DonFacade {
    /// Create a facade. Member addresses are lower-cased.
    pub fn new(don_id: impl Into<String>, members: Vec<NodeConfig>, sender: Arc<dyn NodeSender>) -> Self {
        let members = members
            .into_iter()
            .map(|member| NodeConfig {
                address: member.address.to_lowercase(),
                ..member
            })
            .collect();
        Self {
            don_id: don_id.into(),
            members,
            sender,
        }
    }

    /// Facade for a validated [`DonConfig`].
    pub fn from_config(config: &DonConfig, sender: Arc<dyn NodeSender>) -> Self {
        Self::new(config.don_id.clone(), config.members.clone(), sender)
    }

    /// DON identifier carried in legacy messages.
    pub fn don_id(&self) -> &str {
        &self.don_id
    }

    /// Member nodes, addresses lower-cased.
    pub fn members(&self) -> &[NodeConfig] {
        &self.members
    }

    /// Whether `address` belongs to a member, ignoring case.
    pub fn is_member(&self, address: &str) -> bool {
        self.members
            .iter()
            .any(|member| member.address.eq_ignore_ascii_case(address))
    }

    /// Send to one node.
    pub async fn send_to_node(&self, node_address: &str, request: &Request) -> Result<(), DonError> {
        self.sender.send_to_node(node_address, request).await
    }

    /// Send `request` to every member concurrently.
    ///
    /// All members are attempted; failures are joined into
    /// [`DonError::Broadcast`].
    pub async fn broadcast(&self, request: &Request, cancel: &CancellationToken) -> Result<(), DonError> {
        let sends = self.members.iter().map(|member| async move {
            self.sender
                .send_to_node(&member.address, request)
                .await
                .map_err(|e| {
                    warn!(don_id = %self.don_id, node = %member.address, error = %e, "Send to node failed");
                    e
                })
        });

        let results = tokio::select! {
            _ = cancel.cancelled() => return Err(DonError::Cancelled),
            results = join_all(sends) => results,
        };

        let failures: Vec<DonError> = results.into_iter().filter_map(Result::err).collect();
        if failures.is_empty() {
            debug!(don_id = %self.don_id, request_id = %request.id, members = self.members.len(), "Broadcast sent");
            return Ok(());
        }
        Err(DonError::Broadcast {
            failures,
            members: self.members.len(),
        })
    }
}
