//! Per-DON message handlers.
//!
//! A [`Handler`] owns a set of method names. User messages arrive with the
//! [`Callback`] that must eventually carry the reply; node messages arrive
//! with the address of the node that sent them.

pub mod http_action;
pub mod pass_through;
pub mod registry;

use async_trait::async_trait;
use shared_types::{Message, Request, Response};
use tokio_util::sync::CancellationToken;

use crate::domain::callback::Callback;
use crate::domain::error::HandlerError;

pub use http_action::{OutboundHttpRequest, OutboundHttpResponse, HTTP_ACTION_METHOD};
pub use pass_through::PassThroughHandler;
pub use registry::HandlerRegistry;

/// Pluggable message processor.
///
/// User-message operations register `callback` before any fan-out and
/// complete it at most once. An `Err` return means the callback was not
/// kept and the caller answers for the handler.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Methods routed to this handler.
    fn methods(&self) -> Vec<String>;

    /// Start background work.
    async fn start(&self) -> Result<(), HandlerError>;

    /// Stop background work.
    async fn close(&self) -> Result<(), HandlerError>;

    /// Handle a validated legacy message.
    async fn handle_legacy_user_message(
        &self,
        message: Message,
        callback: Callback,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError>;

    /// Handle a plain JSON-RPC request.
    async fn handle_json_rpc_user_message(
        &self,
        request: Request,
        callback: Callback,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError>;

    /// Handle a reply from `node_address`.
    async fn handle_node_message(&self, response: Response, node_address: &str) -> Result<(), HandlerError>;
}
