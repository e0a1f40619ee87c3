//! Gateway error types.
//!
//! Handler failures carry the [`ErrorCode`] they surface as; everything a
//! user sees is rendered through that mapping.

use std::fmt::Display;

use don_admission::RateLimited;
use don_egress::EgressError;
use shared_types::{ErrorCode, JsonRpcError, MessageError};
use thiserror::Error;

use super::config::ConfigError;

/// Wire encoding failures.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Not a JSON-RPC 2.0 envelope.
    #[error("invalid JSON-RPC envelope: {0}")]
    JsonRpc(#[from] JsonRpcError),

    /// `params`/`result` do not hold a legacy message.
    #[error("invalid legacy message: {0}")]
    Envelope(#[source] serde_json::Error),

    /// Serialization failed.
    #[error("encoding failed: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("request has no params")]
    MissingParams,

    #[error("response has no result")]
    MissingResult,

    /// The peer answered with a JSON-RPC error.
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("empty batch")]
    EmptyBatch,

    #[error("batch of {len} exceeds limit of {max}")]
    BatchTooLarge { len: usize, max: usize },

    #[error("request of {len} bytes exceeds limit of {max}")]
    RequestTooLarge { len: usize, max: usize },

    /// A node's `http_action` result is not an outbound request.
    #[error("invalid outbound HTTP request: {0}")]
    OutboundRequest(#[source] serde_json::Error),
}

/// DON fan-out failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DonError {
    #[error("node {0} is not connected")]
    UnknownNode(String),

    #[error("send to node {node} failed: {reason}")]
    Send { node: String, reason: String },

    #[error("broadcast cancelled")]
    Cancelled,

    /// Some members could not be reached.
    #[error("broadcast failed for {} of {members} members: {}", .failures.len(), join_errors(.failures))]
    Broadcast { failures: Vec<DonError>, members: usize },
}

/// Handler failures.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("unsupported DON id {actual}, handler serves {expected}")]
    UnsupportedDon { expected: String, actual: String },

    #[error("request has no id")]
    MissingId,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("invalid message: {0}")]
    Message(#[from] MessageError),

    #[error(transparent)]
    Don(#[from] DonError),

    #[error("node {0} is not a member of this DON")]
    NotMember(String),

    #[error("reply signed by {sender}, received from {node}")]
    SenderMismatch { node: String, sender: String },

    /// The node exceeded its message rate.
    #[error("node {node} {source}")]
    NodeRateLimited {
        node: String,
        #[source]
        source: RateLimited,
    },

    /// The method is not served to users.
    #[error("method {0} is reserved for nodes")]
    NodeOnlyMethod(String),

    #[error("{}", join_errors(.0))]
    Joined(Vec<HandlerError>),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    /// Code the user sees for this failure.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::UnsupportedDon { .. } => ErrorCode::UnsupportedDonIdError,
            Self::NodeRateLimited { .. } => ErrorCode::LimitExceededError,
            Self::NodeOnlyMethod(_) => ErrorCode::UnsupportedMethodError,
            _ => ErrorCode::HandlerError,
        }
    }
}

/// Gateway service errors
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("method {0} is registered by more than one handler")]
    DuplicateMethod(String),

    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("egress client error: {0}")]
    Egress(#[from] EgressError),
}

pub(crate) fn join_errors<E: Display>(errors: &[E]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
