//! Egress error types.
//!
//! `InvalidMethod` and `BlockedHeader` are raised before any I/O. Everything
//! that happens while connecting is `HttpSend`; everything while reading the
//! body is `HttpRead`. Nothing is retried here.

use std::net::IpAddr;
use std::time::Duration;

use thiserror::Error;

/// Outbound request failure.
#[derive(Debug, Error)]
pub enum EgressError {
    /// Method not in the allow list.
    #[error("HTTP method not allowed: {0}")]
    InvalidMethod(String),

    /// Header in the block list.
    #[error("HTTP header not allowed: {0}")]
    BlockedHeader(String),

    /// Request could not be sent or no response head arrived.
    #[error("failed to send HTTP request: {0}")]
    HttpSend(#[source] SendError),

    /// Response body could not be read.
    #[error("failed to read HTTP response body: {0}")]
    HttpRead(#[source] ReadError),

    /// Configuration could not be turned into a client.
    #[error("invalid egress configuration: {0}")]
    Config(String),
}

/// Cause of [`EgressError::HttpSend`].
#[derive(Debug, Error)]
pub enum SendError {
    /// Destination refused by policy.
    #[error(transparent)]
    Policy(#[from] PolicyViolation),

    /// URL did not parse.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Effective timeout elapsed.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Caller cancelled.
    #[error("request cancelled")]
    Cancelled,

    /// Connection or protocol failure.
    #[error("{0}")]
    Transport(String),
}

/// Cause of [`EgressError::HttpRead`].
#[derive(Debug, Error)]
pub enum ReadError {
    /// Body exceeded the read limit.
    #[error("response body exceeds {limit} bytes")]
    BodyTooLarge {
        /// Effective limit.
        limit: usize,
    },

    /// Stream failure mid-body.
    #[error("{0}")]
    Transport(String),
}

/// Destination refused by the URL or address policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    /// Scheme not allowed.
    #[error("scheme not allowed: {0}")]
    Scheme(String),

    /// Port not allowed.
    #[error("port not allowed: {0}")]
    Port(u16),

    /// URL without a host.
    #[error("url host required")]
    MissingHost,

    /// Address explicitly blocked.
    #[error("address blocked: {0}")]
    BlockedIp(IpAddr),

    /// Address outside the configured allow list.
    #[error("address not in allow list: {0}")]
    NotAllowedIp(IpAddr),

    /// Private, loopback, link-local or otherwise internal address.
    #[error("internal address not allowed: {0}")]
    InternalIp(IpAddr),

    /// Every resolved address of a host was refused.
    #[error("no allowed address for host {0}")]
    NoAllowedAddress(String),
}

impl EgressError {
    /// Cancellation of the caller's scope, as opposed to any other failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EgressError::HttpSend(SendError::Cancelled))
    }
}
