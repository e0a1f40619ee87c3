//! # DON Egress
//!
//! Outbound HTTP for gateway handlers, constrained so that user-supplied
//! URLs cannot reach internal services or exhaust the gateway:
//!
//! - method and header allow/block lists checked before any I/O
//! - scheme, port and address policy, re-checked on every DNS answer
//! - redirects refused
//! - timeouts clamped to [`MAX_REQUEST_DURATION`]
//! - response bodies capped while streaming

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod policy;
pub mod transport;

pub use client::{EgressClient, HttpRequest};
pub use config::{
    HttpClientConfig, DEFAULT_MAX_RESPONSE_BYTES, DEFAULT_TIMEOUT, MAX_REQUEST_DURATION,
};
pub use error::{EgressError, PolicyViolation, ReadError, SendError};
pub use policy::{is_internal, IpCidr, IpPolicy, PolicyResolver, UrlPolicy};
pub use transport::{HttpResponse, PreparedRequest, ReqwestTransport, Transport, USER_AGENT};
