//! # DON Gateway
//!
//! Relay between external users and the nodes of one or more DONs.
//!
//! ```text
//!   user bytes ──► GatewayService::process_request
//!                     │  decode (single | batch), validate legacy signature
//!                     ▼
//!                  HandlerRegistry ── method / service prefix ──► Handler
//!                                                                   │
//!                     ┌── register Callback in CallbackStore ◄──────┤
//!                     │                                             ▼
//!                     │                                  DonFacade::broadcast ──► NodeSender ──► nodes
//!                     │
//!   node bytes ──► GatewayService::handle_node_message ──► Handler::handle_node_message
//!                     │  membership, signature, sender == node
//!                     ▼
//!                  CallbackStore::deliver (first reply wins) ──► CallbackWaiter ──► user
//! ```
//!
//! Node replies are matched to the callback store holding their id.
//! Expired slots are answered with a `RequestTimeoutError` payload by the
//! handler's reaper. Admission control (user rate, in-flight and node rate
//! limits) comes from `don-admission`. Nodes may ask the gateway for
//! outbound HTTP (`http_action`), made through `don-egress`.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod codec;
pub mod don;
pub mod domain;
pub mod handlers;
pub mod metrics;
pub mod ports;
pub mod service;

pub use adapters::ChannelNodeSender;
pub use codec::JsonRpcCodec;
pub use don::DonFacade;
pub use domain::{
    callback, cleanup_task, Callback, CallbackError, CallbackStats, CallbackStore, CallbackWaiter,
    CodecError, ConfigError, DonConfig, DonError, GatewayConfig, GatewayError, HandlerError,
    NodeConfig, PassThroughConfig, ServiceConfig, UserCallbackPayload,
};
pub use handlers::{
    Handler, HandlerRegistry, OutboundHttpRequest, OutboundHttpResponse, PassThroughHandler,
    HTTP_ACTION_METHOD,
};
pub use metrics::GatewayMetrics;
pub use ports::NodeSender;
pub use service::GatewayService;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
