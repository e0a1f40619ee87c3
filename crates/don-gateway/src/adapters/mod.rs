//! Adapters for the gateway.
//!
//! In-process implementations of the outbound ports.

pub mod channel;

pub use channel::ChannelNodeSender;
