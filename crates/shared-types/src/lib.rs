//! # Shared Types Crate
//!
//! Wire types shared by the gateway crates.
//!
//! ## Design Principles
//!
//! - **Signer is derived, never declared**: a [`Message`] only carries a
//!   trusted `sender` after [`Message::validate`] recovered it.
//! - **Opaque payloads**: `payload`, `params` and `result` are [`RawJson`]
//!   and keep the exact bytes a peer signed.
//! - **One error vocabulary**: [`ErrorCode`] maps to JSON-RPC codes and HTTP
//!   statuses in one place.

pub mod errors;
pub mod jsonrpc;
pub mod message;
pub mod raw;

pub use errors::{codes, ErrorCode, JsonRpcError, MessageError};
pub use jsonrpc::{Request, Response, WireError, JSONRPC_VERSION};
pub use message::{
    Message, MessageBody, MESSAGE_DON_ID_MAX_LEN, MESSAGE_ID_MAX_LEN, MESSAGE_METHOD_MAX_LEN,
    MESSAGE_RECEIVER_LEN, MESSAGE_SIGNATURE_HEX_LEN,
};
pub use raw::RawJson;
