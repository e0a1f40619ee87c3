//! # Shared Crypto - Message Signing Primitives
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `hashing` | Keccak-256 | Signed-message digests, address derivation |
//! | `ecdsa` | secp256k1 (recoverable) | Gateway and node message signatures |
//! | `address` | - | 20-byte account addresses |
//!
//! ## Security Properties
//!
//! - **secp256k1**: RFC 6979 deterministic, low-S normalization (EIP-2)
//! - **Recovery**: signer identity is derived from the signature, never trusted from input

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod ecdsa;
pub mod errors;
pub mod hashing;

// Re-exports
pub use address::{Address, ADDRESS_HEX_LEN};
pub use ecdsa::{recover_data, recover_prehash, EthSigner, RecoverableSignature, SIGNATURE_LEN};
pub use errors::CryptoError;
pub use hashing::{eth_message_hash, keccak256, Hash};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
