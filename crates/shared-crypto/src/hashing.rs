//! # Keccak-256 Hashing
//!
//! Ethereum flavour of SHA-3 (pre-standard padding) plus the
//! `personal_sign` prefix used for off-chain message signatures.

use sha3::{Digest, Keccak256};

/// Keccak-256 output (256-bit).
pub type Hash = [u8; 32];

/// Keccak-256 over the concatenation of `parts`.
pub fn keccak256(parts: &[&[u8]]) -> Hash {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Hash of `data` under the Ethereum signed-message prefix:
/// `keccak256("\x19Ethereum Signed Message:\n" || len(data) || data)`.
pub fn eth_message_hash(data: &[u8]) -> Hash {
    let prefix = format!("\x19Ethereum Signed Message:\n{}", data.len());
    keccak256(&[prefix.as_bytes(), data])
}
