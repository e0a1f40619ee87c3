//! # Recoverable ECDSA Signatures (secp256k1)
//!
//! Ethereum-compatible signatures: 65 bytes `r || s || v` with `v` stored as
//! 27/28. The signer's address is recovered from the signature itself, so the
//! wire never carries a public key.
//!
//! ## Security Properties
//!
//! - RFC 6979 deterministic nonces (no RNG dependency for signing)
//! - Low-S normalization (EIP-2) on signing
//! - Recovery accepts `v` in {0, 1, 27, 28} only

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};

use crate::hashing::{eth_message_hash, keccak256, Hash};
use crate::{Address, CryptoError};

/// Length of a recoverable signature in bytes.
pub const SIGNATURE_LEN: usize = 65;

/// Raw `r || s || v` signature.
pub type RecoverableSignature = [u8; SIGNATURE_LEN];

/// secp256k1 key that signs Ethereum-prefixed messages.
pub struct EthSigner {
    signing_key: SigningKey,
}

impl EthSigner {
    /// Generate a random key.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::thread_rng()),
        }
    }

    /// Create from secret key bytes (32 bytes).
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_bytes((&bytes).into()).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self { signing_key })
    }

    /// Create from a hex secret key, with or without `0x`.
    pub fn from_hex(secret: &str) -> Result<Self, CryptoError> {
        let digits = secret.strip_prefix("0x").unwrap_or(secret);
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(digits, &mut bytes).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Self::from_bytes(bytes)
    }

    /// Address derived from the public key.
    pub fn address(&self) -> Address {
        address_of(self.signing_key.verifying_key())
    }

    /// Sign a 32-byte prehash. `v` is returned as 27/28.
    pub fn sign_prehash(&self, prehash: &Hash) -> Result<RecoverableSignature, CryptoError> {
        let (mut sig, mut recid) = self
            .signing_key
            .sign_prehash_recoverable(prehash)
            .map_err(|_| CryptoError::SigningFailed)?;

        // EIP-2: flipping s to the low half mirrors R, which flips the y parity.
        if let Some(low) = sig.normalize_s() {
            sig = low;
            recid = RecoveryId::new(!recid.is_y_odd(), recid.is_x_reduced());
        }

        let mut out = [0u8; SIGNATURE_LEN];
        out[..64].copy_from_slice(&sig.to_bytes());
        out[64] = recid.to_byte() + 27;
        Ok(out)
    }

    /// Sign `data` under the Ethereum signed-message prefix.
    pub fn sign_data(&self, data: &[u8]) -> Result<RecoverableSignature, CryptoError> {
        self.sign_prehash(&eth_message_hash(data))
    }
}

impl std::fmt::Debug for EthSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthSigner")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Recover the signer address of a 32-byte prehash.
pub fn recover_prehash(prehash: &Hash, signature: &[u8]) -> Result<Address, CryptoError> {
    if signature.len() != SIGNATURE_LEN {
        return Err(CryptoError::InvalidSignatureLength {
            expected: SIGNATURE_LEN,
            actual: signature.len(),
        });
    }

    let recovery_id = parse_recovery_id(signature[64])?;
    let sig = Signature::from_slice(&signature[..64]).map_err(|_| CryptoError::InvalidSignature)?;
    let key = VerifyingKey::recover_from_prehash(prehash, &sig, recovery_id)
        .map_err(|_| CryptoError::RecoveryFailed)?;

    Ok(address_of(&key))
}

/// Recover the signer address of `data` signed with [`EthSigner::sign_data`].
pub fn recover_data(data: &[u8], signature: &[u8]) -> Result<Address, CryptoError> {
    recover_prehash(&eth_message_hash(data), signature)
}

/// Address = last 20 bytes of keccak256(uncompressed pubkey without 0x04).
fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&[&point.as_bytes()[1..]]);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&hash[12..]);
    Address::from_bytes(bytes)
}

fn parse_recovery_id(v: u8) -> Result<RecoveryId, CryptoError> {
    let normalized = match v {
        0 | 27 => false,
        1 | 28 => true,
        _ => return Err(CryptoError::InvalidRecoveryId(v)),
    };
    Ok(RecoveryId::new(normalized, false))
}
