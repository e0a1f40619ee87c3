//! # Legacy Signed Message
//!
//! The envelope every legacy user request and node reply travels in:
//!
//! ```text
//! {"signature":"0x<130 hex>","body":{"message_id","method","don_id","receiver","payload"}}
//! ```
//!
//! The signature covers a fixed-width canonical form of the body, so the
//! sender is never taken from input: [`Message::validate`] recovers it.

use serde::{Deserialize, Serialize};
use shared_crypto::{recover_data, EthSigner, ADDRESS_HEX_LEN};

use crate::errors::MessageError;
use crate::raw::RawJson;

/// Hex signature length, `0x` prefix included.
pub const MESSAGE_SIGNATURE_HEX_LEN: usize = 2 + 65 * 2;
/// Upper bound of `message_id` in bytes.
pub const MESSAGE_ID_MAX_LEN: usize = 128;
/// Upper bound of `method` in bytes.
pub const MESSAGE_METHOD_MAX_LEN: usize = 64;
/// Upper bound of `don_id` in bytes.
pub const MESSAGE_DON_ID_MAX_LEN: usize = 64;
/// Exact `receiver` length when present.
pub const MESSAGE_RECEIVER_LEN: usize = ADDRESS_HEX_LEN;

const NULL_CHAR: char = '\0';

/// Signed message envelope.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    /// `0x`-prefixed hex of `r || s || v`.
    #[serde(default)]
    pub signature: String,
    /// Signed content.
    pub body: MessageBody,
}

/// Message body. Everything except `sender` is covered by the signature.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageBody {
    /// Request correlation id.
    pub message_id: String,
    /// Handler method name.
    pub method: String,
    /// Target DON.
    pub don_id: String,
    /// Optional recipient address.
    #[serde(default)]
    pub receiver: String,
    /// Opaque handler payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<RawJson>,
    /// Recovered signer, lower-case hex. Set by [`Message::validate`].
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sender: String,
}

impl MessageBody {
    /// Canonical signing bytes: id, method, DON id and receiver each
    /// zero-padded to their fixed width, then the raw payload.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let payload = self.payload.as_ref().map(RawJson::as_bytes).unwrap_or_default();
        let mut out = Vec::with_capacity(
            MESSAGE_ID_MAX_LEN
                + MESSAGE_METHOD_MAX_LEN
                + MESSAGE_DON_ID_MAX_LEN
                + MESSAGE_RECEIVER_LEN
                + payload.len(),
        );
        push_padded(&mut out, &self.message_id, MESSAGE_ID_MAX_LEN);
        push_padded(&mut out, &self.method, MESSAGE_METHOD_MAX_LEN);
        push_padded(&mut out, &self.don_id, MESSAGE_DON_ID_MAX_LEN);
        push_padded(&mut out, &self.receiver, MESSAGE_RECEIVER_LEN);
        out.extend_from_slice(payload);
        out
    }
}

fn push_padded(out: &mut Vec<u8>, field: &str, width: usize) {
    let bytes = field.as_bytes();
    let take = bytes.len().min(width);
    out.extend_from_slice(&bytes[..take]);
    out.resize(out.len() + (width - take), 0);
}

impl Message {
    /// Build an unsigned message.
    pub fn new(
        message_id: impl Into<String>,
        method: impl Into<String>,
        don_id: impl Into<String>,
        payload: Option<RawJson>,
    ) -> Self {
        Self {
            signature: String::new(),
            body: MessageBody {
                message_id: message_id.into(),
                method: method.into(),
                don_id: don_id.into(),
                receiver: String::new(),
                payload,
                sender: String::new(),
            },
        }
    }

    /// Sign the body and record the signer as `sender`.
    pub fn sign(&mut self, signer: &EthSigner) -> Result<(), MessageError> {
        let signature = signer.sign_data(&self.body.canonical_bytes())?;
        self.signature = format!("0x{}", hex::encode(signature));
        self.body.sender = signer.address().to_hex();
        Ok(())
    }

    /// Check field limits, recover the signer and set `sender` to it.
    ///
    /// A non-empty declared `sender` must match the recovered signer.
    pub fn validate(&mut self) -> Result<(), MessageError> {
        if self.signature.len() != MESSAGE_SIGNATURE_HEX_LEN {
            return Err(MessageError::SignatureLength(self.signature.len()));
        }
        check_field("message_id", &self.body.message_id, MESSAGE_ID_MAX_LEN)?;
        check_field("method", &self.body.method, MESSAGE_METHOD_MAX_LEN)?;
        check_field("don_id", &self.body.don_id, MESSAGE_DON_ID_MAX_LEN)?;
        let receiver_len = self.body.receiver.len();
        if receiver_len != 0 && receiver_len != MESSAGE_RECEIVER_LEN {
            return Err(MessageError::ReceiverLength(receiver_len));
        }

        let digits = self
            .signature
            .strip_prefix("0x")
            .ok_or(MessageError::SignatureEncoding)?;
        let signature = hex::decode(digits).map_err(|_| MessageError::SignatureEncoding)?;
        let recovered = recover_data(&self.body.canonical_bytes(), &signature)?.to_hex();

        if !self.body.sender.is_empty() && !self.body.sender.eq_ignore_ascii_case(&recovered) {
            return Err(MessageError::SenderMismatch {
                declared: self.body.sender.clone(),
                recovered,
            });
        }
        self.body.sender = recovered;
        Ok(())
    }
}

fn check_field(field: &'static str, value: &str, max: usize) -> Result<(), MessageError> {
    if value.is_empty() || value.len() > max {
        return Err(MessageError::FieldLength {
            field,
            len: value.len(),
            min: 1,
            max,
        });
    }
    if value.ends_with(NULL_CHAR) {
        return Err(MessageError::TrailingNull { field });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn signed(signer: &EthSigner) -> Message {
        let mut msg = Message::new(
            "abcd",
            "request",
            "testDON",
            Some(RawJson::from_string(r#"{"key":"value"}"#).unwrap()),
        );
        msg.sign(signer).unwrap();
        msg
    }

    #[test]
    fn test_sign_then_validate() {
        let signer = EthSigner::generate();
        let mut msg = signed(&signer);
        assert_eq!(msg.signature.len(), MESSAGE_SIGNATURE_HEX_LEN);

        msg.validate().unwrap();
        assert_eq!(msg.body.sender, signer.address().to_hex());
    }

    #[test]
    fn test_validate_sets_sender_when_absent() {
        let signer = EthSigner::generate();
        let mut msg = signed(&signer);
        msg.body.sender.clear();

        msg.validate().unwrap();
        assert_eq!(msg.body.sender, signer.address().to_hex());
    }

    #[test]
    fn test_declared_sender_compared_case_insensitively() {
        let signer = EthSigner::generate();
        let mut msg = signed(&signer);
        msg.body.sender = msg.body.sender.to_uppercase().replacen("0X", "0x", 1);

        msg.validate().unwrap();
        assert_eq!(msg.body.sender, signer.address().to_hex());
    }

    #[test]
    fn test_wrong_declared_sender_rejected() {
        let signer = EthSigner::generate();
        let mut msg = signed(&signer);
        msg.body.sender = EthSigner::generate().address().to_hex();

        assert!(matches!(
            msg.validate(),
            Err(MessageError::SenderMismatch { .. })
        ));
    }

    #[test]
    fn test_field_limits() {
        let signer = EthSigner::generate();

        let mut msg = signed(&signer);
        msg.body.message_id = String::new();
        assert!(matches!(msg.validate(), Err(MessageError::FieldLength { field: "message_id", .. })));

        let mut msg = signed(&signer);
        msg.body.method = "m".repeat(MESSAGE_METHOD_MAX_LEN + 1);
        assert!(matches!(msg.validate(), Err(MessageError::FieldLength { field: "method", .. })));

        let mut msg = signed(&signer);
        msg.body.don_id = "don\0".to_string();
        assert_eq!(msg.validate(), Err(MessageError::TrailingNull { field: "don_id" }));

        let mut msg = signed(&signer);
        msg.body.receiver = "0x1234".to_string();
        assert_eq!(msg.validate(), Err(MessageError::ReceiverLength(6)));

        let mut msg = signed(&signer);
        msg.signature.pop();
        assert!(matches!(msg.validate(), Err(MessageError::SignatureLength(_))));
    }

    #[test]
    fn test_max_length_fields_accepted() {
        let signer = EthSigner::generate();
        let mut msg = Message::new(
            "i".repeat(MESSAGE_ID_MAX_LEN),
            "m".repeat(MESSAGE_METHOD_MAX_LEN),
            "d".repeat(MESSAGE_DON_ID_MAX_LEN),
            None,
        );
        msg.body.receiver = signer.address().to_hex();
        msg.sign(&signer).unwrap();
        msg.validate().unwrap();
    }

    #[test]
    fn test_non_hex_signature_rejected() {
        let signer = EthSigner::generate();
        let mut msg = signed(&signer);
        msg.signature = format!("0x{}", "z".repeat(130));
        assert_eq!(msg.validate(), Err(MessageError::SignatureEncoding));
    }

    #[test]
    fn test_canonical_bytes_layout() {
        let msg = Message::new("id", "m", "don", Some(RawJson::from_string("[1]").unwrap()));
        let bytes = msg.body.canonical_bytes();

        assert_eq!(bytes.len(), 128 + 64 + 64 + 42 + 3);
        assert_eq!(&bytes[..2], b"id");
        assert!(bytes[2..128].iter().all(|b| *b == 0));
        assert_eq!(&bytes[128..129], b"m");
        assert_eq!(&bytes[192..195], b"don");
        assert_eq!(&bytes[298..], b"[1]");
    }

    #[test]
    fn test_wire_shape() {
        let msg = Message::new("abcd", "request", "testDON", None);
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"signature":"","body":{"message_id":"abcd","method":"request","don_id":"testDON","receiver":""}}"#
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_single_bit_flip_fails_validation(
            payload in "[a-z]{1,24}",
            position in any::<usize>(),
            bit in 0u8..8,
            in_signature in any::<bool>(),
        ) {
            let signer = EthSigner::from_bytes([0x42; 32]).unwrap();
            let mut msg = Message::new(
                "msg-1",
                "request",
                "don-1",
                Some(RawJson::from_value(&payload).unwrap()),
            );
            msg.sign(&signer).unwrap();

            if in_signature {
                let mut sig = hex::decode(&msg.signature[2..]).unwrap();
                let idx = position % sig.len();
                sig[idx] ^= 1 << bit;
                msg.signature = format!("0x{}", hex::encode(sig));
            } else {
                // Flip inside the quoted string so the payload stays valid JSON.
                let mut text = msg.body.payload.as_ref().unwrap().get().as_bytes().to_vec();
                let idx = 1 + position % (text.len() - 2);
                text[idx] ^= 1 << (bit % 5);
                let text = String::from_utf8(text).unwrap();
                prop_assume!(RawJson::from_string(text.clone()).is_ok());
                msg.body.payload = Some(RawJson::from_string(text).unwrap());
            }

            prop_assert!(msg.validate().is_err());
        }
    }
}
