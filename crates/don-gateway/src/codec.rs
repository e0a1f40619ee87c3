//! Message codec for the two permanent wire encodings.
//!
//! ```text
//!   legacy request:   {"jsonrpc":"2.0","id":<message_id>,"method":<method>,"params":<Message>}
//!   legacy response:  {"jsonrpc":"2.0","id":<message_id>,"method":<method>,"result":<Message>}
//!   plain JSON-RPC:   params/result are opaque and passed through untouched
//! ```
//!
//! Decoding never validates signatures; callers run [`Message::validate`]
//! once the id has been stamped.

use std::collections::HashMap;

use serde::de::IgnoredAny;
use shared_types::{ErrorCode, Message, RawJson, Request, Response};

use crate::domain::callback::encode_error;
use crate::domain::error::CodecError;

/// Top-level keys of a JSON object. Maps only deserialize from objects, so
/// arrays and scalars never match.
type ObjectKeys = HashMap<String, Option<IgnoredAny>>;

/// JSON-RPC 2.0 codec with legacy envelope support.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRpcCodec;

impl JsonRpcCodec {
    /// Decode one request.
    pub fn decode_request(&self, raw: &[u8]) -> Result<Request, CodecError> {
        Ok(Request::decode(raw)?)
    }

    /// Split a batch into its raw entries, rejecting an empty batch or one
    /// larger than `max`.
    pub fn decode_batch(&self, raw: &[u8], max: usize) -> Result<Vec<RawJson>, CodecError> {
        let entries: Vec<RawJson> = serde_json::from_slice(raw).map_err(|e| CodecError::JsonRpc(e.into()))?;
        if entries.is_empty() {
            return Err(CodecError::EmptyBatch);
        }
        if entries.len() > max {
            return Err(CodecError::BatchTooLarge {
                len: entries.len(),
                max,
            });
        }
        Ok(entries)
    }

    /// Whether `raw` is an object with a non-null `body` key.
    pub fn carries_message(&self, raw: &RawJson) -> bool {
        raw.parse::<ObjectKeys>()
            .is_ok_and(|keys| matches!(keys.get("body"), Some(Some(_))))
    }

    /// The legacy message in `request.params`, if any.
    ///
    /// Returns `None` for plain JSON-RPC requests, including envelopes with
    /// an empty `don_id`.
    pub fn decode_legacy_message(&self, request: &Request) -> Result<Option<Message>, CodecError> {
        let Some(params) = &request.params else {
            return Ok(None);
        };
        if !self.carries_message(params) {
            return Ok(None);
        }
        let message: Message = params.parse().map_err(CodecError::Envelope)?;
        if message.body.don_id.is_empty() {
            return Ok(None);
        }
        Ok(Some(message))
    }

    /// Wrap `message` as a JSON-RPC request.
    pub fn legacy_request(&self, message: &Message) -> Result<Request, CodecError> {
        let params = RawJson::from_value(message).map_err(CodecError::Encode)?;
        Ok(Request::new(
            message.body.message_id.clone(),
            message.body.method.clone(),
            Some(params),
        ))
    }

    /// [`JsonRpcCodec::legacy_request`], serialized.
    pub fn encode_legacy_request(&self, message: &Message) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(&self.legacy_request(message)?).map_err(CodecError::Encode)
    }

    /// Inverse of [`JsonRpcCodec::encode_legacy_request`].
    pub fn decode_legacy_request(&self, raw: &[u8]) -> Result<Message, CodecError> {
        let request = self.decode_request(raw)?;
        let params = request.params.ok_or(CodecError::MissingParams)?;
        params.parse().map_err(CodecError::Envelope)
    }

    /// Wrap `message` as a JSON-RPC success response.
    pub fn legacy_response(&self, message: &Message) -> Result<Response, CodecError> {
        let result = RawJson::from_value(message).map_err(CodecError::Encode)?;
        Ok(Response::success(
            message.body.message_id.clone(),
            message.body.method.clone(),
            result,
        ))
    }

    /// [`JsonRpcCodec::legacy_response`], serialized.
    pub fn encode_legacy_response(&self, message: &Message) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(&self.legacy_response(message)?).map_err(CodecError::Encode)
    }

    /// Inverse of [`JsonRpcCodec::encode_legacy_response`]. An error
    /// response decodes to [`CodecError::Remote`].
    pub fn decode_legacy_response(&self, raw: &[u8]) -> Result<Message, CodecError> {
        let response = Response::decode(raw)?;
        self.message_from_response(&response)
    }

    /// The legacy message carried in `response.result`.
    pub fn message_from_response(&self, response: &Response) -> Result<Message, CodecError> {
        if let Some(error) = &response.error {
            return Err(CodecError::Remote {
                code: error.code,
                message: error.message.clone(),
            });
        }
        let result = response.result.as_ref().ok_or(CodecError::MissingResult)?;
        result.parse().map_err(CodecError::Envelope)
    }

    /// Serialize any response.
    pub fn encode_response(&self, response: &Response) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(response).map_err(CodecError::Encode)
    }

    /// JSON-RPC error response bytes. Never fails.
    pub fn encode_error_response(&self, id: &str, code: ErrorCode, message: &str) -> Vec<u8> {
        encode_error(id, code, message.to_string())
    }
}
