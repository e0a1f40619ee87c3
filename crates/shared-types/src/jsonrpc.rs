//! # JSON-RPC 2.0 Envelope
//!
//! Request/response types for the JSON-RPC wire encoding. Ids are strings;
//! `params` and `result` are opaque raw JSON.

use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::{ErrorCode, JsonRpcError};
use crate::raw::RawJson;

/// Protocol version carried in every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Correlation id.
    #[serde(default)]
    pub id: String,
    /// Method name, optionally `service.method`.
    #[serde(default)]
    pub method: String,
    /// Opaque parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<RawJson>,
}

impl Request {
    /// Build a `"2.0"` request.
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Option<RawJson>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Decode and check version and method.
    pub fn decode(raw: &[u8]) -> Result<Self, JsonRpcError> {
        let request: Request = serde_json::from_slice(raw)?;
        request.validate()?;
        Ok(request)
    }

    /// Check version and method.
    pub fn validate(&self) -> Result<(), JsonRpcError> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Err(JsonRpcError::Version(self.jsonrpc.clone()));
        }
        if self.method.is_empty() {
            return Err(JsonRpcError::EmptyMethod);
        }
        Ok(())
    }

    /// Prefix of `method` before the first `.`, or the whole method.
    pub fn service_name(&self) -> &str {
        self.method
            .split_once('.')
            .map(|(service, _)| service)
            .unwrap_or(&self.method)
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    /// Numeric code, see [`crate::errors::codes`].
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional extra data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<RawJson>,
}

impl WireError {
    /// Error for a gateway error code.
    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.to_json_rpc_code(),
            message: message.into(),
            data: None,
        }
    }
}

/// JSON-RPC response. Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Id of the answered request.
    #[serde(default)]
    pub id: String,
    /// Method of the answered request, when known.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    /// Success value. A present `null` is `Some`.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<RawJson>,
    /// Failure value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl Response {
    /// Successful response.
    pub fn success(id: impl Into<String>, method: impl Into<String>, result: RawJson) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Error response.
    pub fn failure(id: impl Into<String>, error: WireError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: String::new(),
            result: None,
            error: Some(error),
        }
    }

    /// Decode and check version and result/error exclusivity.
    ///
    /// A `"result": null` next to an `error` is dropped.
    pub fn decode(raw: &[u8]) -> Result<Self, JsonRpcError> {
        let mut response: Response = serde_json::from_slice(raw)?;
        if response.error.is_some() && response.result.as_ref().is_some_and(|r| r.get() == "null") {
            response.result = None;
        }
        response.validate()?;
        Ok(response)
    }

    /// Check version and result/error exclusivity.
    pub fn validate(&self) -> Result<(), JsonRpcError> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Err(JsonRpcError::Version(self.jsonrpc.clone()));
        }
        if self.result.is_some() == self.error.is_some() {
            return Err(JsonRpcError::ResultErrorExclusive);
        }
        Ok(())
    }

    /// Gateway error code of this response.
    pub fn error_code(&self) -> ErrorCode {
        self.error
            .as_ref()
            .map(|e| ErrorCode::from_json_rpc_code(e.code))
            .unwrap_or(ErrorCode::NoError)
    }
}

/// Field deserializer that keeps an explicit `null` as raw JSON; only a
/// missing field (via `default`) is `None`.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<RawJson>, D::Error> {
    RawJson::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_decode() {
        let req = Request::decode(br#"{"jsonrpc":"2.0","id":"1","method":"svc.call","params":{"a":1}}"#)
            .unwrap();
        assert_eq!(req.id, "1");
        assert_eq!(req.service_name(), "svc");
        assert_eq!(req.params.unwrap().get(), r#"{"a":1}"#);
    }

    #[test]
    fn test_request_rejects_version_and_empty_method() {
        assert!(matches!(
            Request::decode(br#"{"jsonrpc":"1.0","id":"1","method":"m"}"#),
            Err(JsonRpcError::Version(_))
        ));
        assert!(matches!(
            Request::decode(br#"{"jsonrpc":"2.0","id":"1"}"#),
            Err(JsonRpcError::EmptyMethod)
        ));
        assert!(matches!(
            Request::decode(b"[1,2"),
            Err(JsonRpcError::Malformed(_))
        ));
    }

    #[test]
    fn test_response_exclusivity() {
        let both = br#"{"jsonrpc":"2.0","id":"1","result":1,"error":{"code":-32600,"message":"x"}}"#;
        assert!(matches!(Response::decode(both), Err(JsonRpcError::ResultErrorExclusive)));

        let neither = br#"{"jsonrpc":"2.0","id":"1"}"#;
        assert!(matches!(Response::decode(neither), Err(JsonRpcError::ResultErrorExclusive)));
    }

    #[test]
    fn test_null_result_is_a_success() {
        let raw = br#"{"jsonrpc":"2.0","id":"1","result":null}"#;
        let resp = Response::decode(raw).unwrap();
        assert_eq!(resp.result.as_ref().map(RawJson::get), Some("null"));
        assert_eq!(resp.error_code(), ErrorCode::NoError);
        assert_eq!(serde_json::to_vec(&resp).unwrap(), raw);

        let null_with_error = br#"{"jsonrpc":"2.0","id":"1","result":null,"error":{"code":-32600,"message":"x"}}"#;
        let resp = Response::decode(null_with_error).unwrap();
        assert!(resp.result.is_none());
        assert_eq!(resp.error_code(), ErrorCode::HandlerError);
    }

    #[test]
    fn test_failure_wire_shape() {
        let resp = Response::failure("7", WireError::from_code(ErrorCode::HandlerError, "boom"));
        assert_eq!(
            serde_json::to_string(&resp).unwrap(),
            r#"{"jsonrpc":"2.0","id":"7","error":{"code":-32600,"message":"boom"}}"#
        );
        assert_eq!(resp.error_code(), ErrorCode::HandlerError);
    }

    #[test]
    fn test_service_name_without_dot() {
        let req = Request::new("1", "plain", None);
        assert_eq!(req.service_name(), "plain");
    }
}
