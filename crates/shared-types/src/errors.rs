//! # Error Types
//!
//! Gateway error codes with their JSON-RPC and HTTP mappings, plus the
//! validation errors of the wire types.

use std::fmt;

use serde::{Deserialize, Serialize};
use shared_crypto::CryptoError;
use thiserror::Error;

/// JSON-RPC 2.0 error codes used on the wire.
pub mod codes {
    // JSON-RPC 2.0 standard errors (-32700 to -32600)
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    // Server errors (-32000 to -32099)
    pub const SERVER_ERROR: i64 = -32000;
    pub const LIMIT_EXCEEDED: i64 = -32005;
    pub const CONFLICT: i64 = -32009;
    pub const FATAL_ERROR: i64 = -32099;
}

/// Outcome class of a user request, carried in every callback payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Request served.
    NoError,
    /// Malformed JSON, JSON-RPC envelope, or message.
    UserMessageParseError,
    /// No handler serves the requested method.
    UnsupportedMethodError,
    /// The message names a DON this gateway does not serve.
    UnsupportedDonIdError,
    /// The handler rejected the request.
    HandlerError,
    /// No reply arrived in time.
    RequestTimeoutError,
    /// A node reply could not be re-encoded for the user.
    NodeResponseEncodingError,
    /// Admission control denied the request.
    LimitExceededError,
    /// The request id is already in flight.
    ConflictError,
    /// Unexpected internal failure.
    FatalError,
}

impl ErrorCode {
    /// JSON-RPC error code (`0` for [`ErrorCode::NoError`]).
    pub fn to_json_rpc_code(self) -> i64 {
        match self {
            ErrorCode::NoError => 0,
            ErrorCode::UserMessageParseError => codes::PARSE_ERROR,
            ErrorCode::UnsupportedMethodError => codes::METHOD_NOT_FOUND,
            ErrorCode::UnsupportedDonIdError => codes::INVALID_PARAMS,
            ErrorCode::HandlerError => codes::INVALID_REQUEST,
            ErrorCode::RequestTimeoutError => codes::SERVER_ERROR,
            ErrorCode::NodeResponseEncodingError => codes::INTERNAL_ERROR,
            ErrorCode::LimitExceededError => codes::LIMIT_EXCEEDED,
            ErrorCode::ConflictError => codes::CONFLICT,
            ErrorCode::FatalError => codes::FATAL_ERROR,
        }
    }

    /// Inverse of [`ErrorCode::to_json_rpc_code`]; unknown codes are fatal.
    pub fn from_json_rpc_code(code: i64) -> Self {
        match code {
            0 => ErrorCode::NoError,
            codes::PARSE_ERROR => ErrorCode::UserMessageParseError,
            codes::METHOD_NOT_FOUND => ErrorCode::UnsupportedMethodError,
            codes::INVALID_PARAMS => ErrorCode::UnsupportedDonIdError,
            codes::INVALID_REQUEST => ErrorCode::HandlerError,
            codes::SERVER_ERROR => ErrorCode::RequestTimeoutError,
            codes::INTERNAL_ERROR => ErrorCode::NodeResponseEncodingError,
            codes::LIMIT_EXCEEDED => ErrorCode::LimitExceededError,
            codes::CONFLICT => ErrorCode::ConflictError,
            _ => ErrorCode::FatalError,
        }
    }

    /// HTTP status for the front-end reply.
    pub fn to_http_status(self) -> u16 {
        match self {
            ErrorCode::NoError => 200,
            ErrorCode::UserMessageParseError
            | ErrorCode::UnsupportedMethodError
            | ErrorCode::UnsupportedDonIdError
            | ErrorCode::HandlerError => 400,
            ErrorCode::ConflictError => 409,
            ErrorCode::LimitExceededError => 429,
            ErrorCode::NodeResponseEncodingError | ErrorCode::FatalError => 500,
            ErrorCode::RequestTimeoutError => 504,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::NoError => "NoError",
            ErrorCode::UserMessageParseError => "UserMessageParseError",
            ErrorCode::UnsupportedMethodError => "UnsupportedMethodError",
            ErrorCode::UnsupportedDonIdError => "UnsupportedDONIdError",
            ErrorCode::HandlerError => "HandlerError",
            ErrorCode::RequestTimeoutError => "RequestTimeoutError",
            ErrorCode::NodeResponseEncodingError => "NodeResponseEncodingError",
            ErrorCode::LimitExceededError => "LimitExceededError",
            ErrorCode::ConflictError => "ConflictError",
            ErrorCode::FatalError => "FatalError",
        };
        f.write_str(name)
    }
}

/// Validation failures of a signed legacy message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    /// Signature is not `0x` plus 130 hex characters.
    #[error("invalid hex signature length: {0}")]
    SignatureLength(usize),

    /// Signature is not hex.
    #[error("invalid signature encoding")]
    SignatureEncoding,

    /// A body field is empty or too long.
    #[error("invalid {field} length: {len} (allowed {min}..={max})")]
    FieldLength {
        field: &'static str,
        len: usize,
        min: usize,
        max: usize,
    },

    /// A body field ends with a NUL byte.
    #[error("{field} can't end with a null character")]
    TrailingNull { field: &'static str },

    /// Receiver is neither empty nor a 42-character address.
    #[error("invalid receiver length: {0}")]
    ReceiverLength(usize),

    /// Signer recovery failed.
    #[error("signature verification failed: {0}")]
    Signature(#[from] CryptoError),

    /// Declared sender differs from the recovered signer.
    #[error("sender mismatch: declared {declared}, recovered {recovered}")]
    SenderMismatch { declared: String, recovered: String },
}

/// JSON-RPC envelope failures.
#[derive(Debug, Error)]
pub enum JsonRpcError {
    /// Not JSON, or not the expected shape.
    #[error("malformed JSON-RPC message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// `jsonrpc` is not `"2.0"`.
    #[error("incorrect jsonrpc version: {0}")]
    Version(String),

    /// Request without a method.
    #[error("empty method field")]
    EmptyMethod,

    /// Response carrying both or neither of result and error.
    #[error("response must carry exactly one of result or error")]
    ResultErrorExclusive,
}
