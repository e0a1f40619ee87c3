//! Outbound HTTP requested by DON nodes.
//!
//! ```text
//!   node ──► Response{id: "http_action/<workflow>/<uuid>", result: OutboundHttpRequest}
//!               │
//!               ▼
//!            EgressClient::send (policy enforced)
//!               │
//!   node ◄── Request{id, method: "http_action", params: OutboundHttpResponse}
//! ```
//!
//! Failures are reported to the node inside the response, never to the
//! user side.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use don_egress::{EgressClient, EgressError, HttpRequest};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Method of node-initiated outbound requests.
pub const HTTP_ACTION_METHOD: &str = "http_action";

/// Request a node asks the gateway to make.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundHttpRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Base64 on the wire.
    #[serde(default, with = "base64_body")]
    pub body: Vec<u8>,
    /// `0` selects the client default.
    #[serde(default)]
    pub timeout_ms: u64,
    /// `0` selects the client cap.
    #[serde(default)]
    pub max_response_bytes: u32,
}

/// Outcome sent back to the node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundHttpResponse {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    /// The failure happened while talking to the endpoint, as opposed to
    /// being refused before any I/O.
    #[serde(default)]
    pub is_external_endpoint_error: bool,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, with = "base64_body")]
    pub body: Vec<u8>,
    #[serde(default)]
    pub external_endpoint_latency_ms: u64,
}

/// Whether `id` names a node-initiated outbound request.
pub fn is_http_action(id: &str) -> bool {
    id.split_once('/')
        .is_some_and(|(method, _)| method == HTTP_ACTION_METHOD)
}

/// Make `request` through `client`. Never fails; errors are carried in the
/// returned response.
pub async fn execute(
    client: &EgressClient,
    request: OutboundHttpRequest,
    cancel: &CancellationToken,
) -> OutboundHttpResponse {
    let http = HttpRequest {
        method: request.method,
        url: request.url,
        headers: request.headers,
        body: Bytes::from(request.body),
        timeout: (request.timeout_ms > 0).then(|| Duration::from_millis(request.timeout_ms)),
        max_response_bytes: (request.max_response_bytes > 0).then_some(request.max_response_bytes),
    };

    let started = Instant::now();
    let outcome = client.send(http, cancel).await;
    let external_endpoint_latency_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(response) => OutboundHttpResponse {
            status_code: response.status_code,
            headers: response.headers,
            body: response.body.to_vec(),
            external_endpoint_latency_ms,
            ..Default::default()
        },
        Err(e) => OutboundHttpResponse {
            is_external_endpoint_error: matches!(e, EgressError::HttpSend(_) | EgressError::HttpRead(_)),
            error_message: e.to_string(),
            external_endpoint_latency_ms,
            ..Default::default()
        },
    }
}

mod base64_body {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}
