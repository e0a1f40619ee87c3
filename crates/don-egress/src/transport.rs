//! Transport seam between the policy client and the network.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::redirect::Policy;
use reqwest::{Method, Url};

use crate::error::{EgressError, ReadError, SendError};
use crate::policy::{IpPolicy, PolicyResolver};

/// User agent the gateway sends; callers cannot override it.
pub const USER_AGENT: &str = concat!("don-gateway/", env!("CARGO_PKG_VERSION"));

/// Request that already passed every pre-flight check.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    /// Upper-case method.
    pub method: String,
    /// Parsed URL.
    pub url: Url,
    /// Caller headers.
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: Bytes,
    /// Effective timeout.
    pub timeout: Duration,
    /// Effective body read limit.
    pub read_limit: usize,
}

/// Response as produced by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status_code: u16,
    /// Headers; repeated values joined with `,`.
    pub headers: HashMap<String, String>,
    /// Body, at most the read limit.
    pub body: Bytes,
}

/// Performs one HTTP exchange. Must refuse redirects and must not read more
/// than `read_limit` body bytes; errors are `HttpSend` or `HttpRead` only.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute `request`.
    async fn execute(&self, request: PreparedRequest) -> Result<HttpResponse, EgressError>;
}

/// reqwest-backed transport with connection-time address filtering.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Client that resolves through `policy` and refuses redirects.
    pub fn new(policy: Arc<IpPolicy>) -> Result<Self, EgressError> {
        let client = reqwest::Client::builder()
            .redirect(Policy::custom(|attempt| attempt.error("redirects are not allowed")))
            .dns_resolver(Arc::new(PolicyResolver::new(policy)))
            .user_agent(USER_AGENT)
            .no_proxy()
            .build()
            .map_err(|e| EgressError::Config(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: PreparedRequest) -> Result<HttpResponse, EgressError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| EgressError::InvalidMethod(request.method.clone()))?;

        let mut builder = self
            .client
            .request(method, request.url)
            .timeout(request.timeout)
            .body(request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let mut response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                EgressError::HttpSend(SendError::Timeout(request.timeout))
            } else {
                EgressError::HttpSend(SendError::Transport(error_chain(&e)))
            }
        })?;

        let status_code = response.status().as_u16();
        let headers = join_headers(response.headers());

        let limit = request.read_limit;
        if response.content_length().is_some_and(|len| len > limit as u64) {
            return Err(EgressError::HttpRead(ReadError::BodyTooLarge { limit }));
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| EgressError::HttpRead(ReadError::Transport(error_chain(&e))))?
        {
            if body.len() + chunk.len() > limit {
                return Err(EgressError::HttpRead(ReadError::BodyTooLarge { limit }));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(HttpResponse {
            status_code,
            headers,
            body: body.freeze(),
        })
    }
}

fn join_headers(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    headers
        .keys()
        .map(|name| {
            let joined = headers
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect::<Vec<_>>()
                .join(",");
            (name.as_str().to_string(), joined)
        })
        .collect()
}

/// reqwest hides the useful cause (policy refusal, redirect) in the source chain.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
