//! Policy-enforced outbound HTTP client.
//!
//! ```text
//! send(request)
//!   ├─ method allowed?           ── InvalidMethod   (no I/O)
//!   ├─ headers allowed?          ── BlockedHeader   (no I/O)
//!   ├─ url: scheme/port/literal  ── HttpSend(Policy)
//!   ├─ timeout = min(req|default, 60s), read limit = min(default, req)
//!   └─ transport (resolver filters addresses, no redirects)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Url;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::{HttpClientConfig, MAX_REQUEST_DURATION};
use crate::error::{EgressError, SendError};
use crate::policy::{IpPolicy, UrlPolicy};
use crate::transport::{HttpResponse, PreparedRequest, ReqwestTransport, Transport};

/// Outbound request as asked for by a handler.
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    /// Method, any case.
    pub method: String,
    /// Absolute URL.
    pub url: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: Bytes,
    /// Requested timeout; the client default when unset.
    pub timeout: Option<Duration>,
    /// Requested body cap; can only lower the client cap.
    pub max_response_bytes: Option<u32>,
}

impl HttpRequest {
    /// Request with method and URL.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            ..Default::default()
        }
    }
}

/// HTTP client that enforces the egress policy on every request.
pub struct EgressClient {
    config: HttpClientConfig,
    url_policy: UrlPolicy,
    transport: Arc<dyn Transport>,
}

impl EgressClient {
    /// Client over the reqwest transport.
    pub fn new(config: HttpClientConfig) -> Result<Self, EgressError> {
        let ip_policy = Arc::new(IpPolicy::from_config(&config)?);
        let transport = Arc::new(ReqwestTransport::new(Arc::clone(&ip_policy))?);
        Ok(Self::build(config, ip_policy, transport))
    }

    /// Client over a caller-provided transport.
    pub fn with_transport(
        config: HttpClientConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, EgressError> {
        let ip_policy = Arc::new(IpPolicy::from_config(&config)?);
        Ok(Self::build(config, ip_policy, transport))
    }

    fn build(
        mut config: HttpClientConfig,
        ip_policy: Arc<IpPolicy>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        config.apply_defaults();
        let url_policy = UrlPolicy::new(&config, ip_policy);
        Self {
            config,
            url_policy,
            transport,
        }
    }

    /// Configuration with defaults applied.
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Requested timeout (or the default), never above [`MAX_REQUEST_DURATION`].
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .filter(|t| !t.is_zero())
            .unwrap_or(self.config.default_timeout)
            .min(MAX_REQUEST_DURATION)
    }

    /// Client cap, lowered by a non-zero request cap.
    pub fn read_limit(&self, requested: Option<u32>) -> usize {
        let default = self.config.max_response_bytes;
        let limit = match requested {
            Some(n) if n > 0 => default.min(n),
            _ => default,
        };
        limit as usize
    }

    fn validate_method(&self, method: &str) -> Result<String, EgressError> {
        let upper = method.to_ascii_uppercase();
        if self
            .config
            .allowed_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&upper))
        {
            Ok(upper)
        } else {
            Err(EgressError::InvalidMethod(method.to_string()))
        }
    }

    fn validate_headers(&self, headers: &HashMap<String, String>) -> Result<(), EgressError> {
        for name in headers.keys() {
            if self
                .config
                .blocked_headers
                .iter()
                .any(|b| b.eq_ignore_ascii_case(name))
            {
                return Err(EgressError::BlockedHeader(name.clone()));
            }
        }
        Ok(())
    }

    /// Send `request` under the policy. No retries.
    pub async fn send(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, EgressError> {
        let method = self.validate_method(&request.method)?;
        self.validate_headers(&request.headers)?;

        let url = Url::parse(&request.url)
            .map_err(|e| EgressError::HttpSend(SendError::InvalidUrl(e.to_string())))?;
        self.url_policy
            .check(&url)
            .map_err(|v| EgressError::HttpSend(SendError::Policy(v)))?;

        let timeout = self.effective_timeout(request.timeout);
        let read_limit = self.read_limit(request.max_response_bytes);
        debug!(url = %url, timeout_ms = timeout.as_millis() as u64, read_limit, "Sending HTTP request");

        let prepared = PreparedRequest {
            method,
            url,
            headers: request.headers,
            body: request.body,
            timeout,
            read_limit,
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(EgressError::HttpSend(SendError::Cancelled)),
            outcome = tokio::time::timeout(timeout, self.transport.execute(prepared)) => {
                outcome.unwrap_or(Err(EgressError::HttpSend(SendError::Timeout(timeout))))
            }
        };

        match &result {
            Ok(response) => debug!(status = response.status_code, "Received HTTP response"),
            Err(err) => error!(url = %request.url, error = %err, "HTTP request failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(config: HttpClientConfig) -> EgressClient {
        EgressClient::new(config).unwrap()
    }

    #[test]
    fn test_effective_timeout() {
        let c = client(HttpClientConfig::default());
        assert_eq!(c.effective_timeout(None), Duration::from_secs(5));
        assert_eq!(c.effective_timeout(Some(Duration::ZERO)), Duration::from_secs(5));
        assert_eq!(c.effective_timeout(Some(Duration::from_secs(1))), Duration::from_secs(1));
        assert_eq!(c.effective_timeout(Some(Duration::from_secs(120))), MAX_REQUEST_DURATION);

        let long_default = client(HttpClientConfig {
            default_timeout: Duration::from_secs(600),
            ..Default::default()
        });
        assert_eq!(long_default.effective_timeout(None), MAX_REQUEST_DURATION);
    }

    #[test]
    fn test_read_limit() {
        let c = client(HttpClientConfig::default());
        assert_eq!(c.read_limit(None), 27_033);
        assert_eq!(c.read_limit(Some(0)), 27_033);
        assert_eq!(c.read_limit(Some(100)), 100);
        assert_eq!(c.read_limit(Some(1_000_000)), 27_033);
    }

    #[test]
    fn test_method_and_header_checks_ignore_case() {
        let c = client(HttpClientConfig::default());
        assert_eq!(c.validate_method("post").unwrap(), "POST");
        assert!(matches!(c.validate_method("TRACE"), Err(EgressError::InvalidMethod(_))));

        let mut headers = HashMap::new();
        headers.insert("X-Forwarded-For".to_string(), "1.2.3.4".to_string());
        assert!(matches!(
            c.validate_headers(&headers),
            Err(EgressError::BlockedHeader(name)) if name == "X-Forwarded-For"
        ));
    }

    #[test]
    fn test_invalid_policy_config_rejected() {
        let config = HttpClientConfig {
            blocked_ips_cidr: vec!["10.0.0.0/99".into()],
            ..Default::default()
        };
        assert!(matches!(EgressClient::new(config), Err(EgressError::Config(_))));
    }
}
