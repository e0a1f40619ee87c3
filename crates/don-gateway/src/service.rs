//! Gateway service - front-end relay logic.
//!
//! Turns raw user requests (single or batch) into handler calls, waits for
//! the reply under the request timeout and renders bytes plus an HTTP
//! status. Raw node replies are routed back to the owning handler.

use std::sync::Arc;
use std::time::Duration;

use don_admission::{RateLimiter, RateLimiterConfig, ResourcePoolLimiter};
use don_egress::EgressClient;
use futures::future::join_all;
use parking_lot::Mutex;
use shared_types::{ErrorCode, RawJson, Response};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::JsonRpcCodec;
use crate::don::DonFacade;
use crate::domain::callback::{callback, CallbackError};
use crate::domain::config::{ConfigError, GatewayConfig, ServiceConfig};
use crate::domain::error::{CodecError, GatewayError};
use crate::handlers::{Handler, HandlerRegistry, PassThroughHandler};
use crate::metrics::GatewayMetrics;
use crate::ports::NodeSender;

/// Idle time after which a keyed rate bucket is dropped.
pub const RATE_BUCKET_IDLE_TTL: Duration = Duration::from_secs(600);

/// How often idle rate buckets are swept.
pub const RATE_BUCKET_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Housekeeping {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Gateway service state
pub struct GatewayService {
    config: ServiceConfig,
    registry: HandlerRegistry,
    codec: JsonRpcCodec,
    egress: Option<Arc<EgressClient>>,
    rate_limiter: Option<Arc<RateLimiter>>,
    resource_pool: Option<Arc<ResourcePoolLimiter>>,
    metrics: Arc<GatewayMetrics>,
    housekeeping: Mutex<Option<Housekeeping>>,
}

impl GatewayService {
    /// Service over an already-built registry.
    pub fn new(config: ServiceConfig, registry: HandlerRegistry) -> Self {
        Self {
            config,
            registry,
            codec: JsonRpcCodec,
            egress: None,
            rate_limiter: None,
            resource_pool: None,
            metrics: Arc::new(GatewayMetrics::new()),
            housekeeping: Mutex::new(None),
        }
    }

    /// Record into `metrics`, typically shared with the handlers.
    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Build the full gateway: one pass-through handler per DON, all
    /// reaching nodes through `sender` and recording into one metrics set.
    ///
    /// The egress client is only built when some DON serves outbound HTTP.
    pub fn from_config(mut config: GatewayConfig, sender: Arc<dyn NodeSender>) -> Result<Self, GatewayError> {
        config.validate()?;

        let rate_limiter = config.rate_limit.as_ref().map(build_rate_limiter).transpose()?;
        let resource_pool = config
            .resource_pool
            .as_ref()
            .map(|pool| Arc::new(ResourcePoolLimiter::new(pool)));
        let egress = if config.dons.iter().any(|don| don.handler.outbound_http) {
            Some(Arc::new(EgressClient::new(config.egress.clone())?))
        } else {
            None
        };
        let metrics = Arc::new(GatewayMetrics::new());

        let mut handlers: Vec<Arc<dyn Handler>> = Vec::with_capacity(config.dons.len());
        for don in &config.dons {
            let facade = Arc::new(DonFacade::from_config(don, Arc::clone(&sender)));
            let mut handler = PassThroughHandler::new(don.handler.clone(), facade)
                .with_metrics(Arc::clone(&metrics));
            if let Some(limiter) = &rate_limiter {
                handler = handler.with_rate_limiter(Arc::clone(limiter));
            }
            if let Some(pool) = &resource_pool {
                handler = handler.with_resource_pool(Arc::clone(pool));
            }
            if let Some(limits) = &don.handler.node_rate_limit {
                handler = handler.with_node_rate_limiter(build_rate_limiter(limits)?);
            }
            if let Some(client) = egress.as_ref().filter(|_| don.handler.outbound_http) {
                handler = handler.with_egress(Arc::clone(client));
            }
            handlers.push(Arc::new(handler));
        }
        let registry = HandlerRegistry::new(handlers)?;

        Ok(Self {
            config: config.service,
            registry,
            codec: JsonRpcCodec,
            egress,
            rate_limiter,
            resource_pool,
            metrics,
            housekeeping: Mutex::new(None),
        })
    }

    /// Front-end settings.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Method routing table.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Policy-enforced outbound HTTP client shared by handlers.
    pub fn egress(&self) -> Option<&Arc<EgressClient>> {
        self.egress.as_ref()
    }

    /// User request rate limiter, when configured.
    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.rate_limiter.as_ref()
    }

    /// In-flight limiter, when configured.
    pub fn resource_pool(&self) -> Option<&Arc<ResourcePoolLimiter>> {
        self.resource_pool.as_ref()
    }

    /// Request counters.
    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    /// Start handlers and background housekeeping.
    pub async fn start(&self) -> Result<(), GatewayError> {
        info!("Starting DON gateway...");
        self.registry.start_all().await?;

        if let Some(limiter) = &self.rate_limiter {
            let mut housekeeping = self.housekeeping.lock();
            if housekeeping.is_none() {
                let cancel = CancellationToken::new();
                let task = sweep_rate_buckets(Arc::clone(limiter), cancel.clone());
                *housekeeping = Some(Housekeeping { cancel, task });
            }
        }

        info!(
            handlers = self.registry.len(),
            methods = ?self.registry.methods().collect::<Vec<_>>(),
            "DON gateway started"
        );
        Ok(())
    }

    /// Stop housekeeping and close every handler.
    pub async fn close(&self) -> Result<(), GatewayError> {
        let housekeeping = self.housekeeping.lock().take();
        if let Some(housekeeping) = housekeeping {
            housekeeping.cancel.cancel();
            if let Err(e) = housekeeping.task.await {
                warn!(error = %e, "Rate bucket sweep task failed");
            }
        }
        self.registry.close_all().await?;
        info!("DON gateway stopped");
        Ok(())
    }

    /// Process one raw user request (single or batch).
    ///
    /// Returns the reply bytes and the HTTP status. A batch always answers
    /// 200 with an array of per-entry replies.
    pub async fn process_request(&self, raw: &[u8], cancel: &CancellationToken) -> (Vec<u8>, u16) {
        if raw.len() > self.config.max_request_bytes {
            let err = CodecError::RequestTooLarge {
                len: raw.len(),
                max: self.config.max_request_bytes,
            };
            return self.reject("", ErrorCode::UserMessageParseError, &err.to_string());
        }

        if is_batch(raw) {
            return self.process_batch(raw, cancel).await;
        }
        let (reply, code) = self.process_single(raw, cancel).await;
        (reply, code.to_http_status())
    }

    async fn process_batch(&self, raw: &[u8], cancel: &CancellationToken) -> (Vec<u8>, u16) {
        let entries = match self.codec.decode_batch(raw, self.config.max_batch_size) {
            Ok(entries) => entries,
            Err(e) => return self.reject("", ErrorCode::UserMessageParseError, &e.to_string()),
        };
        debug!(entries = entries.len(), "Processing batch");
        self.metrics.record_batch();

        let replies = join_all(
            entries
                .iter()
                .map(|entry| self.process_single(entry.as_bytes(), cancel)),
        )
        .await;

        let mut out = Vec::with_capacity(replies.iter().map(|(reply, _)| reply.len() + 1).sum::<usize>() + 2);
        out.push(b'[');
        for (index, (reply, _)) in replies.into_iter().enumerate() {
            if index > 0 {
                out.push(b',');
            }
            if RawJson::from_slice(&reply).is_ok() {
                out.extend_from_slice(&reply);
            } else {
                out.extend_from_slice(&self.codec.encode_error_response(
                    "",
                    ErrorCode::FatalError,
                    "handler produced an invalid reply",
                ));
            }
        }
        out.push(b']');
        (out, ErrorCode::NoError.to_http_status())
    }

    async fn process_single(&self, raw: &[u8], cancel: &CancellationToken) -> (Vec<u8>, ErrorCode) {
        let started = Instant::now();
        let (reply, code) = self.dispatch_single(raw, cancel).await;
        self.metrics
            .record_request(code, started.elapsed().as_millis() as u64);
        (reply, code)
    }

    async fn dispatch_single(&self, raw: &[u8], cancel: &CancellationToken) -> (Vec<u8>, ErrorCode) {
        let request = match self.codec.decode_request(raw) {
            Ok(request) => request,
            Err(e) => return self.error("", ErrorCode::UserMessageParseError, &e.to_string()),
        };
        let id = request.id.clone();
        let message = match self.codec.decode_legacy_message(&request) {
            Ok(message) => message,
            Err(e) => return self.error(&id, ErrorCode::UserMessageParseError, &e.to_string()),
        };

        let deadline = Instant::now() + self.config.request_timeout;
        let request_cancel = cancel.child_token();
        let (callback, waiter) = callback();

        let dispatch = async {
            match message {
                Some(mut message) => {
                    if let Err(e) = message.validate() {
                        return Err((ErrorCode::UserMessageParseError, e.to_string()));
                    }
                    let Some(handler) = self.registry.get(&message.body.method) else {
                        return Err(unsupported(&message.body.method));
                    };
                    handler
                        .handle_legacy_user_message(message, callback, &request_cancel)
                        .await
                        .map_err(|e| (e.error_code(), e.to_string()))
                }
                None => {
                    let Some(handler) = self.registry.resolve_request(&request) else {
                        return Err(unsupported(&request.method));
                    };
                    handler
                        .handle_json_rpc_user_message(request, callback, &request_cancel)
                        .await
                        .map_err(|e| (e.error_code(), e.to_string()))
                }
            }
        };

        match timeout_at(deadline, dispatch).await {
            Ok(Ok(())) => {}
            Ok(Err((code, message))) => return self.error(&id, code, &message),
            Err(_) => {
                request_cancel.cancel();
                return self.error(&id, ErrorCode::RequestTimeoutError, "handler timeout");
            }
        }

        match timeout_at(deadline, waiter.wait(&request_cancel)).await {
            Ok(Ok(payload)) => (payload.raw_response, payload.error_code),
            Ok(Err(CallbackError::Cancelled)) => {
                self.error(&id, ErrorCode::RequestTimeoutError, "handler timeout: request cancelled")
            }
            Ok(Err(e)) => self.error(&id, ErrorCode::HandlerError, &e.to_string()),
            Err(_) => {
                request_cancel.cancel();
                debug!(request_id = %id, "Request timed out");
                self.error(&id, ErrorCode::RequestTimeoutError, "handler timeout")
            }
        }
    }

    /// Route a raw node reply to the handler owning its method.
    pub async fn handle_node_message(&self, raw: &[u8], node_address: &str) -> Result<(), GatewayError> {
        let response = Response::decode(raw).map_err(CodecError::from)?;
        let handler = self
            .registry
            .resolve(&response.method)
            .ok_or_else(|| GatewayError::UnsupportedMethod(response.method.clone()))?;
        handler.handle_node_message(response, node_address).await?;
        Ok(())
    }

    fn error(&self, id: &str, code: ErrorCode, message: &str) -> (Vec<u8>, ErrorCode) {
        (self.codec.encode_error_response(id, code, message), code)
    }

    fn reject(&self, id: &str, code: ErrorCode, message: &str) -> (Vec<u8>, u16) {
        self.metrics.record_request(code, 0);
        (self.codec.encode_error_response(id, code, message), code.to_http_status())
    }
}

fn build_rate_limiter(limits: &RateLimiterConfig) -> Result<Arc<RateLimiter>, ConfigError> {
    RateLimiter::new(limits)
        .map(Arc::new)
        .map_err(|e| ConfigError::InvalidRateLimit(e.to_string()))
}

fn unsupported(method: &str) -> (ErrorCode, String) {
    (
        ErrorCode::UnsupportedMethodError,
        format!("unsupported method: {method}"),
    )
}

fn is_batch(raw: &[u8]) -> bool {
    raw.iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|&b| b == b'[')
}

fn sweep_rate_buckets(limiter: Arc<RateLimiter>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RATE_BUCKET_SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => limiter.retain_recent(RATE_BUCKET_IDLE_TTL),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_batch() {
        assert!(is_batch(b"[]"));
        assert!(is_batch(b" \n\t[{}]"));
        assert!(!is_batch(b"{}"));
        assert!(!is_batch(b""));
    }

    #[tokio::test]
    async fn test_empty_registry_rejects_method() {
        let service = GatewayService::new(ServiceConfig::default(), HandlerRegistry::default());
        let raw = br#"{"jsonrpc":"2.0","id":"1","method":"nope","params":[]}"#;

        let (reply, status) = service.process_request(raw, &CancellationToken::new()).await;
        assert_eq!(status, 400);
        let response = Response::decode(&reply).unwrap();
        assert_eq!(response.error_code(), ErrorCode::UnsupportedMethodError);
        assert_eq!(response.id, "1");

        let metrics = service.metrics();
        assert_eq!(metrics.responses(ErrorCode::UnsupportedMethodError), 1);
        assert_eq!(metrics.requests_total.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_parse_error() {
        let service = GatewayService::new(ServiceConfig::default(), HandlerRegistry::default());
        let (reply, status) = service.process_request(b"{not json", &CancellationToken::new()).await;
        assert_eq!(status, 400);
        assert_eq!(
            Response::decode(&reply).unwrap().error_code(),
            ErrorCode::UserMessageParseError
        );
    }

    #[tokio::test]
    async fn test_oversized_request_rejected() {
        let config = ServiceConfig {
            max_request_bytes: 8,
            ..Default::default()
        };
        let service = GatewayService::new(config, HandlerRegistry::default());
        let (_, status) = service
            .process_request(br#"{"jsonrpc":"2.0"}"#, &CancellationToken::new())
            .await;
        assert_eq!(status, 400);
        assert_eq!(service.metrics().responses(ErrorCode::UserMessageParseError), 1);
    }
}
