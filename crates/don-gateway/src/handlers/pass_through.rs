//! Pass-through handler: relay user messages to every DON member and hand
//! the first valid node reply back to the user.
//!
//! Legacy and plain JSON-RPC requests are parked in separate callback
//! stores. A node reply is routed by the store holding its id, so a plain
//! (unsigned) reply can never complete a legacy request. Node messages
//! with an `http_action/...` id are outbound HTTP requests made through the
//! egress client when one is attached.

use std::sync::Arc;

use async_trait::async_trait;
use don_admission::{Identity, RateLimiter, ResourcePoolLimiter};
use don_egress::EgressClient;
use parking_lot::Mutex;
use shared_types::{ErrorCode, Message, RawJson, Request, Response};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::http_action::{self, is_http_action, OutboundHttpRequest, HTTP_ACTION_METHOD};
use super::Handler;
use crate::codec::JsonRpcCodec;
use crate::don::DonFacade;
use crate::domain::callback::{Callback, UserCallbackPayload};
use crate::domain::callback_store::{cleanup_task, CallbackStore};
use crate::domain::config::PassThroughConfig;
use crate::domain::error::{CodecError, HandlerError};
use crate::metrics::GatewayMetrics;

struct Reaper {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Reference handler.
pub struct PassThroughHandler {
    config: PassThroughConfig,
    don: Arc<DonFacade>,
    codec: JsonRpcCodec,
    legacy_callbacks: Arc<CallbackStore>,
    json_rpc_callbacks: Arc<CallbackStore>,
    rate_limiter: Option<Arc<RateLimiter>>,
    resource_pool: Option<Arc<ResourcePoolLimiter>>,
    node_rate_limiter: Option<Arc<RateLimiter>>,
    egress: Option<Arc<EgressClient>>,
    metrics: Arc<GatewayMetrics>,
    outbound: TaskTracker,
    outbound_cancel: Mutex<CancellationToken>,
    reaper: Mutex<Option<Reaper>>,
}

impl PassThroughHandler {
    /// Handler for `don`. Admission, node limits and egress are off until
    /// attached with the `with_*` builders.
    pub fn new(config: PassThroughConfig, don: Arc<DonFacade>) -> Self {
        Self {
            config,
            don,
            codec: JsonRpcCodec,
            legacy_callbacks: Arc::new(CallbackStore::new()),
            json_rpc_callbacks: Arc::new(CallbackStore::new()),
            rate_limiter: None,
            resource_pool: None,
            node_rate_limiter: None,
            egress: None,
            metrics: Arc::new(GatewayMetrics::new()),
            outbound: TaskTracker::new(),
            outbound_cancel: Mutex::new(CancellationToken::new()),
            reaper: Mutex::new(None),
        }
    }

    /// Check every user message against `limiter`.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Hold one unit of `pool` per in-flight request.
    pub fn with_resource_pool(mut self, pool: Arc<ResourcePoolLimiter>) -> Self {
        self.resource_pool = Some(pool);
        self
    }

    /// Check every node message against `limiter`, keyed by node address.
    pub fn with_node_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.node_rate_limiter = Some(limiter);
        self
    }

    /// Serve `http_action` node requests through `client`.
    pub fn with_egress(mut self, client: Arc<EgressClient>) -> Self {
        self.egress = Some(client);
        self
    }

    /// Record into `metrics` instead of a private set.
    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The DON this handler relays to.
    pub fn don(&self) -> &DonFacade {
        &self.don
    }

    /// Slots of signed legacy requests.
    pub fn legacy_callbacks(&self) -> &CallbackStore {
        &self.legacy_callbacks
    }

    /// Slots of plain JSON-RPC requests.
    pub fn json_rpc_callbacks(&self) -> &CallbackStore {
        &self.json_rpc_callbacks
    }

    /// Counters this handler records into.
    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    /// Requests waiting for a node reply.
    pub fn pending(&self) -> usize {
        self.legacy_callbacks.len() + self.json_rpc_callbacks.len()
    }

    /// Apply admission control. A denied request is answered on the spot
    /// and `None` returned.
    fn admit(&self, id: &str, identity: &Identity, callback: Callback) -> Option<Callback> {
        if let Some(limiter) = &self.rate_limiter {
            if let Err(denied) = limiter.check(identity) {
                debug!(request_id = id, owner = %identity.owner, scope = %denied.scope, "Request rate limited");
                self.metrics.record_rate_limit_rejection();
                answer(id, callback, ErrorCode::LimitExceededError, denied.to_string());
                return None;
            }
        }

        match &self.resource_pool {
            Some(pool) => match pool.acquire(identity, 1) {
                Ok(guard) => Some(callback.hold(guard)),
                Err(denied) => {
                    debug!(request_id = id, owner = %identity.owner, scope = %denied.scope, "Too many requests in flight");
                    self.metrics.record_resource_limit_rejection();
                    answer(id, callback, ErrorCode::LimitExceededError, denied.to_string());
                    None
                }
            },
            None => Some(callback),
        }
    }

    /// Park `callback` in `store` and broadcast `request`.
    async fn forward(
        &self,
        store: &CallbackStore,
        request: Request,
        callback: Callback,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        let id = request.id.clone();
        let expiry_time = Instant::now() + self.config.callback_ttl;
        if let Err(callback) = store.register(&id, callback, Some(expiry_time)) {
            answer(
                &id,
                callback,
                ErrorCode::ConflictError,
                format!("request {id} is already in flight"),
            );
            return Ok(());
        }

        if let Err(e) = self.don.broadcast(&request, cancel).await {
            warn!(don_id = %self.don.don_id(), request_id = %id, error = %e, "Broadcast failed");
            store.take(&id);
            return Err(e.into());
        }
        Ok(())
    }

    fn check_node_rate(&self, node_address: &str) -> Result<(), HandlerError> {
        let Some(limiter) = &self.node_rate_limiter else {
            return Ok(());
        };
        limiter.check(&Identity::new(node_address)).map_err(|denied| {
            self.metrics.record_node_throttled();
            warn!(don_id = %self.don.don_id(), node = node_address, scope = %denied.scope, "Node rate limited");
            HandlerError::NodeRateLimited {
                node: node_address.to_string(),
                source: denied,
            }
        })
    }

    fn route_node_message(&self, response: Response, node_address: &str) -> Result<(), HandlerError> {
        if !self.don.is_member(node_address) {
            warn!(don_id = %self.don.don_id(), node = node_address, "Reply from non-member");
            return Err(HandlerError::NotMember(node_address.to_string()));
        }
        self.check_node_rate(node_address)?;

        if self.json_rpc_callbacks.is_pending(&response.id) {
            return self.handle_json_rpc_reply(response, node_address);
        }
        if self.legacy_callbacks.is_pending(&response.id) {
            return self.handle_legacy_reply(response, node_address);
        }
        if is_http_action(&response.id) {
            if let Some(egress) = &self.egress {
                return self.handle_http_action(egress, response, node_address);
            }
        }

        debug!(request_id = %response.id, node = node_address, "Reply for unknown or completed request");
        Ok(())
    }

    fn handle_legacy_reply(&self, response: Response, node_address: &str) -> Result<(), HandlerError> {
        let mut message = self.codec.message_from_response(&response)?;
        message.body.message_id = response.id.clone();
        message.validate()?;

        if !message.body.sender.eq_ignore_ascii_case(node_address) {
            return Err(HandlerError::SenderMismatch {
                node: node_address.to_string(),
                sender: message.body.sender,
            });
        }
        if message.body.don_id != self.don.don_id() {
            return Err(HandlerError::UnsupportedDon {
                expected: self.don.don_id().to_string(),
                actual: message.body.don_id,
            });
        }

        let payload = match self.codec.encode_legacy_response(&message) {
            Ok(raw) => UserCallbackPayload::success(raw),
            Err(e) => UserCallbackPayload::error(
                &response.id,
                ErrorCode::NodeResponseEncodingError,
                e.to_string(),
            ),
        };
        if !self.legacy_callbacks.deliver(&response.id, payload) {
            debug!(message_id = %response.id, node = node_address, "Dropped node reply");
        }
        Ok(())
    }

    fn handle_json_rpc_reply(&self, response: Response, node_address: &str) -> Result<(), HandlerError> {
        let payload = UserCallbackPayload {
            raw_response: self.codec.encode_response(&response)?,
            error_code: response.error_code(),
        };
        if !self.json_rpc_callbacks.deliver(&response.id, payload) {
            debug!(request_id = %response.id, node = node_address, "Dropped node reply");
        }
        Ok(())
    }

    /// Make the requested call in the background and send the outcome to
    /// the requesting node only.
    fn handle_http_action(
        &self,
        egress: &Arc<EgressClient>,
        response: Response,
        node_address: &str,
    ) -> Result<(), HandlerError> {
        let result = response.result.as_ref().ok_or(CodecError::MissingResult)?;
        let request: OutboundHttpRequest = result.parse().map_err(CodecError::OutboundRequest)?;
        debug!(request_id = %response.id, node = node_address, method = %request.method, "Outbound request for node");

        let egress = Arc::clone(egress);
        let don = Arc::clone(&self.don);
        let metrics = Arc::clone(&self.metrics);
        let cancel = self.outbound_cancel.lock().clone();
        let node = node_address.to_string();
        let id = response.id;
        self.outbound.spawn(async move {
            let outcome = http_action::execute(&egress, request, &cancel).await;
            metrics.record_outbound(outcome.error_message.is_empty());

            let params = match RawJson::from_value(&outcome) {
                Ok(params) => params,
                Err(e) => {
                    warn!(request_id = %id, error = %e, "Outbound response encoding failed");
                    return;
                }
            };
            let reply = Request::new(id.clone(), HTTP_ACTION_METHOD, Some(params));
            if let Err(e) = don.send_to_node(&node, &reply).await {
                warn!(request_id = %id, node = %node, error = %e, "Outbound response not delivered");
            }
        });
        Ok(())
    }
}

/// Answer a request without involving the DON.
fn answer(id: &str, callback: Callback, code: ErrorCode, message: String) {
    if let Err(e) = callback.send_response(UserCallbackPayload::error(id, code, message)) {
        debug!(request_id = id, error = %e, "Caller gone before rejection");
    }
}

#[async_trait]
impl Handler for PassThroughHandler {
    fn methods(&self) -> Vec<String> {
        let mut methods = self.config.methods.clone();
        if self.egress.is_some() {
            methods.push(HTTP_ACTION_METHOD.to_string());
        }
        methods
    }

    async fn start(&self) -> Result<(), HandlerError> {
        let mut reaper = self.reaper.lock();
        if reaper.is_some() {
            return Ok(());
        }

        {
            let mut outbound_cancel = self.outbound_cancel.lock();
            if outbound_cancel.is_cancelled() {
                *outbound_cancel = CancellationToken::new();
            }
        }
        self.outbound.reopen();

        let cancel = CancellationToken::new();
        let interval = self.config.cleanup_interval;
        let tasks = vec![
            cleanup_task(Arc::clone(&self.legacy_callbacks), interval, cancel.clone()),
            cleanup_task(Arc::clone(&self.json_rpc_callbacks), interval, cancel.clone()),
        ];
        *reaper = Some(Reaper { cancel, tasks });

        info!(
            don_id = %self.don.don_id(),
            members = self.don.members().len(),
            methods = ?self.methods(),
            "Pass-through handler started"
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), HandlerError> {
        let reaper = self.reaper.lock().take();
        if let Some(reaper) = reaper {
            reaper.cancel.cancel();
            for task in reaper.tasks {
                task.await
                    .map_err(|e| HandlerError::Internal(format!("reaper task failed: {e}")))?;
            }

            self.outbound_cancel.lock().cancel();
            self.outbound.close();
            self.outbound.wait().await;
            info!(don_id = %self.don.don_id(), "Pass-through handler closed");
        }
        Ok(())
    }

    async fn handle_legacy_user_message(
        &self,
        message: Message,
        callback: Callback,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        if message.body.method == HTTP_ACTION_METHOD {
            return Err(HandlerError::NodeOnlyMethod(message.body.method));
        }
        if message.body.don_id != self.don.don_id() {
            return Err(HandlerError::UnsupportedDon {
                expected: self.don.don_id().to_string(),
                actual: message.body.don_id,
            });
        }

        let id = message.body.message_id.clone();
        let identity = Identity::current().unwrap_or_else(|| Identity::new(message.body.sender.clone()));
        let Some(callback) = self.admit(&id, &identity, callback) else {
            return Ok(());
        };

        let request = self.codec.legacy_request(&message)?;
        debug!(message_id = %id, don_id = %message.body.don_id, sender = %message.body.sender, "Relaying legacy message");
        self.forward(&self.legacy_callbacks, request, callback, cancel).await
    }

    async fn handle_json_rpc_user_message(
        &self,
        request: Request,
        callback: Callback,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        if request.id.is_empty() {
            return Err(HandlerError::MissingId);
        }
        if request.method == HTTP_ACTION_METHOD {
            return Err(HandlerError::NodeOnlyMethod(request.method));
        }

        let identity = Identity::current().unwrap_or_default();
        let Some(callback) = self.admit(&request.id, &identity, callback) else {
            return Ok(());
        };

        debug!(request_id = %request.id, method = %request.method, "Relaying JSON-RPC request");
        self.forward(&self.json_rpc_callbacks, request, callback, cancel).await
    }

    async fn handle_node_message(&self, response: Response, node_address: &str) -> Result<(), HandlerError> {
        let result = self.route_node_message(response, node_address);
        self.metrics.record_node_message(result.is_ok());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ChannelNodeSender;
    use crate::domain::callback::callback;
    use crate::domain::config::NodeConfig;
    use crate::handlers::http_action::OutboundHttpResponse;
    use bytes::Bytes;
    use don_admission::{RateLimit, RateLimiterConfig};
    use don_egress::{EgressError, HttpClientConfig, HttpResponse, PreparedRequest, Transport};
    use shared_crypto::EthSigner;
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixture {
        handler: PassThroughHandler,
        node: EthSigner,
        inbox: mpsc::Receiver<Request>,
    }

    impl Fixture {
        fn address(&self) -> String {
            self.node.address().to_hex()
        }
    }

    fn fixture_with(customize: impl FnOnce(PassThroughHandler) -> PassThroughHandler) -> Fixture {
        let node = EthSigner::generate();
        let sender = Arc::new(ChannelNodeSender::new());
        let inbox = sender.connect(&node.address().to_hex());
        let don = Arc::new(DonFacade::new(
            "don-a",
            vec![NodeConfig {
                name: "n1".into(),
                address: node.address().to_hex(),
            }],
            sender,
        ));
        let config = PassThroughConfig {
            methods: vec!["request".into()],
            callback_ttl: Duration::from_secs(5),
            cleanup_interval: Duration::from_millis(100),
            ..Default::default()
        };
        Fixture {
            handler: customize(PassThroughHandler::new(config, don)),
            node,
            inbox,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(|h| h)
    }

    fn user_message(id: &str) -> Message {
        let mut msg = Message::new(id, "request", "don-a", None);
        msg.sign(&EthSigner::generate()).unwrap();
        msg.validate().unwrap();
        msg
    }

    fn raw(text: &str) -> RawJson {
        RawJson::from_string(text).unwrap()
    }

    /// Answers every request with 200 and the method it saw.
    struct EchoTransport;

    #[async_trait]
    impl Transport for EchoTransport {
        async fn execute(&self, request: PreparedRequest) -> Result<HttpResponse, EgressError> {
            Ok(HttpResponse {
                status_code: 200,
                headers: HashMap::from([("x-method".to_string(), request.method)]),
                body: Bytes::from_static(b"hello"),
            })
        }
    }

    fn egress() -> Arc<EgressClient> {
        Arc::new(EgressClient::with_transport(HttpClientConfig::default(), Arc::new(EchoTransport)).unwrap())
    }

    async fn relay_plain(fx: &mut Fixture, id: &str) -> crate::domain::callback::CallbackWaiter {
        let (cb, waiter) = callback();
        fx.handler
            .handle_json_rpc_user_message(
                Request::new(id, "request", Some(raw("[1,2]"))),
                cb,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        fx.inbox.recv().await.unwrap();
        waiter
    }

    #[tokio::test]
    async fn test_legacy_relay_and_reply() {
        let mut fx = fixture();
        let (cb, waiter) = callback();
        fx.handler
            .handle_legacy_user_message(user_message("m-1"), cb, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(fx.handler.pending(), 1);

        let forwarded = fx.inbox.recv().await.unwrap();
        let mut reply = JsonRpcCodec.decode_legacy_message(&forwarded).unwrap().unwrap();
        reply.body.sender.clear();
        reply.sign(&fx.node).unwrap();
        let response = JsonRpcCodec.legacy_response(&reply).unwrap();

        fx.handler
            .handle_node_message(response, &fx.address())
            .await
            .unwrap();

        let payload = waiter.wait(&CancellationToken::new()).await.unwrap();
        assert_eq!(payload.error_code, ErrorCode::NoError);
        let mut delivered = JsonRpcCodec.decode_legacy_response(&payload.raw_response).unwrap();
        delivered.validate().unwrap();
        assert_eq!(delivered.body.sender, fx.address());
        assert_eq!(fx.handler.pending(), 0);
    }

    #[tokio::test]
    async fn test_wrong_don_rejected() {
        let fx = fixture();
        let mut msg = Message::new("m-1", "request", "don-b", None);
        msg.sign(&EthSigner::generate()).unwrap();
        let (cb, _waiter) = callback();

        let err = fx
            .handler
            .handle_legacy_user_message(msg, cb, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::UnsupportedDonIdError);
        assert_eq!(fx.handler.pending(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_failure_releases_slot() {
        let mut fx = fixture();
        fx.inbox.close();
        let (cb, _waiter) = callback();

        let result = fx
            .handler
            .handle_json_rpc_user_message(Request::new("r-1", "request", None), cb, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(HandlerError::Don(_))));
        assert!(!fx.handler.json_rpc_callbacks().is_pending("r-1"));
    }

    #[tokio::test]
    async fn test_plain_reply_forwarded_verbatim() {
        let mut fx = fixture();
        let waiter = relay_plain(&mut fx, "r-1").await;

        let response = Response::success("r-1", "request", raw(r#"{"answer":42}"#));
        fx.handler
            .handle_node_message(response.clone(), &fx.address())
            .await
            .unwrap();

        let payload = waiter.wait(&CancellationToken::new()).await.unwrap();
        assert_eq!(Response::decode(&payload.raw_response).unwrap(), response);
    }

    #[tokio::test]
    async fn test_plain_reply_with_body_key_reaches_caller() {
        let mut fx = fixture();
        let waiter = relay_plain(&mut fx, "r-1").await;

        let response = Response::success("r-1", "request", raw(r#"{"statusCode":200,"body":"aGVsbG8="}"#));
        fx.handler
            .handle_node_message(response.clone(), &fx.address())
            .await
            .unwrap();

        let payload = waiter.wait(&CancellationToken::new()).await.unwrap();
        assert_eq!(payload.error_code, ErrorCode::NoError);
        assert_eq!(Response::decode(&payload.raw_response).unwrap(), response);
    }

    #[tokio::test]
    async fn test_plain_reply_with_single_element_array() {
        let mut fx = fixture();
        let waiter = relay_plain(&mut fx, "r-1").await;

        let response = Response::success("r-1", "request", raw(r#"["x"]"#));
        fx.handler
            .handle_node_message(response.clone(), &fx.address())
            .await
            .unwrap();

        let payload = waiter.wait(&CancellationToken::new()).await.unwrap();
        assert_eq!(Response::decode(&payload.raw_response).unwrap(), response);
    }

    #[tokio::test]
    async fn test_plain_reply_cannot_complete_legacy_request() {
        let mut fx = fixture();
        let (cb, _waiter) = callback();
        fx.handler
            .handle_legacy_user_message(user_message("m-1"), cb, &CancellationToken::new())
            .await
            .unwrap();
        fx.inbox.recv().await.unwrap();

        let unsigned = Response::success("m-1", "request", raw(r#"{"price":1}"#));
        assert!(fx.handler.handle_node_message(unsigned, &fx.address()).await.is_err());
        assert!(fx.handler.legacy_callbacks().is_pending("m-1"));
    }

    #[tokio::test]
    async fn test_reply_for_unknown_id_ignored() {
        let fx = fixture();
        let response = Response::success("nobody", "request", raw("1"));
        fx.handler
            .handle_node_message(response, &fx.address())
            .await
            .unwrap();
        assert_eq!(fx.handler.metrics().node_messages_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_node_rate_limited() {
        let limits = RateLimiterConfig {
            global: RateLimit::new(100.0, 100),
            per_owner: RateLimit::new(0.001, 1),
            per_workflow: None,
        };
        let limiter = Arc::new(RateLimiter::new(&limits).unwrap());
        let fx = fixture_with(|h| h.with_node_rate_limiter(limiter));

        let reply = || Response::success("r-1", "request", raw("1"));
        fx.handler
            .handle_node_message(reply(), &fx.address())
            .await
            .unwrap();

        let err = fx
            .handler
            .handle_node_message(reply(), &fx.address())
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::NodeRateLimited { .. }));
        assert_eq!(err.error_code(), ErrorCode::LimitExceededError);

        let metrics = fx.handler.metrics();
        assert_eq!(metrics.node_throttled.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.node_messages_rejected.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_rejection_after_caller_gone() {
        let limits = RateLimiterConfig {
            global: RateLimit::new(0.001, 1),
            per_owner: RateLimit::new(0.001, 1),
            per_workflow: None,
        };
        let limiter = Arc::new(RateLimiter::new(&limits).unwrap());
        let mut fx = fixture_with(|h| h.with_rate_limiter(limiter));
        let _first = relay_plain(&mut fx, "r-1").await;

        // Rate limited, and nobody is left to read the answer.
        let (cb, waiter) = callback();
        drop(waiter);
        fx.handler
            .handle_json_rpc_user_message(Request::new("r-2", "request", None), cb, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(fx.handler.metrics().rate_limit_rejected.load(Ordering::Relaxed), 1);
        assert_eq!(fx.handler.pending(), 1);
    }

    #[tokio::test]
    async fn test_http_action_relayed_through_egress() {
        let mut fx = fixture_with(|h| h.with_egress(egress()));
        assert!(fx.handler.methods().contains(&HTTP_ACTION_METHOD.to_string()));

        let id = "http_action/wf-1/5f0c";
        let result = raw(r#"{"method":"get","url":"https://example.com/x","timeoutMs":1000}"#);
        fx.handler
            .handle_node_message(Response::success(id, HTTP_ACTION_METHOD, result), &fx.address())
            .await
            .unwrap();

        let sent = fx.inbox.recv().await.unwrap();
        assert_eq!(sent.id, id);
        assert_eq!(sent.method, HTTP_ACTION_METHOD);
        let outcome: OutboundHttpResponse = sent.params.unwrap().parse().unwrap();
        assert_eq!(outcome.status_code, 200);
        assert_eq!(outcome.body, b"hello");
        assert_eq!(outcome.headers["x-method"], "GET");
        assert!(outcome.error_message.is_empty());
        assert_eq!(fx.handler.metrics().outbound_requests.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_http_action_refusals_reported_to_node() {
        let mut fx = fixture_with(|h| h.with_egress(egress()));

        let internal = raw(r#"{"method":"GET","url":"http://127.0.0.1/admin"}"#);
        fx.handler
            .handle_node_message(
                Response::success("http_action/wf-1/a", HTTP_ACTION_METHOD, internal),
                &fx.address(),
            )
            .await
            .unwrap();
        let outcome: OutboundHttpResponse = fx.inbox.recv().await.unwrap().params.unwrap().parse().unwrap();
        assert_eq!(outcome.status_code, 0);
        assert!(!outcome.error_message.is_empty());
        assert!(outcome.is_external_endpoint_error);

        let bad_method = raw(r#"{"method":"TRACE","url":"https://example.com/"}"#);
        fx.handler
            .handle_node_message(
                Response::success("http_action/wf-1/b", HTTP_ACTION_METHOD, bad_method),
                &fx.address(),
            )
            .await
            .unwrap();
        let outcome: OutboundHttpResponse = fx.inbox.recv().await.unwrap().params.unwrap().parse().unwrap();
        assert!(!outcome.error_message.is_empty());
        assert!(!outcome.is_external_endpoint_error);
        assert_eq!(fx.handler.metrics().outbound_failures.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_http_action_needs_request_result() {
        let fx = fixture_with(|h| h.with_egress(egress()));
        let not_a_request = Response::success("http_action/wf-1/c", HTTP_ACTION_METHOD, raw("[1]"));
        let err = fx
            .handler
            .handle_node_message(not_a_request, &fx.address())
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Codec(CodecError::OutboundRequest(_))));
    }

    #[tokio::test]
    async fn test_http_action_not_served_to_users() {
        let fx = fixture_with(|h| h.with_egress(egress()));
        let (cb, _waiter) = callback();
        let err = fx
            .handler
            .handle_json_rpc_user_message(
                Request::new("r-1", HTTP_ACTION_METHOD, None),
                cb,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::UnsupportedMethodError);
        assert_eq!(fx.handler.pending(), 0);
    }

    #[tokio::test]
    async fn test_start_close_idempotent() {
        let fx = fixture_with(|h| h.with_egress(egress()));
        fx.handler.start().await.unwrap();
        fx.handler.start().await.unwrap();
        fx.handler.close().await.unwrap();
        fx.handler.close().await.unwrap();
        fx.handler.start().await.unwrap();
        fx.handler.close().await.unwrap();
    }
}
