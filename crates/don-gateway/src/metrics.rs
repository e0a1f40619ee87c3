//! Gateway counters.
//!
//! Shared between the service and its handlers; every counter is a relaxed
//! atomic so recording never contends with request processing.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use shared_types::ErrorCode;

/// Gateway metrics
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    // Request counters
    pub requests_total: AtomicU64,
    pub batches_total: AtomicU64,
    responses: DashMap<ErrorCode, u64>,

    // Admission counters
    pub rate_limit_rejected: AtomicU64,
    pub resource_limit_rejected: AtomicU64,

    // Node-side counters
    pub node_messages_total: AtomicU64,
    pub node_throttled: AtomicU64,
    pub node_messages_rejected: AtomicU64,

    // Outbound HTTP on behalf of nodes
    pub outbound_requests: AtomicU64,
    pub outbound_failures: AtomicU64,

    // Latency tracking
    pub total_latency_ms: AtomicU64,
    pub request_count_for_latency: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one answered user request.
    pub fn record_request(&self, code: ErrorCode, latency_ms: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        *self.responses.entry(code).or_insert(0) += 1;
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.request_count_for_latency.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a batch (its entries are recorded one by one).
    pub fn record_batch(&self) {
        self.batches_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record rate limit rejection
    pub fn record_rate_limit_rejection(&self) {
        self.rate_limit_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record in-flight limit rejection
    pub fn record_resource_limit_rejection(&self) {
        self.resource_limit_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a node message and whether it was accepted.
    pub fn record_node_message(&self, accepted: bool) {
        self.node_messages_total.fetch_add(1, Ordering::Relaxed);
        if !accepted {
            self.node_messages_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a node message refused by the node rate limiter.
    pub fn record_node_throttled(&self) {
        self.node_throttled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an outbound HTTP request made for a node.
    pub fn record_outbound(&self, success: bool) {
        self.outbound_requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.outbound_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// User requests answered with `code`.
    pub fn responses(&self, code: ErrorCode) -> u64 {
        self.responses.get(&code).map_or(0, |count| *count)
    }

    /// Get average latency in ms
    pub fn average_latency_ms(&self) -> f64 {
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        let count = self.request_count_for_latency.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_request_by_code() {
        let metrics = GatewayMetrics::new();
        metrics.record_request(ErrorCode::NoError, 10);
        metrics.record_request(ErrorCode::NoError, 30);
        metrics.record_request(ErrorCode::RequestTimeoutError, 50);

        assert_eq!(metrics.requests_total.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.responses(ErrorCode::NoError), 2);
        assert_eq!(metrics.responses(ErrorCode::RequestTimeoutError), 1);
        assert_eq!(metrics.responses(ErrorCode::ConflictError), 0);
        assert!((metrics.average_latency_ms() - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_node_and_outbound_counters() {
        let metrics = GatewayMetrics::new();
        metrics.record_node_message(true);
        metrics.record_node_message(false);
        metrics.record_node_throttled();
        metrics.record_outbound(false);

        assert_eq!(metrics.node_messages_total.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.node_messages_rejected.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.node_throttled.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.outbound_requests.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.outbound_failures.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_empty_average_is_zero() {
        assert_eq!(GatewayMetrics::new().average_latency_ms(), 0.0);
    }
}
