//! Single-use reply channel between a handler and the waiting front-end.
//!
//! [`callback`] creates the two halves. The [`Callback`] travels into the
//! handler (and usually into a [`CallbackStore`](super::callback_store::CallbackStore));
//! the [`CallbackWaiter`] stays with the request. Sending consumes the
//! callback, so a reply can be delivered at most once.

use don_admission::ResourceGuard;
use shared_types::{ErrorCode, Response, WireError};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Message of the canned timeout reply.
pub const TIMEOUT_MESSAGE: &str = "timeout exceeded";

/// Reply handed back to the front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCallbackPayload {
    /// Bytes sent to the user verbatim.
    pub raw_response: Vec<u8>,
    /// Outcome class, drives the HTTP status.
    pub error_code: ErrorCode,
}

impl UserCallbackPayload {
    /// Successful reply.
    pub fn success(raw_response: Vec<u8>) -> Self {
        Self {
            raw_response,
            error_code: ErrorCode::NoError,
        }
    }

    /// JSON-RPC error reply for request `id`.
    pub fn error(id: &str, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            raw_response: encode_error(id, code, message.into()),
            error_code: code,
        }
    }

    /// Canned reply for a request whose slot expired.
    pub fn timeout(id: &str) -> Self {
        Self::error(id, ErrorCode::RequestTimeoutError, TIMEOUT_MESSAGE)
    }
}

/// JSON-RPC error bytes; never fails.
pub(crate) fn encode_error(id: &str, code: ErrorCode, message: String) -> Vec<u8> {
    let response = Response::failure(id, WireError::from_code(code, message));
    serde_json::to_vec(&response).unwrap_or_else(|e| format!("fatal error: {e}").into_bytes())
}

/// Callback failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CallbackError {
    /// The waiter is gone; the reply was discarded.
    #[error("caller is no longer waiting")]
    Abandoned,

    /// The waiter's cancellation scope ended first.
    #[error("request cancelled")]
    Cancelled,

    /// The callback was dropped without a reply.
    #[error("handler dropped the callback without replying")]
    Dropped,
}

/// Create a connected callback pair.
pub fn callback() -> (Callback, CallbackWaiter) {
    let (sender, receiver) = oneshot::channel();
    (
        Callback {
            sender,
            guard: None,
        },
        CallbackWaiter { receiver },
    )
}

/// Sending half. Consumed by the first reply.
#[derive(Debug)]
pub struct Callback {
    sender: oneshot::Sender<UserCallbackPayload>,
    guard: Option<ResourceGuard>,
}

impl Callback {
    /// Hold `guard` until the callback is consumed or dropped.
    pub fn hold(mut self, guard: ResourceGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Deliver `payload`. Never blocks; if the waiter is gone the reply is
    /// abandoned.
    pub fn send_response(self, payload: UserCallbackPayload) -> Result<(), CallbackError> {
        self.sender
            .send(payload)
            .map_err(|_| CallbackError::Abandoned)
    }

    /// Deliver the canned timeout reply for request `id`.
    pub fn send_timeout(self, id: &str) -> Result<(), CallbackError> {
        self.send_response(UserCallbackPayload::timeout(id))
    }

    /// `true` once the waiter is gone.
    pub fn is_abandoned(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Receiving half.
#[derive(Debug)]
pub struct CallbackWaiter {
    receiver: oneshot::Receiver<UserCallbackPayload>,
}

impl CallbackWaiter {
    /// Wait for the reply or for `cancel`.
    pub async fn wait(self, cancel: &CancellationToken) -> Result<UserCallbackPayload, CallbackError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(CallbackError::Cancelled),
            reply = self.receiver => reply.map_err(|_| CallbackError::Dropped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use don_admission::{Identity, ResourcePoolConfig, ResourcePoolLimiter};
    use shared_types::Response;

    #[tokio::test]
    async fn test_reply_delivered_once() {
        let (cb, waiter) = callback();
        cb.send_response(UserCallbackPayload::success(b"{}".to_vec())).unwrap();

        let reply = waiter.wait(&CancellationToken::new()).await.unwrap();
        assert_eq!(reply.raw_response, b"{}");
        assert_eq!(reply.error_code, ErrorCode::NoError);
    }

    #[tokio::test]
    async fn test_send_after_waiter_gone_is_abandoned() {
        let (cb, waiter) = callback();
        drop(waiter);
        assert!(cb.is_abandoned());
        assert_eq!(
            cb.send_response(UserCallbackPayload::success(vec![])),
            Err(CallbackError::Abandoned)
        );
    }

    #[tokio::test]
    async fn test_wait_cancelled() {
        let (_cb, waiter) = callback();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(waiter.wait(&cancel).await, Err(CallbackError::Cancelled));
    }

    #[tokio::test]
    async fn test_dropped_callback() {
        let (cb, waiter) = callback();
        drop(cb);
        assert_eq!(
            waiter.wait(&CancellationToken::new()).await,
            Err(CallbackError::Dropped)
        );
    }

    #[tokio::test]
    async fn test_timeout_payload() {
        let (cb, waiter) = callback();
        cb.send_timeout("req-1").unwrap();

        let reply = waiter.wait(&CancellationToken::new()).await.unwrap();
        assert_eq!(reply.error_code, ErrorCode::RequestTimeoutError);
        let response: Response = serde_json::from_slice(&reply.raw_response).unwrap();
        assert_eq!(response.id, "req-1");
        assert_eq!(response.error.unwrap().message, TIMEOUT_MESSAGE);
    }

    #[test]
    fn test_guard_released_with_callback() {
        let pool = Arc::new(ResourcePoolLimiter::new(&ResourcePoolConfig {
            global_limit: 1,
            per_owner_limit: 1,
            ..Default::default()
        }));
        let owner = Identity::new("a");

        let (cb, _waiter) = callback();
        let cb = cb.hold(pool.acquire(&owner, 1).unwrap());
        assert_eq!(pool.global_in_use(), 1);

        let _ = cb.send_response(UserCallbackPayload::success(vec![]));
        assert_eq!(pool.global_in_use(), 0);
    }
}
