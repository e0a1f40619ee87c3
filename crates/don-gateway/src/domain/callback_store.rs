//! Callback Store - correlates node replies with waiting user requests.
//!
//! Flow:
//! 1. Handler calls `register()` with the request id and its [`Callback`]
//! 2. Handler broadcasts the request to the DON
//! 3. The first valid node reply calls `take()` and delivers
//! 4. The reaper calls `expire()`; stale slots receive the timeout reply
//!
//! `take()` and `expire()` both remove the slot atomically, so exactly one
//! of them owns the callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::callback::{Callback, UserCallbackPayload};

struct CallbackSlot {
    callback: Callback,
    created_at: Instant,
    expiry_time: Option<Instant>,
}

impl CallbackSlot {
    fn expired_at(&self, now: Instant) -> bool {
        self.expiry_time.is_some_and(|expiry| expiry <= now)
    }
}

/// Counters for the callback store.
#[derive(Debug, Default)]
pub struct CallbackStats {
    /// Slots registered
    pub total_registered: AtomicU64,
    /// Replies delivered to a waiting caller
    pub total_delivered: AtomicU64,
    /// Slots reaped with the timeout reply
    pub total_expired: AtomicU64,
    /// Replies discarded because the caller was gone
    pub total_abandoned: AtomicU64,
    /// Registrations refused for an in-flight id
    pub total_conflicts: AtomicU64,
}

/// Request id → callback map with optional per-slot expiry.
#[derive(Default)]
pub struct CallbackStore {
    slots: DashMap<String, CallbackSlot>,
    stats: Arc<CallbackStats>,
}

impl CallbackStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Park `callback` under `id`, expiring at `expiry_time` if given.
    ///
    /// An id whose caller is still waiting is a conflict and the callback
    /// is handed back. A slot whose caller has gone is replaced.
    pub fn register(
        &self,
        id: &str,
        callback: Callback,
        expiry_time: Option<Instant>,
    ) -> Result<(), Callback> {
        let slot = CallbackSlot {
            callback,
            created_at: Instant::now(),
            expiry_time,
        };

        match self.slots.entry(id.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().callback.is_abandoned() {
                    self.stats.total_conflicts.fetch_add(1, Ordering::Relaxed);
                    warn!(request_id = id, "Request id already in flight");
                    return Err(slot.callback);
                }
                occupied.insert(slot);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
            }
        }

        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);
        debug!(request_id = id, expires = expiry_time.is_some(), "Registered callback");
        Ok(())
    }

    /// Remove and return the callback for `id`.
    pub fn take(&self, id: &str) -> Option<Callback> {
        self.slots.remove(id).map(|(_, slot)| slot.callback)
    }

    /// Take the slot for `id` and deliver `payload`.
    ///
    /// Returns true if a waiting caller received it.
    pub fn deliver(&self, id: &str, payload: UserCallbackPayload) -> bool {
        let Some((_, slot)) = self.slots.remove(id) else {
            debug!(request_id = id, "Reply for unknown or completed request");
            return false;
        };

        let elapsed = slot.created_at.elapsed();
        match slot.callback.send_response(payload) {
            Ok(()) => {
                self.stats.total_delivered.fetch_add(1, Ordering::Relaxed);
                debug!(
                    request_id = id,
                    response_time_ms = elapsed.as_millis(),
                    "Delivered reply"
                );
                true
            }
            Err(_) => {
                self.stats.total_abandoned.fetch_add(1, Ordering::Relaxed);
                debug!(request_id = id, "Caller gone before reply");
                false
            }
        }
    }

    /// Expiry of the slot for `id`, if it has one.
    pub fn expiry_time(&self, id: &str) -> Option<Instant> {
        self.slots.get(id).and_then(|slot| slot.expiry_time)
    }

    /// Remove and return every slot expired at `now`.
    pub fn take_expired(&self, now: Instant) -> Vec<(String, Callback)> {
        let expired: Vec<String> = self
            .slots
            .iter()
            .filter(|entry| entry.expired_at(now))
            .map(|entry| entry.key().clone())
            .collect();

        let mut taken = Vec::with_capacity(expired.len());
        for id in expired {
            // A reply may have taken the slot since the scan.
            let Some((id, slot)) = self.slots.remove_if(&id, |_, slot| slot.expired_at(now)) else {
                continue;
            };
            self.stats.total_expired.fetch_add(1, Ordering::Relaxed);
            warn!(
                request_id = %id,
                elapsed_ms = now.saturating_duration_since(slot.created_at).as_millis(),
                "Callback expired"
            );
            taken.push((id, slot.callback));
        }
        taken
    }

    /// Send the timeout reply to every slot expired at `now`.
    ///
    /// Returns the number of slots removed.
    pub fn expire(&self, now: Instant) -> usize {
        let taken = self.take_expired(now);
        let removed = taken.len();
        for (id, callback) in taken {
            if callback.send_timeout(&id).is_err() {
                self.stats.total_abandoned.fetch_add(1, Ordering::Relaxed);
            }
        }
        removed
    }

    /// Drop the slot for `id` without replying.
    pub fn cancel(&self, id: &str) -> bool {
        self.slots.remove(id).is_some()
    }

    /// Whether `id` has a slot.
    pub fn is_pending(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// `true` when no slots are held.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Counters.
    pub fn stats(&self) -> &CallbackStats {
        &self.stats
    }
}

/// Run [`CallbackStore::expire`] every `interval` until `cancel` fires.
pub fn cleanup_task(
    store: Arc<CallbackStore>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = store.expire(Instant::now());
                    if removed > 0 {
                        debug!(removed, remaining = store.len(), "Reaped expired callbacks");
                    }
                }
            }
        }
    })
}
