//! Hierarchical token-bucket rate limiter.
//!
//! A request must pass every level, checked in order workflow → owner →
//! global. The first denial stops the chain, so later levels are not
//! charged for a request that was refused anyway.

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as Governor,
};
use tracing::debug;

use crate::config::{RateLimit, RateLimiterConfig};
use crate::error::{LimitError, RateLimited, Scope};
use crate::identity::Identity;

type DirectLimiter = Governor<NotKeyed, InMemoryState, DefaultClock>;

/// Token bucket of one key.
struct Bucket {
    limiter: DirectLimiter,
    /// Last access time (for cleanup)
    last_access: Instant,
}

impl Bucket {
    fn new(quota: Quota) -> Self {
        Self {
            limiter: Governor::direct(quota),
            last_access: Instant::now(),
        }
    }

    fn check(&mut self) -> Result<(), Duration> {
        self.last_access = Instant::now();
        check_direct(&self.limiter)
    }
}

fn check_direct(limiter: &DirectLimiter) -> Result<(), Duration> {
    limiter
        .check()
        .map_err(|not_until| not_until.wait_time_from(DefaultClock::default().now()))
}

fn quota(level: &RateLimit) -> Result<Quota, LimitError> {
    let invalid = || LimitError::InvalidConfig(format!("unrepresentable rate {}", level.rps));
    let period = Duration::try_from_secs_f64(1.0 / level.rps).map_err(|_| invalid())?;
    let burst = NonZeroU32::new(level.burst)
        .ok_or_else(|| LimitError::InvalidConfig("burst must be positive".into()))?;
    Ok(Quota::with_period(period).ok_or_else(invalid)?.allow_burst(burst))
}

/// Keyed buckets created on first use.
struct KeyedLevel {
    quota: Quota,
    buckets: DashMap<String, Bucket>,
}

impl KeyedLevel {
    fn new(level: &RateLimit) -> Result<Self, LimitError> {
        Ok(Self {
            quota: quota(level)?,
            buckets: DashMap::new(),
        })
    }

    fn check(&self, key: &str) -> Result<(), Duration> {
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::new(self.quota));
        bucket.check()
    }

    fn cleanup(&self, max_age: Duration) {
        let now = Instant::now();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_access) <= max_age);
    }
}

/// Workflow → owner → global token buckets.
pub struct RateLimiter {
    workflow: Option<KeyedLevel>,
    owner: KeyedLevel,
    global: DirectLimiter,
}

impl RateLimiter {
    /// Build from configuration. Fails if any rps or burst is not positive.
    pub fn new(config: &RateLimiterConfig) -> Result<Self, LimitError> {
        config.validate()?;
        Ok(Self {
            workflow: config
                .per_workflow
                .as_ref()
                .map(KeyedLevel::new)
                .transpose()?,
            owner: KeyedLevel::new(&config.per_owner)?,
            global: Governor::direct(quota(&config.global)?),
        })
    }

    /// Take one token at every level, or report the first level that denied.
    pub fn check(&self, identity: &Identity) -> Result<(), RateLimited> {
        if let (Some(level), Some(workflow)) = (&self.workflow, &identity.workflow) {
            level
                .check(workflow)
                .map_err(|retry_after| denied(Scope::Workflow, identity, retry_after))?;
        }

        self.owner
            .check(&identity.owner_key())
            .map_err(|retry_after| denied(Scope::Owner, identity, retry_after))?;

        check_direct(&self.global).map_err(|retry_after| denied(Scope::Global, identity, retry_after))
    }

    /// `true` when every level admits the request.
    pub fn allow(&self, identity: &Identity) -> bool {
        self.check(identity).is_ok()
    }

    /// [`RateLimiter::check`] with the ambient identity (anonymous if unset).
    pub fn check_current(&self) -> Result<(), RateLimited> {
        self.check(&Identity::current().unwrap_or_default())
    }

    /// [`RateLimiter::allow`] with the ambient identity (anonymous if unset).
    pub fn allow_current(&self) -> bool {
        self.check_current().is_ok()
    }

    /// Drop keyed buckets idle for longer than `max_age` (call periodically).
    pub fn retain_recent(&self, max_age: Duration) {
        self.owner.cleanup(max_age);
        if let Some(level) = &self.workflow {
            level.cleanup(max_age);
        }
    }

    /// Number of live keyed buckets.
    pub fn tracked_keys(&self) -> usize {
        self.owner.buckets.len() + self.workflow.as_ref().map_or(0, |l| l.buckets.len())
    }
}

fn denied(scope: Scope, identity: &Identity, retry_after: Duration) -> RateLimited {
    debug!(
        scope = %scope,
        owner = %identity.owner,
        retry_after_ms = retry_after.as_millis() as u64,
        "Rate limit exceeded"
    );
    RateLimited { scope, retry_after }
}
