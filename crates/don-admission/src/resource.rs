//! Held-resource limiter.
//!
//! Counts units currently held (for example concurrent executions) per
//! owner and in total. Unlike the rate limiter nothing refills: units come
//! back only through [`ResourcePoolLimiter::free`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::ResourcePoolConfig;
use crate::error::{ResourceLimited, Scope};
use crate::identity::{normalize_owner, Identity};

#[derive(Default)]
struct PoolState {
    global_in_use: u64,
    per_owner: HashMap<String, u64>,
}

/// Global and per-owner ceilings on held units.
pub struct ResourcePoolLimiter {
    global_limit: u64,
    per_owner_limit: u64,
    overrides: HashMap<String, u64>,
    state: Mutex<PoolState>,
}

impl ResourcePoolLimiter {
    /// Build from configuration; override keys are normalized.
    pub fn new(config: &ResourcePoolConfig) -> Self {
        let overrides = config
            .owner_overrides
            .iter()
            .map(|(owner, limit)| (normalize_owner(owner), *limit))
            .collect();
        Self {
            global_limit: config.global_limit,
            per_owner_limit: config.per_owner_limit,
            overrides,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Ceiling that applies to `owner`.
    pub fn limit_for(&self, owner: &str) -> u64 {
        self.overrides
            .get(&normalize_owner(owner))
            .copied()
            .unwrap_or(self.per_owner_limit)
    }

    /// Take `amount` units for `identity`. Checks the global ceiling, then
    /// the owner ceiling; on denial nothing changes.
    pub fn reserve(&self, identity: &Identity, amount: u64) -> Result<(), ResourceLimited> {
        let owner = identity.owner_key();
        let owner_limit = self.limit_for(&owner);

        let mut state = self.state.lock();
        if state.global_in_use.saturating_add(amount) > self.global_limit {
            return Err(self.denied(Scope::Global, &owner, self.global_limit, state.global_in_use, amount));
        }
        let owner_in_use = state.per_owner.get(&owner).copied().unwrap_or(0);
        if owner_in_use.saturating_add(amount) > owner_limit {
            return Err(self.denied(Scope::Owner, &owner, owner_limit, owner_in_use, amount));
        }

        state.global_in_use += amount;
        *state.per_owner.entry(owner).or_insert(0) += amount;
        Ok(())
    }

    /// Return `amount` units held by `identity`. Never fails; counters
    /// saturate at zero.
    pub fn free(&self, identity: &Identity, amount: u64) {
        let owner = identity.owner_key();
        let mut state = self.state.lock();
        state.global_in_use = state.global_in_use.saturating_sub(amount);
        if let Some(held) = state.per_owner.get_mut(&owner) {
            *held = held.saturating_sub(amount);
            if *held == 0 {
                state.per_owner.remove(&owner);
            }
        }
    }

    /// [`ResourcePoolLimiter::reserve`] returning a guard that frees on drop.
    pub fn acquire(
        self: &Arc<Self>,
        identity: &Identity,
        amount: u64,
    ) -> Result<ResourceGuard, ResourceLimited> {
        self.reserve(identity, amount)?;
        Ok(ResourceGuard {
            pool: Arc::clone(self),
            identity: identity.clone(),
            amount,
        })
    }

    /// [`ResourcePoolLimiter::acquire`] with the ambient identity (anonymous if unset).
    pub fn acquire_current(self: &Arc<Self>, amount: u64) -> Result<ResourceGuard, ResourceLimited> {
        self.acquire(&Identity::current().unwrap_or_default(), amount)
    }

    /// Units held by `owner`.
    pub fn in_use(&self, owner: &str) -> u64 {
        self.state
            .lock()
            .per_owner
            .get(&normalize_owner(owner))
            .copied()
            .unwrap_or(0)
    }

    /// Units held by everyone.
    pub fn global_in_use(&self) -> u64 {
        self.state.lock().global_in_use
    }

    fn denied(&self, scope: Scope, owner: &str, limit: u64, in_use: u64, requested: u64) -> ResourceLimited {
        debug!(scope = %scope, owner = owner, limit, in_use, requested, "Resource limit reached");
        ResourceLimited {
            scope,
            limit,
            in_use,
            requested,
        }
    }
}

/// Units held until dropped.
pub struct ResourceGuard {
    pool: Arc<ResourcePoolLimiter>,
    identity: Identity,
    amount: u64,
}

impl ResourceGuard {
    /// Units held by this guard.
    pub fn amount(&self) -> u64 {
        self.amount
    }
}

impl std::fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("identity", &self.identity)
            .field("amount", &self.amount)
            .finish()
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.pool.free(&self.identity, self.amount);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(global: u64, per_owner: u64) -> ResourcePoolLimiter {
        ResourcePoolLimiter::new(&ResourcePoolConfig {
            global_limit: global,
            per_owner_limit: per_owner,
            owner_overrides: HashMap::new(),
        })
    }

    #[test]
    fn test_denial_leaves_counters_untouched() {
        let pool = pool(3, 2);
        let a = Identity::new("a");
        pool.reserve(&a, 2).unwrap();

        let err = pool.reserve(&a, 1).unwrap_err();
        assert_eq!(
            err,
            ResourceLimited {
                scope: Scope::Owner,
                limit: 2,
                in_use: 2,
                requested: 1
            }
        );
        assert_eq!(pool.in_use("a"), 2);
        assert_eq!(pool.global_in_use(), 2);
    }

    #[test]
    fn test_free_saturates() {
        let pool = pool(3, 3);
        let a = Identity::new("a");
        pool.reserve(&a, 1).unwrap();
        pool.free(&a, 5);
        pool.free(&Identity::new("never-used"), 1);
        assert_eq!(pool.in_use("a"), 0);
        assert_eq!(pool.global_in_use(), 0);
    }

    #[test]
    fn test_override_keys_normalized() {
        let mut overrides = HashMap::new();
        overrides.insert("0xABCD".to_string(), 5);
        let pool = ResourcePoolLimiter::new(&ResourcePoolConfig {
            global_limit: 100,
            per_owner_limit: 1,
            owner_overrides: overrides,
        });
        assert_eq!(pool.limit_for("abcd"), 5);
        assert_eq!(pool.limit_for("0XaBcD"), 5);
        assert_eq!(pool.limit_for("other"), 1);
    }

    #[test]
    fn test_guard_frees_on_drop() {
        let pool = Arc::new(pool(2, 2));
        let a = Identity::new("a");
        {
            let guard = pool.acquire(&a, 2).unwrap();
            assert_eq!(guard.amount(), 2);
            assert!(pool.acquire(&a, 1).is_err());
        }
        assert_eq!(pool.global_in_use(), 0);
        assert!(pool.acquire(&a, 1).is_ok());
    }

    #[test]
    fn test_concurrent_reserve_never_exceeds_ceiling() {
        let pool = Arc::new(pool(50, 1000));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    let id = Identity::new(format!("owner-{}", i % 3));
                    (0..100).filter(|_| pool.reserve(&id, 1).is_ok()).count()
                })
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 50);
        assert_eq!(pool.global_in_use(), 50);
    }
}
