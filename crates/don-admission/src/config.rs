//! Admission control configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::LimitError;

/// One token-bucket level: sustained rate and burst size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Tokens added per second.
    pub rps: f64,
    /// Bucket capacity.
    pub burst: u32,
}

impl RateLimit {
    /// Level with `rps` and `burst`.
    pub const fn new(rps: f64, burst: u32) -> Self {
        Self { rps, burst }
    }

    fn validate(&self, level: &str) -> Result<(), LimitError> {
        if !self.rps.is_finite() || self.rps <= 0.0 {
            return Err(LimitError::InvalidConfig(format!(
                "{level} rps must be positive, got {}",
                self.rps
            )));
        }
        if self.burst == 0 {
            return Err(LimitError::InvalidConfig(format!(
                "{level} burst must be positive"
            )));
        }
        Ok(())
    }
}

/// Hierarchical rate limiter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Shared by every caller.
    pub global: RateLimit,
    /// Per owner address.
    pub per_owner: RateLimit,
    /// Per workflow id; level skipped when unset.
    pub per_workflow: Option<RateLimit>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            global: RateLimit::new(100.0, 100),
            per_owner: RateLimit::new(10.0, 10),
            per_workflow: None,
        }
    }
}

impl RateLimiterConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), LimitError> {
        self.global.validate("global")?;
        self.per_owner.validate("per_owner")?;
        if let Some(workflow) = &self.per_workflow {
            workflow.validate("per_workflow")?;
        }
        Ok(())
    }
}

/// Held-resource ceilings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcePoolConfig {
    /// Units held by everyone together.
    pub global_limit: u64,
    /// Units held by one owner unless overridden.
    pub per_owner_limit: u64,
    /// Owner-specific ceilings, keyed by owner address.
    pub owner_overrides: HashMap<String, u64>,
}

impl Default for ResourcePoolConfig {
    fn default() -> Self {
        Self {
            global_limit: 1000,
            per_owner_limit: 10,
            owner_overrides: HashMap::new(),
        }
    }
}
