//! Admission errors. Denials are ordinary values the caller turns into a
//! user-facing reply, not failures of the limiter.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Level of the limiter hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Shared by everyone.
    Global,
    /// One owner.
    Owner,
    /// One workflow.
    Workflow,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scope::Global => "global",
            Scope::Owner => "owner",
            Scope::Workflow => "workflow",
        })
    }
}

/// Request rate denied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rate limited at {scope} scope, retry after {retry_after:?}")]
pub struct RateLimited {
    /// Level that denied.
    pub scope: Scope,
    /// Earliest time a retry could succeed at that level.
    pub retry_after: Duration,
}

/// Held-resource ceiling reached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("resource limit reached at {scope} scope: {in_use} in use + {requested} requested > {limit}")]
pub struct ResourceLimited {
    /// Level that denied.
    pub scope: Scope,
    /// Ceiling at that level.
    pub limit: u64,
    /// Units held at that level.
    pub in_use: u64,
    /// Units asked for.
    pub requested: u64,
}

/// Limiter construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitError {
    /// Rejected configuration value.
    #[error("invalid limiter configuration: {0}")]
    InvalidConfig(String),
}
