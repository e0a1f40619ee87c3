//! # DON Admission Control
//!
//! Two independent primitives guard the gateway:
//!
//! ```text
//!   request ──► RateLimiter ─────────────► (how often)
//!               workflow → owner → global
//!
//!   work ─────► ResourcePoolLimiter ─────► (how much at once)
//!               global → owner (with overrides)
//! ```
//!
//! Both are keyed by an [`Identity`] that may be passed explicitly or read
//! from the ambient task-local set by [`identity::scope`]. Checks are O(1)
//! and never wait.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod identity;
pub mod rate;
pub mod resource;

pub use config::{RateLimit, RateLimiterConfig, ResourcePoolConfig};
pub use error::{LimitError, RateLimited, ResourceLimited, Scope};
pub use identity::{normalize_owner, scope, Identity};
pub use rate::RateLimiter;
pub use resource::{ResourceGuard, ResourcePoolLimiter};
