//! Gateway configuration with validation.
//!
//! Loading (files, environment) is left to the embedding process; these
//! types only deserialize and validate.

use std::collections::HashSet;
use std::time::Duration;

use don_admission::{RateLimiterConfig, ResourcePoolConfig};
use don_egress::HttpClientConfig;
use serde::{Deserialize, Serialize};
use shared_crypto::Address;
use shared_types::MESSAGE_DON_ID_MAX_LEN;

use crate::handlers::http_action::HTTP_ACTION_METHOD;

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Front-end request handling
    pub service: ServiceConfig,
    /// One entry per DON served by this gateway
    pub dons: Vec<DonConfig>,
    /// Outbound HTTP policy for handlers
    pub egress: HttpClientConfig,
    /// Request-rate admission (disabled when absent)
    pub rate_limit: Option<RateLimiterConfig>,
    /// In-flight admission (disabled when absent)
    pub resource_pool: Option<ResourcePoolConfig>,
}

impl GatewayConfig {
    /// Validate configuration and lower-case member addresses.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.service.validate()?;

        let mut don_ids = HashSet::new();
        let mut methods = HashSet::new();
        for don in &mut self.dons {
            don.validate()?;
            if !don_ids.insert(don.don_id.clone()) {
                return Err(ConfigError::DuplicateDon(don.don_id.clone()));
            }
            for method in don.handler.served_methods() {
                if !methods.insert(method.clone()) {
                    return Err(ConfigError::DuplicateMethod(method));
                }
            }
        }

        if let Some(rate_limit) = &self.rate_limit {
            rate_limit
                .validate()
                .map_err(|e| ConfigError::InvalidRateLimit(e.to_string()))?;
        }

        if let Some(pool) = &self.resource_pool {
            if pool.global_limit == 0 || pool.per_owner_limit == 0 {
                return Err(ConfigError::InvalidLimit(
                    "resource pool limits cannot be 0".into(),
                ));
            }
        }

        Ok(())
    }
}

/// Front-end request handling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// How long a user request waits for its reply
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Maximum entries in a JSON-RPC batch
    pub max_batch_size: usize,
    /// Maximum raw request size in bytes
    pub max_request_bytes: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_batch_size: 100,
            max_request_bytes: 1024 * 1024,
        }
    }
}

impl ServiceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "request_timeout cannot be 0".into(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::InvalidLimit("max_batch_size cannot be 0".into()));
        }
        if self.max_request_bytes == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_request_bytes cannot be 0".into(),
            ));
        }
        Ok(())
    }
}

/// A DON and the handler serving it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DonConfig {
    /// DON identifier carried in legacy messages
    pub don_id: String,
    /// Member nodes
    pub members: Vec<NodeConfig>,
    /// Handler settings
    pub handler: PassThroughConfig,
}

impl DonConfig {
    fn validate(&mut self) -> Result<(), ConfigError> {
        if self.don_id.is_empty() || self.don_id.len() > MESSAGE_DON_ID_MAX_LEN {
            return Err(ConfigError::Invalid(format!(
                "don_id must be 1..={MESSAGE_DON_ID_MAX_LEN} bytes, got {}",
                self.don_id.len()
            )));
        }
        if self.members.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "DON {} has no members",
                self.don_id
            )));
        }

        let mut seen = HashSet::new();
        for member in &mut self.members {
            let address: Address = member
                .address
                .parse()
                .map_err(|_| ConfigError::InvalidAddress(member.address.clone()))?;
            member.address = address.to_hex();
            if !seen.insert(member.address.clone()) {
                return Err(ConfigError::DuplicateMember(member.address.clone()));
            }
        }

        self.handler.validate()
    }
}

/// A DON member node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Operator-facing name
    pub name: String,
    /// Signing address, `0x` + 40 hex chars
    pub address: String,
}

/// Pass-through handler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PassThroughConfig {
    /// Methods routed to this handler
    pub methods: Vec<String>,
    /// How long a callback slot waits for a node reply
    #[serde(with = "humantime_serde")]
    pub callback_ttl: Duration,
    /// How often expired slots are reaped
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
    /// Node message rate: `per_owner` applies per node address, `global`
    /// to all members together (disabled when absent)
    pub node_rate_limit: Option<RateLimiterConfig>,
    /// Serve `http_action` requests from nodes through the egress client
    pub outbound_http: bool,
}

impl Default for PassThroughConfig {
    fn default() -> Self {
        Self {
            methods: Vec::new(),
            callback_ttl: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(1),
            node_rate_limit: None,
            outbound_http: false,
        }
    }
}

impl PassThroughConfig {
    /// Configured methods, plus `http_action` when outbound HTTP is on.
    pub fn served_methods(&self) -> Vec<String> {
        let mut methods = self.methods.clone();
        if self.outbound_http {
            methods.push(HTTP_ACTION_METHOD.to_string());
        }
        methods
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.methods.is_empty() {
            return Err(ConfigError::Invalid("handler has no methods".into()));
        }
        if self.methods.iter().any(String::is_empty) {
            return Err(ConfigError::Invalid("method name cannot be empty".into()));
        }
        if self.callback_ttl.is_zero() {
            return Err(ConfigError::InvalidTimeout("callback_ttl cannot be 0".into()));
        }
        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "cleanup_interval cannot be 0".into(),
            ));
        }
        if let Some(limits) = &self.node_rate_limit {
            limits
                .validate()
                .map_err(|e| ConfigError::InvalidRateLimit(e.to_string()))?;
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Two DON entries share an id.
    #[error("duplicate DON id: {0}")]
    DuplicateDon(String),

    /// A DON lists the same member address twice.
    #[error("duplicate DON member: {0}")]
    DuplicateMember(String),

    /// A method is claimed by more than one DON's handler.
    #[error("method served by more than one handler: {0}")]
    DuplicateMethod(String),

    /// Member address is not `0x` + 40 hex chars.
    #[error("invalid node address: {0}")]
    InvalidAddress(String),

    /// A rate level has a non-positive rps or burst.
    #[error("invalid rate limit: {0}")]
    InvalidRateLimit(String),

    /// A size or count limit is zero.
    #[error("invalid limit: {0}")]
    InvalidLimit(String),

    /// A duration is zero.
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),

    /// Anything else.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
