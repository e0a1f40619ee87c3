//! Egress client configuration.
//!
//! Every field is optional: empty lists and zero values are replaced by the
//! defaults below when the client is built.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Hard ceiling on any request, whatever the caller asks for.
pub const MAX_REQUEST_DURATION: Duration = Duration::from_secs(60);

/// Timeout used when a request does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Response body cap: 26.4 KiB.
pub const DEFAULT_MAX_RESPONSE_BYTES: u32 = 27_033;

/// Ports reachable by default.
pub const DEFAULT_ALLOWED_PORTS: &[u16] = &[80, 443];

/// Schemes reachable by default.
pub const DEFAULT_ALLOWED_SCHEMES: &[&str] = &["http", "https"];

/// Methods allowed by default.
pub const DEFAULT_ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];

/// Headers the caller may not set.
pub const DEFAULT_BLOCKED_HEADERS: &[&str] = &[
    // set by the client from the URL and body
    "host",
    "content-length",
    "transfer-encoding",
    // the gateway identifies itself
    "user-agent",
    // protocol and connection control
    "upgrade",
    "expect",
    "connection",
    "keep-alive",
    "te",
    "trailer",
    // origin spoofing
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-proto",
    "x-real-ip",
];

/// Outbound HTTP policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Response body cap in bytes.
    pub max_response_bytes: u32,
    /// Timeout for requests that do not set one.
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,
    /// Addresses always refused.
    pub blocked_ips: Vec<String>,
    /// Networks always refused.
    pub blocked_ips_cidr: Vec<String>,
    /// Reachable ports.
    pub allowed_ports: Vec<u16>,
    /// Reachable URL schemes.
    pub allowed_schemes: Vec<String>,
    /// When set (with `allowed_ips_cidr`), the only reachable addresses.
    pub allowed_ips: Vec<String>,
    /// When set (with `allowed_ips`), the only reachable networks.
    pub allowed_ips_cidr: Vec<String>,
    /// Allowed request methods (case-insensitive).
    pub allowed_methods: Vec<String>,
    /// Refused request headers (case-insensitive).
    pub blocked_headers: Vec<String>,
}

impl HttpClientConfig {
    /// Replace unset fields with defaults.
    pub fn apply_defaults(&mut self) {
        if self.allowed_ports.is_empty() {
            self.allowed_ports = DEFAULT_ALLOWED_PORTS.to_vec();
        }
        if self.allowed_schemes.is_empty() {
            self.allowed_schemes = to_strings(DEFAULT_ALLOWED_SCHEMES);
        }
        if self.allowed_methods.is_empty() {
            self.allowed_methods = to_strings(DEFAULT_ALLOWED_METHODS);
        }
        if self.blocked_headers.is_empty() {
            self.blocked_headers = to_strings(DEFAULT_BLOCKED_HEADERS);
        }
        if self.max_response_bytes == 0 {
            self.max_response_bytes = DEFAULT_MAX_RESPONSE_BYTES;
        }
        if self.default_timeout.is_zero() {
            self.default_timeout = DEFAULT_TIMEOUT;
        }
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}
