//! Destination policy: URL scheme/port checks and address filtering.
//!
//! Address checks run twice: on IP-literal URLs before the request, and on
//! every resolved address at connection time through [`PolicyResolver`], so
//! a host cannot pass the check and then rebind to an internal address.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::Url;
use tracing::debug;

use crate::config::HttpClientConfig;
use crate::error::{EgressError, PolicyViolation};

/// Network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpCidr {
    network: IpAddr,
    prefix: u8,
}

impl IpCidr {
    /// `true` when `ip` is inside the network. Families never mix.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, canonical(ip)) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = prefix_mask_u32(self.prefix);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = prefix_mask_u128(self.prefix);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn prefix_mask_u32(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn prefix_mask_u128(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}

impl FromStr for IpCidr {
    type Err = EgressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EgressError::Config(format!("invalid CIDR: {s}"));
        let (addr, prefix) = s.split_once('/').ok_or_else(invalid)?;
        let network = canonical(addr.trim().parse::<IpAddr>().map_err(|_| invalid())?);
        let prefix: u8 = prefix.trim().parse().map_err(|_| invalid())?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(invalid());
        }
        Ok(Self { network, prefix })
    }
}

/// IPv4-mapped IPv6 addresses are checked as IPv4.
fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}

/// Private, loopback, link-local or otherwise not publicly routable.
pub fn is_internal(ip: IpAddr) -> bool {
    match canonical(ip) {
        IpAddr::V4(addr) => is_internal_v4(addr),
        IpAddr::V6(addr) => is_internal_v6(addr),
    }
}

fn is_internal_v4(addr: Ipv4Addr) -> bool {
    addr.is_private()
        || addr.is_loopback()
        || addr.is_link_local()
        || addr.is_unspecified()
        || addr.is_multicast()
        || addr.is_broadcast()
        // 100.64.0.0/10 carrier-grade NAT
        || (addr.octets()[0] == 100 && (addr.octets()[1] & 0xC0) == 64)
        // 198.18.0.0/15 benchmarking
        || (addr.octets()[0] == 198 && (addr.octets()[1] & 0xFE) == 18)
        // 240.0.0.0/4 reserved
        || addr.octets()[0] >= 240
}

fn is_internal_v6(addr: Ipv6Addr) -> bool {
    addr.is_loopback()
        || addr.is_unspecified()
        || addr.is_multicast()
        || addr.is_unique_local()
        || addr.is_unicast_link_local()
        // 64:ff9b::/96 and 64:ff9b:1::/48 NAT64
        || addr.segments()[..6] == [0x64, 0xff9b, 0, 0, 0, 0]
        || addr.segments()[..3] == [0x64, 0xff9b, 1]
        // 2002::/16 6to4
        || addr.segments()[0] == 0x2002
}

/// Address allow/block lists.
#[derive(Debug, Clone, Default)]
pub struct IpPolicy {
    allowed_ips: Vec<IpAddr>,
    allowed_cidrs: Vec<IpCidr>,
    blocked_ips: Vec<IpAddr>,
    blocked_cidrs: Vec<IpCidr>,
}

impl IpPolicy {
    /// Parse the address lists of `config`.
    pub fn from_config(config: &HttpClientConfig) -> Result<Self, EgressError> {
        Ok(Self {
            allowed_ips: parse_ips(&config.allowed_ips)?,
            allowed_cidrs: parse_cidrs(&config.allowed_ips_cidr)?,
            blocked_ips: parse_ips(&config.blocked_ips)?,
            blocked_cidrs: parse_cidrs(&config.blocked_ips_cidr)?,
        })
    }

    /// Blocked entries always win. A non-empty allow list admits only its
    /// members (internal ones included); otherwise internal addresses are
    /// refused.
    pub fn check(&self, ip: IpAddr) -> Result<(), PolicyViolation> {
        let ip = canonical(ip);
        if self.blocked_ips.contains(&ip) || self.blocked_cidrs.iter().any(|c| c.contains(ip)) {
            return Err(PolicyViolation::BlockedIp(ip));
        }
        if !self.allowed_ips.is_empty() || !self.allowed_cidrs.is_empty() {
            if self.allowed_ips.contains(&ip) || self.allowed_cidrs.iter().any(|c| c.contains(ip)) {
                return Ok(());
            }
            return Err(PolicyViolation::NotAllowedIp(ip));
        }
        if is_internal(ip) {
            return Err(PolicyViolation::InternalIp(ip));
        }
        Ok(())
    }
}

fn parse_ips(values: &[String]) -> Result<Vec<IpAddr>, EgressError> {
    values
        .iter()
        .map(|v| {
            v.trim()
                .parse::<IpAddr>()
                .map(canonical)
                .map_err(|_| EgressError::Config(format!("invalid IP address: {v}")))
        })
        .collect()
}

fn parse_cidrs(values: &[String]) -> Result<Vec<IpCidr>, EgressError> {
    values.iter().map(|v| v.parse()).collect()
}

/// Scheme and port allow lists, plus the address policy for IP-literal hosts.
#[derive(Debug, Clone)]
pub struct UrlPolicy {
    schemes: Vec<String>,
    ports: Vec<u16>,
    ips: Arc<IpPolicy>,
}

impl UrlPolicy {
    /// Policy from a defaults-applied config.
    pub fn new(config: &HttpClientConfig, ips: Arc<IpPolicy>) -> Self {
        Self {
            schemes: config
                .allowed_schemes
                .iter()
                .map(|s| s.to_ascii_lowercase())
                .collect(),
            ports: config.allowed_ports.clone(),
            ips,
        }
    }

    /// Check everything knowable before connecting.
    pub fn check(&self, url: &Url) -> Result<(), PolicyViolation> {
        if !self.schemes.iter().any(|s| s == url.scheme()) {
            return Err(PolicyViolation::Scheme(url.scheme().to_string()));
        }
        let port = url.port_or_known_default().ok_or(PolicyViolation::MissingHost)?;
        if !self.ports.contains(&port) {
            return Err(PolicyViolation::Port(port));
        }
        let host = url.host_str().ok_or(PolicyViolation::MissingHost)?;
        let literal = host
            .strip_prefix('[')
            .and_then(|inner| inner.strip_suffix(']'))
            .unwrap_or(host);
        match literal.parse::<IpAddr>() {
            Ok(ip) => self.ips.check(ip),
            Err(_) => Ok(()),
        }
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// DNS resolver that drops addresses refused by the policy.
pub struct PolicyResolver {
    policy: Arc<IpPolicy>,
}

impl PolicyResolver {
    /// Resolver enforcing `policy`.
    pub fn new(policy: Arc<IpPolicy>) -> Self {
        Self { policy }
    }
}

impl Resolve for PolicyResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let policy = Arc::clone(&self.policy);
        Box::pin(async move {
            let host = name.as_str().to_string();
            let resolved = tokio::net::lookup_host((host.as_str(), 0))
                .await
                .map_err(|e| -> BoxError { Box::new(e) })?;
            let allowed: Vec<SocketAddr> = resolved
                .filter(|addr| match policy.check(addr.ip()) {
                    Ok(()) => true,
                    Err(violation) => {
                        debug!(host = %host, %violation, "Dropping resolved address");
                        false
                    }
                })
                .collect();
            if allowed.is_empty() {
                return Err(Box::new(PolicyViolation::NoAllowedAddress(host)) as BoxError);
            }
            let addrs: Addrs = Box::new(allowed.into_iter());
            Ok::<Addrs, BoxError>(addrs)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_cidr_contains() {
        let net: IpCidr = "10.1.0.0/16".parse().unwrap();
        assert!(net.contains(ip("10.1.200.3")));
        assert!(!net.contains(ip("10.2.0.1")));
        assert!(net.contains(ip("::ffff:10.1.0.9")));

        let v6: IpCidr = "fd00::/8".parse().unwrap();
        assert!(v6.contains(ip("fd12::1")));
        assert!(!v6.contains(ip("10.1.0.1")));

        let all: IpCidr = "0.0.0.0/0".parse().unwrap();
        assert!(all.contains(ip("8.8.8.8")));
    }

    #[test]
    fn test_cidr_parse_errors() {
        assert!("10.0.0.0".parse::<IpCidr>().is_err());
        assert!("10.0.0.0/33".parse::<IpCidr>().is_err());
        assert!("nope/8".parse::<IpCidr>().is_err());
    }

    #[test]
    fn test_internal_addresses_refused_by_default() {
        let policy = IpPolicy::default();
        for addr in [
            "127.0.0.1",
            "10.0.0.1",
            "192.168.1.1",
            "169.254.169.254",
            "0.0.0.0",
            "100.64.0.1",
            "::1",
            "fe80::1",
            "fc00::1",
            "::ffff:127.0.0.1",
            "198.18.0.1",
            "198.19.255.254",
            "240.0.0.1",
            "255.255.255.254",
            "64:ff9b::a00:1",
            "64:ff9b:1::1",
            "2002:a00:1::1",
        ] {
            assert_eq!(policy.check(ip(addr)), Err(PolicyViolation::InternalIp(canonical(ip(addr)))));
        }
        assert!(policy.check(ip("93.184.216.34")).is_ok());
        assert!(policy.check(ip("198.20.0.1")).is_ok());
        assert!(policy.check(ip("2606:4700::1111")).is_ok());
    }

    #[test]
    fn test_allow_list_overrides_internal_but_not_block_list() {
        let config = HttpClientConfig {
            allowed_ips: vec!["127.0.0.1".into()],
            allowed_ips_cidr: vec!["10.0.0.0/8".into()],
            blocked_ips: vec!["10.0.0.5".into()],
            ..Default::default()
        };
        let policy = IpPolicy::from_config(&config).unwrap();

        assert!(policy.check(ip("127.0.0.1")).is_ok());
        assert!(policy.check(ip("10.9.9.9")).is_ok());
        assert_eq!(policy.check(ip("10.0.0.5")), Err(PolicyViolation::BlockedIp(ip("10.0.0.5"))));
        assert_eq!(
            policy.check(ip("93.184.216.34")),
            Err(PolicyViolation::NotAllowedIp(ip("93.184.216.34")))
        );
    }

    #[test]
    fn test_url_policy() {
        let mut config = HttpClientConfig::default();
        config.apply_defaults();
        let policy = UrlPolicy::new(&config, Arc::new(IpPolicy::default()));

        assert!(policy.check(&Url::parse("https://example.com/x").unwrap()).is_ok());
        assert_eq!(
            policy.check(&Url::parse("ftp://example.com/").unwrap()),
            Err(PolicyViolation::Scheme("ftp".into()))
        );
        assert_eq!(
            policy.check(&Url::parse("http://example.com:8080/").unwrap()),
            Err(PolicyViolation::Port(8080))
        );
        assert!(matches!(
            policy.check(&Url::parse("http://169.254.169.254/latest/meta-data").unwrap()),
            Err(PolicyViolation::InternalIp(_))
        ));
        assert!(matches!(
            policy.check(&Url::parse("http://[::1]/").unwrap()),
            Err(PolicyViolation::InternalIp(_))
        ));
    }

    #[tokio::test]
    async fn test_resolver_drops_refused_addresses() {
        let resolver = PolicyResolver::new(Arc::new(IpPolicy::default()));
        let name: Name = "localhost".parse().unwrap();
        let result = resolver.resolve(name).await;
        assert!(result.is_err());
    }
}
