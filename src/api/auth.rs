//! Access control for the status endpoint: source-address allowlist and bearer token

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use axum::http::HeaderMap;

/// Constant-time string comparison to prevent timing side-channel attacks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
}

/// Check the request against the expected token. An empty expectation disables auth.
pub fn validate_bearer(headers: &HeaderMap, expected: &str) -> bool {
    if expected.is_empty() {
        return true;
    }
    bearer_token(headers).is_some_and(|token| constant_time_eq(token, expected))
}

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("invalid CIDR range: {0}")]
pub struct CidrParseError(String);

/// An IPv4 or IPv6 network in CIDR notation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
            v4 => v4,
        };
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = v4_mask(self.prefix_len);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = v6_mask(self.prefix_len);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

impl FromStr for CidrRange {
    type Err = CidrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CidrParseError(s.to_string());
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let network: IpAddr = addr.parse().map_err(|_| invalid())?;
        let prefix_len: u8 = prefix.parse().map_err(|_| invalid())?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        if prefix_len > max {
            return Err(invalid());
        }

        // Normalise host bits away so equality compares networks
        let network = match network {
            IpAddr::V4(v4) => IpAddr::V4(Ipv4Addr::from(u32::from(v4) & v4_mask(prefix_len))),
            IpAddr::V6(v6) => IpAddr::V6(Ipv6Addr::from(u128::from(v6) & v6_mask(prefix_len))),
        };
        Ok(Self { network, prefix_len })
    }
}

fn v4_mask(prefix_len: u8) -> u32 {
    u32::MAX.checked_shl(32 - u32::from(prefix_len)).unwrap_or(0)
}

fn v6_mask(prefix_len: u8) -> u128 {
    u128::MAX.checked_shl(128 - u32::from(prefix_len)).unwrap_or(0)
}

/// Source-address allowlist. Empty allows every address.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    ranges: Vec<CidrRange>,
}

impl Allowlist {
    /// Parse each range, skipping invalid ones with a warning
    pub fn parse(cidrs: &[String]) -> Self {
        let ranges = cidrs
            .iter()
            .filter_map(|cidr| match cidr.parse::<CidrRange>() {
                Ok(range) => Some(range),
                Err(e) => {
                    log::warn!("Ignoring {}", e);
                    None
                }
            })
            .collect();
        Self { ranges }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Whether `ip` may connect; an unknown source is refused when a list is set
    pub fn allows(&self, ip: Option<IpAddr>) -> bool {
        if self.ranges.is_empty() {
            return true;
        }
        ip.is_some_and(|ip| self.ranges.iter().any(|range| range.contains(ip)))
    }
}
