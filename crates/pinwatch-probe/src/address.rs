//! Base URI to dial target.

use std::net::IpAddr;
use url::{Host, Url};

use crate::error::{ProbeError, ProbeResult};

/// Port used when the base URI does not name one.
pub const DEFAULT_PORT: u16 = 443;

/// Where a probe connects, and the name the certificate must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Host as written in the URI (IPv6 without brackets)
    pub host: String,
    /// Set when the host is an IP literal
    pub ip: Option<IpAddr>,
    /// TCP port
    pub port: u16,
}

/// Split a base URI into host and port.
pub fn parse_base_uri(base_uri: &str) -> ProbeResult<Target> {
    let url = Url::parse(base_uri)
        .map_err(|e| ProbeError::InvalidAddress(format!("invalid base_uri: {e}")))?;

    let (host, ip) = match url.host() {
        Some(Host::Domain(domain)) if !domain.is_empty() => (domain.to_string(), None),
        Some(Host::Ipv4(v4)) => (v4.to_string(), Some(IpAddr::V4(v4))),
        Some(Host::Ipv6(v6)) => (v6.to_string(), Some(IpAddr::V6(v6))),
        _ => {
            return Err(ProbeError::InvalidAddress(format!(
                "invalid base_uri: no host in '{base_uri}'"
            )))
        }
    };

    Ok(Target {
        host,
        ip,
        port: url.port().unwrap_or(DEFAULT_PORT),
    })
}
