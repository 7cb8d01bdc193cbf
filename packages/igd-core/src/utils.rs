//! General utilities shared across the application.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::igd::types::ServiceRef;
use crate::protocol_constants::GENA_CALLBACK_PATH;

/// Errors that can occur while resolving local addresses.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Could not detect local IP address.
    #[error("Failed to detect local IP: {0}")]
    Detection(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Address Classification
// ─────────────────────────────────────────────────────────────────────────────

fn is_public_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    // 100.64.0.0/10 is carrier-grade NAT space
    let shared = a == 100 && (64..128).contains(&b);
    !(ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_broadcast()
        || shared)
}

fn is_public_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    let unique_local = (first & 0xfe00) == 0xfc00;
    let link_local = (first & 0xffc0) == 0xfe80;
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_public_v4(v4);
    }
    !(ip.is_unspecified() || ip.is_loopback() || ip.is_multicast() || unique_local || link_local)
}

/// Returns true if `ip` can be a public (WAN-side) address.
///
/// Rejects private, loopback, link-local, multicast, broadcast, unspecified
/// and carrier-grade NAT ranges. A router behind another NAT reports one of
/// these as its "external" address.
#[must_use]
pub fn is_public_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => is_public_v6(v6),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Local Address Resolution
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the local address a gateway's service is reachable from.
///
/// Uses the interface the gateway was discovered on, falling back to the
/// host's primary address.
///
/// # Errors
/// Returns [`NetworkError::Detection`] if neither is available.
pub fn resolve_local_address(service: &ServiceRef) -> Result<IpAddr, NetworkError> {
    if let Some(ip) = service.local_address {
        return Ok(ip);
    }
    local_ip_address::local_ip().map_err(|e| NetworkError::Detection(e.to_string()))
}

/// Builds the GENA callback URL for the local HTTP server.
#[must_use]
pub fn gena_callback_url(ip: IpAddr, port: u16) -> String {
    format!("http://{}{}", SocketAddr::new(ip, port), GENA_CALLBACK_PATH)
}
