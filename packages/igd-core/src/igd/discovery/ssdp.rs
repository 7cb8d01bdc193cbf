//! SSDP search for Internet Gateway Devices.
//!
//! Sends M-SEARCH to 239.255.255.250:1900 from one socket per usable
//! interface. Gateways answer unicast to the sending socket, which also tells
//! us the local address each gateway is reachable from.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use local_ip_address::list_afinet_netifas;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};

use super::{is_virtual_interface, DiscoveryError, DiscoveryResult};
use crate::protocol_constants::{SSDP_MULTICAST_ADDR, SSDP_SEARCH_TARGET};

/// A parsed M-SEARCH response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpResponse {
    /// Description document URL.
    pub location: String,
    /// Device UDN taken from the USN header (`uuid:...`).
    pub udn: String,
    /// Advertised lifetime from `CACHE-CONTROL: max-age`.
    pub max_age: Option<u64>,
    /// Sender of the response.
    pub remote_address: IpAddr,
    /// Local interface address the response arrived on.
    pub local_address: IpAddr,
}

/// Configuration for SSDP search.
#[derive(Debug, Clone)]
pub struct SsdpConfig {
    /// Number of M-SEARCH packets to send per interface.
    pub send_count: u64,
    /// Delay between M-SEARCH retries.
    pub retry_delay: Duration,
    /// How long to collect responses.
    pub search_timeout: Duration,
    /// MX value (max response delay in seconds).
    pub mx_value: u64,
}

impl Default for SsdpConfig {
    fn default() -> Self {
        Self {
            send_count: 2,
            retry_delay: Duration::from_millis(800),
            search_timeout: Duration::from_secs(4),
            mx_value: 2,
        }
    }
}

fn build_msearch_message(mx: u64) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\r\n",
        SSDP_MULTICAST_ADDR, mx, SSDP_SEARCH_TARGET
    )
}

/// Returns the value of a header line, matching the name case-insensitively.
fn header_value<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    response.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
    })
}

/// Parses a search response. Returns `None` for anything that is not a gateway reply.
fn parse_ssdp_response(
    response: &str,
    remote_address: IpAddr,
    local_address: IpAddr,
) -> Option<SsdpResponse> {
    let status = response.lines().next()?;
    if !status.starts_with("HTTP/1.1 200") {
        return None;
    }

    let target = header_value(response, "ST")?;
    if !target.contains("InternetGatewayDevice") {
        return None;
    }

    let location = header_value(response, "LOCATION").filter(|l| !l.is_empty())?;
    let udn = header_value(response, "USN")?
        .split("::")
        .next()
        .filter(|u| u.to_ascii_lowercase().starts_with("uuid:"))?;

    let max_age = header_value(response, "CACHE-CONTROL").and_then(|v| {
        v.split(',').find_map(|d| {
            let (k, v) = d.split_once('=')?;
            k.trim()
                .eq_ignore_ascii_case("max-age")
                .then(|| v.trim().parse().ok())
                .flatten()
        })
    });

    Some(SsdpResponse {
        location: location.to_string(),
        udn: udn.to_string(),
        max_age,
        remote_address,
        local_address,
    })
}

/// Returns the IPv4 addresses of all usable, non-virtual interfaces.
fn usable_interfaces() -> Vec<(String, Ipv4Addr)> {
    list_afinet_netifas()
        .unwrap_or_else(|e| {
            log::warn!("[SSDP] Failed to list network interfaces: {}", e);
            Vec::new()
        })
        .into_iter()
        .filter_map(|(name, addr)| match addr {
            IpAddr::V4(ip) if !ip.is_loopback() && !is_virtual_interface(&name) => {
                Some((name, ip))
            }
            _ => None,
        })
        .collect()
}

/// Creates a non-blocking UDP socket bound to an interface address.
fn create_socket(iface_ip: Ipv4Addr) -> DiscoveryResult<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(DiscoveryError::SocketBind)?;

    if let Err(e) = socket.set_reuse_address(true) {
        log::warn!("[SSDP] Failed to set SO_REUSEADDR on {}: {}", iface_ip, e);
    }
    // UDA 1.0 recommends a TTL of 4 for SSDP
    if let Err(e) = socket.set_multicast_ttl_v4(4) {
        log::warn!("[SSDP] Failed to set multicast TTL on {}: {}", iface_ip, e);
    }

    socket
        .set_nonblocking(true)
        .map_err(DiscoveryError::SocketBind)?;
    socket
        .bind(&SocketAddr::new(IpAddr::V4(iface_ip), 0).into())
        .map_err(DiscoveryError::SocketBind)?;

    UdpSocket::from_std(socket.into()).map_err(DiscoveryError::SocketBind)
}

/// Searches for gateways on every usable interface.
///
/// Responses are deduplicated by UDN; the first interface to hear a gateway wins.
pub async fn search_gateways(config: &SsdpConfig) -> DiscoveryResult<Vec<SsdpResponse>> {
    let interfaces = usable_interfaces();
    if interfaces.is_empty() {
        return Err(DiscoveryError::NoInterfaces);
    }

    let mut sockets = Vec::new();
    for (name, ip) in interfaces {
        match create_socket(ip) {
            Ok(socket) => sockets.push((name, ip, Arc::new(socket))),
            Err(e) => log::warn!("[SSDP] Skipping {} ({}): {}", name, ip, e),
        }
    }
    if sockets.is_empty() {
        return Err(DiscoveryError::NoInterfaces);
    }

    log::debug!("[SSDP] Searching on {} interface(s)", sockets.len());

    let msg = build_msearch_message(config.mx_value);
    let found: Arc<Mutex<HashMap<String, SsdpResponse>>> = Arc::new(Mutex::new(HashMap::new()));

    let tasks = sockets.iter().map(|(name, ip, socket)| {
        let msg = msg.as_bytes();
        let found = Arc::clone(&found);
        let socket = Arc::clone(socket);
        async move {
            let send = async {
                for attempt in 0..config.send_count {
                    if attempt > 0 {
                        tokio::time::sleep(config.retry_delay).await;
                    }
                    if let Err(e) = socket.send_to(msg, SSDP_MULTICAST_ADDR).await {
                        log::warn!("[SSDP] M-SEARCH on {} failed: {}", name, e);
                    }
                }
            };

            let recv = async {
                let mut buf = [0u8; 2048];
                let deadline = Instant::now() + config.search_timeout;
                loop {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match timeout(remaining, socket.recv_from(&mut buf)).await {
                        Ok(Ok((len, src))) => {
                            let text = String::from_utf8_lossy(&buf[..len]);
                            if let Some(response) =
                                parse_ssdp_response(&text, src.ip(), IpAddr::V4(*ip))
                            {
                                log::trace!(
                                    "[SSDP] {} answered on {}: {}",
                                    src,
                                    name,
                                    response.location
                                );
                                found
                                    .lock()
                                    .entry(response.udn.clone())
                                    .or_insert(response);
                            }
                        }
                        Ok(Err(e)) => {
                            log::warn!("[SSDP] Receive error on {}: {}", name, e);
                            break;
                        }
                        Err(_) => break,
                    }
                }
            };

            tokio::join!(send, recv);
        }
    });

    futures::future::join_all(tasks).await;

    let mut responses: Vec<_> = std::mem::take(&mut *found.lock()).into_values().collect();
    responses.sort_by(|a, b| a.udn.cmp(&b.udn));

    log::debug!("[SSDP] Search complete: {} gateway(s)", responses.len());
    Ok(responses)
}
