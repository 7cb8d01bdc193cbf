//! Gateway discovery: SSDP search and device description loading.

pub mod description;
pub mod ssdp;

use thiserror::Error;

pub use description::{fetch_description, parse_description};
pub use ssdp::{search_gateways, SsdpConfig, SsdpResponse};

/// Errors that can occur during gateway discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Failed to bind UDP socket for discovery.
    #[error("failed to bind UDP socket: {0}")]
    SocketBind(#[source] std::io::Error),

    /// No usable network interfaces found.
    #[error("no usable network interfaces found")]
    NoInterfaces,

    /// Fetching a description document failed.
    #[error("failed to fetch description from {location}: {reason}")]
    DescriptionFetch { location: String, reason: String },

    /// A description document could not be parsed.
    #[error("invalid device description: {0}")]
    InvalidDescription(String),
}

/// Convenient Result alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Interface name prefixes of virtual and container interfaces.
pub const VIRTUAL_INTERFACE_PREFIXES: &[&str] = &[
    "lo", "docker", "veth", "br-", "virbr", "vmnet", "vbox", "utun", "tun", "tap", "wg",
];

/// Checks if an interface name belongs to a virtual/container interface.
pub fn is_virtual_interface(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    VIRTUAL_INTERFACE_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}
