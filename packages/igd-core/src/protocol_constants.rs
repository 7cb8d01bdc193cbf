//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by external specifications (UPnP Device
//! Architecture, IGD:1, GENA, SSDP) and changing them would break protocol
//! compliance. Tunable timings live in [`Config`](crate::state::Config).

// ─────────────────────────────────────────────────────────────────────────────
// Device and Service Types
// ─────────────────────────────────────────────────────────────────────────────

/// Device type name of an Internet Gateway Device (any version).
pub const IGD_DEVICE_TYPE: &str = "InternetGatewayDevice";

/// Device type name of the WAN sub-device of an IGD.
pub const WAN_DEVICE_TYPE: &str = "WANDevice";

/// Device type name of the connection sub-device of a WANDevice.
pub const WAN_CONNECTION_DEVICE_TYPE: &str = "WANConnectionDevice";

/// Namespace prefix shared by all standard UPnP device types.
pub const UPNP_DEVICE_URN_PREFIX: &str = "urn:schemas-upnp-org:device:";

/// Namespace prefix shared by all standard UPnP service types.
pub const UPNP_SERVICE_URN_PREFIX: &str = "urn:schemas-upnp-org:service:";

// ─────────────────────────────────────────────────────────────────────────────
// SSDP
// ─────────────────────────────────────────────────────────────────────────────

/// Standard SSDP multicast address and port.
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250:1900";

/// Search target used for gateway discovery.
pub const SSDP_SEARCH_TARGET: &str = "urn:schemas-upnp-org:device:InternetGatewayDevice:1";

// ─────────────────────────────────────────────────────────────────────────────
// GENA (UPnP General Event Notification Architecture)
// ─────────────────────────────────────────────────────────────────────────────

/// Time before subscription expiry to trigger renewal (seconds).
///
/// Half of the default 600 s subscription leaves room for several retries.
pub const GENA_RENEWAL_BUFFER_SECS: u64 = 300;

/// Interval between subscription renewal checks (seconds).
pub const GENA_RENEWAL_CHECK_SECS: u64 = 60;

/// Path of the GENA NOTIFY callback route on the local HTTP server.
pub const GENA_CALLBACK_PATH: &str = "/upnp/gena";

/// Maximum size of GENA notification body (bytes).
pub const MAX_GENA_BODY_SIZE: usize = 64 * 1024;

/// Name of the evented state variable carrying the WAN address.
pub const EXTERNAL_IP_STATE_VARIABLE: &str = "ExternalIPAddress";

// ─────────────────────────────────────────────────────────────────────────────
// HTTP/SOAP
// ─────────────────────────────────────────────────────────────────────────────

/// Timeout for SOAP HTTP requests (seconds).
///
/// 10 seconds is reasonable for LAN operations.
pub const SOAP_TIMEOUT_SECS: u64 = 10;

/// UPnP error code returned by GetSpecificPortMappingEntry for unknown entries.
pub const NO_SUCH_ENTRY_IN_ARRAY: u16 = 714;

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name used in protocol data (USER-AGENT, health endpoint).
pub const APP_NAME: &str = "IGD Agent";

/// Service identifier returned by the health endpoint.
pub const SERVICE_ID: &str = "igd-agent";
