//! Domain types for gateway devices, their WAN services and port mappings.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::services::IgdServiceKind;
use crate::protocol_constants::{IGD_DEVICE_TYPE, UPNP_DEVICE_URN_PREFIX};

// ─────────────────────────────────────────────────────────────────────────────
// Devices
// ─────────────────────────────────────────────────────────────────────────────

/// Unique device name (`uuid:...`) identifying a root or embedded device.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(udn: impl Into<String>) -> Self {
        Self(udn.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A service entry as listed in a device description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Full service type URN, e.g. `urn:schemas-upnp-org:service:WANIPConnection:1`.
    pub service_type: String,
    /// Service identifier, unique within its device.
    pub service_id: String,
    /// Absolute SOAP control URL.
    pub control_url: String,
    /// Absolute GENA event subscription URL.
    pub event_sub_url: String,
}

impl ServiceDescriptor {
    /// Returns the WAN service kind, or `None` for unrelated services.
    pub fn kind(&self) -> Option<IgdServiceKind> {
        IgdServiceKind::from_urn(&self.service_type)
    }
}

/// A discovered UPnP device with its embedded devices and services.
///
/// Root devices carry the network addresses they were seen on; embedded
/// devices inherit them from the root when services are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayDevice {
    pub udn: DeviceId,
    /// Full device type URN.
    pub device_type: String,
    pub friendly_name: String,
    /// Description document URL the device was loaded from.
    pub location: String,
    /// Local interface address the device was discovered on.
    pub local_address: Option<IpAddr>,
    /// Address of the device itself.
    pub remote_address: Option<IpAddr>,
    pub services: Vec<ServiceDescriptor>,
    pub children: Vec<GatewayDevice>,
}

impl GatewayDevice {
    /// Returns the bare device type name, ignoring namespace and version.
    pub fn type_name(&self) -> &str {
        device_type_name(&self.device_type)
    }

    /// Returns true for Internet Gateway Devices of any version.
    pub fn is_gateway(&self) -> bool {
        self.type_name() == IGD_DEVICE_TYPE
    }

    /// Returns the first embedded device of the given type name.
    pub fn first_child(&self, type_name: &str) -> Option<&GatewayDevice> {
        self.children.iter().find(|c| c.type_name() == type_name)
    }

    /// Returns the first service of the given kind on this device (not its children).
    pub fn find_service(&self, kind: IgdServiceKind) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.kind() == Some(kind))
    }

    /// Builds a service reference for a service of `device`, rooted at `self`.
    pub fn service_ref(
        &self,
        device: &GatewayDevice,
        descriptor: &ServiceDescriptor,
        kind: IgdServiceKind,
    ) -> ServiceRef {
        ServiceRef {
            root: self.udn.clone(),
            device: device.udn.clone(),
            kind,
            service_type: descriptor.service_type.clone(),
            service_id: descriptor.service_id.clone(),
            control_url: descriptor.control_url.clone(),
            event_sub_url: descriptor.event_sub_url.clone(),
            local_address: self.local_address,
            remote_address: self.remote_address,
        }
    }

    /// Returns references for every WAN service in this device tree.
    pub fn wan_services(&self) -> Vec<ServiceRef> {
        let mut out = Vec::new();
        self.collect_wan_services(self, &mut out);
        out
    }

    fn collect_wan_services(&self, root: &GatewayDevice, out: &mut Vec<ServiceRef>) {
        for descriptor in &self.services {
            if let Some(kind) = descriptor.kind() {
                out.push(root.service_ref(self, descriptor, kind));
            }
        }
        for child in &self.children {
            child.collect_wan_services(root, out);
        }
    }
}

/// Strips the standard namespace prefix and version from a device type URN.
pub fn device_type_name(device_type: &str) -> &str {
    device_type
        .strip_prefix(UPNP_DEVICE_URN_PREFIX)
        .and_then(|rest| rest.split(':').next())
        .unwrap_or(device_type)
}

// ─────────────────────────────────────────────────────────────────────────────
// Services
// ─────────────────────────────────────────────────────────────────────────────

/// Identity of a service: its device plus its service id.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServiceKey {
    pub device: DeviceId,
    pub service_id: String,
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.service_id)
    }
}

/// A resolved WAN service of a reachable gateway.
///
/// Holds the root device id as a back-reference instead of a pointer to the
/// device; the registry owns the device index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRef {
    /// Root device (the gateway itself).
    pub root: DeviceId,
    /// Embedded device offering the service.
    pub device: DeviceId,
    pub kind: IgdServiceKind,
    pub service_type: String,
    pub service_id: String,
    pub control_url: String,
    pub event_sub_url: String,
    /// Local interface address the gateway was discovered on.
    pub local_address: Option<IpAddr>,
    pub remote_address: Option<IpAddr>,
}

impl ServiceRef {
    pub fn key(&self) -> ServiceKey {
        ServiceKey {
            device: self.device.clone(),
            service_id: self.service_id.clone(),
        }
    }
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.kind, self.device)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// External Address and Rates
// ─────────────────────────────────────────────────────────────────────────────

/// An external address reported by a gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedIp {
    pub address: IpAddr,
    /// Whether the gateway supports inbound connections to this address.
    ///
    /// Always false for UPnP-reported addresses: reachability is unknown.
    pub supported: bool,
}

impl DetectedIp {
    /// An address reported by a gateway, with reachability unknown.
    pub fn reported(address: IpAddr) -> Self {
        Self {
            address,
            supported: false,
        }
    }
}

/// Summed maximum bit rates of the WAN links, in bits per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IgdRates {
    pub upstream: u64,
    pub downstream: u64,
}

impl std::ops::AddAssign for IgdRates {
    fn add_assign(&mut self, other: Self) {
        self.upstream = self.upstream.saturating_add(other.upstream);
        self.downstream = self.downstream.saturating_add(other.downstream);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Port Mappings
// ─────────────────────────────────────────────────────────────────────────────

/// Transport protocol of a port mapping.
#[derive(
    Debug, Clone, Copy, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum PortProtocol {
    Tcp,
    #[default]
    Udp,
}

impl PortProtocol {
    /// Returns the protocol name as sent in SOAP arguments.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
        }
    }
}

impl fmt::Display for PortProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PortProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TCP" => Ok(Self::Tcp),
            "UDP" => Ok(Self::Udp),
            other => Err(format!("unknown protocol: {other}")),
        }
    }
}

/// A port the host application wants reachable from outside.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ForwardPort {
    /// Human-readable name, embedded in the mapping description.
    pub name: String,
    #[serde(default)]
    pub protocol: PortProtocol,
    pub port: u16,
}

impl ForwardPort {
    pub fn new(name: impl Into<String>, protocol: PortProtocol, port: u16) -> Self {
        Self {
            name: name.into(),
            protocol,
            port,
        }
    }
}

impl fmt::Display for ForwardPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.name, self.port, self.protocol)
    }
}

/// Outcome reported for a forwarded port after a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ForwardPortStatus {
    /// Nothing is known yet.
    PendingUnknown,
    /// The router accepted the mapping; reachability is not verified.
    MaybeSuccess { external_port: u16 },
    /// The router rejected the mapping.
    DefiniteFailure { reason: String, port: u16 },
}

/// A mapping as installed on a router.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub external_port: u16,
    pub internal_port: u16,
    pub internal_client: IpAddr,
    pub protocol: PortProtocol,
    pub description: String,
    pub enabled: bool,
    /// Lease duration in seconds; 0 means permanent.
    pub lease_duration: u32,
}

impl PortMapping {
    /// Builds the permanent, enabled mapping for `port` toward `internal_client`.
    pub fn for_port(port: &ForwardPort, internal_client: IpAddr, description_prefix: &str) -> Self {
        Self {
            external_port: port.port,
            internal_port: port.port,
            internal_client,
            protocol: port.protocol,
            description: format!("{}{}", description_prefix, port.name),
            enabled: true,
            lease_duration: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::igd::test_fixtures::{igd_device, IP_SERVICE_ID};

    #[test]
    fn device_type_name_strips_namespace_and_version() {
        assert_eq!(
            device_type_name("urn:schemas-upnp-org:device:InternetGatewayDevice:2"),
            "InternetGatewayDevice"
        );
        assert_eq!(device_type_name("custom"), "custom");
    }

    #[test]
    fn wan_services_walks_the_whole_tree() {
        let device = igd_device("uuid:gw-1", true);
        let services = device.wan_services();

        assert_eq!(services.len(), 2);
        assert!(services.iter().all(|s| s.root == device.udn));
        let ip = services
            .iter()
            .find(|s| s.kind == IgdServiceKind::WanIpConnection)
            .expect("ip connection present");
        assert_eq!(ip.service_id, IP_SERVICE_ID);
        assert_eq!(ip.local_address, device.local_address);
    }

    #[test]
    fn mapping_uses_same_internal_and_external_port() {
        let port = ForwardPort::new("Node", PortProtocol::Udp, 51413);
        let mapping = PortMapping::for_port(&port, "192.168.1.20".parse().unwrap(), "Agent ");

        assert_eq!(mapping.external_port, 51413);
        assert_eq!(mapping.internal_port, 51413);
        assert_eq!(mapping.description, "Agent Node");
        assert!(mapping.enabled);
        assert_eq!(mapping.lease_duration, 0);
    }

    #[test]
    fn protocol_parses_case_insensitively() {
        assert_eq!("udp".parse::<PortProtocol>(), Ok(PortProtocol::Udp));
        assert_eq!("TCP".parse::<PortProtocol>(), Ok(PortProtocol::Tcp));
        assert!("sctp".parse::<PortProtocol>().is_err());
    }

    #[test]
    fn rates_add_saturates() {
        let mut rates = IgdRates {
            upstream: u64::MAX,
            downstream: 1,
        };
        rates += IgdRates {
            upstream: 5,
            downstream: 2,
        };
        assert_eq!(rates.upstream, u64::MAX);
        assert_eq!(rates.downstream, 3);
    }
}
