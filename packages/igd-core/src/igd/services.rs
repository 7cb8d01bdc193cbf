//! IGD UPnP service definitions.
//!
//! Single source of truth for the WAN service types this crate understands
//! and for the action names invoked on them.

use serde::Serialize;

use crate::protocol_constants::UPNP_SERVICE_URN_PREFIX;

/// WAN services of an Internet Gateway Device used for control and eventing.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum IgdServiceKind {
    /// IP-routed WAN connection (most consumer routers).
    WanIpConnection,
    /// PPP WAN connection (DSL modems). The only kind reporting link-layer bit rates.
    WanPppConnection,
    /// Physical link properties of the WAN interface.
    WanCommonInterfaceConfig,
}

impl IgdServiceKind {
    /// Returns the bare UPnP service type name (without namespace or version).
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::WanIpConnection => "WANIPConnection",
            Self::WanPppConnection => "WANPPPConnection",
            Self::WanCommonInterfaceConfig => "WANCommonInterfaceConfig",
        }
    }

    /// Returns the version 1 service URN.
    #[must_use]
    pub fn urn(&self) -> &'static str {
        match self {
            Self::WanIpConnection => "urn:schemas-upnp-org:service:WANIPConnection:1",
            Self::WanPppConnection => "urn:schemas-upnp-org:service:WANPPPConnection:1",
            Self::WanCommonInterfaceConfig => {
                "urn:schemas-upnp-org:service:WANCommonInterfaceConfig:1"
            }
        }
    }

    /// Returns true for services that carry port mappings and the external address.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::WanIpConnection | Self::WanPppConnection)
    }

    /// Classifies a full service type URN, accepting any version.
    ///
    /// Returns `None` for services outside the WAN set.
    #[must_use]
    pub fn from_urn(urn: &str) -> Option<Self> {
        let name = urn
            .strip_prefix(UPNP_SERVICE_URN_PREFIX)?
            .split(':')
            .next()?;
        match name {
            "WANIPConnection" => Some(Self::WanIpConnection),
            "WANPPPConnection" => Some(Self::WanPppConnection),
            "WANCommonInterfaceConfig" => Some(Self::WanCommonInterfaceConfig),
            _ => None,
        }
    }
}

impl std::fmt::Display for IgdServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Control actions invoked on WAN services.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum IgdAction {
    GetExternalIpAddress,
    GetCommonLinkProperties,
    GetLinkLayerMaxBitRates,
    GetSpecificPortMappingEntry,
    AddPortMapping,
    DeletePortMapping,
}

impl IgdAction {
    /// Returns the SOAP action name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetExternalIpAddress => "GetExternalIPAddress",
            Self::GetCommonLinkProperties => "GetCommonLinkProperties",
            Self::GetLinkLayerMaxBitRates => "GetLinkLayerMaxBitRates",
            Self::GetSpecificPortMappingEntry => "GetSpecificPortMappingEntry",
            Self::AddPortMapping => "AddPortMapping",
            Self::DeletePortMapping => "DeletePortMapping",
        }
    }
}

impl std::fmt::Display for IgdAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
