//! Typed invokers for the IGD control actions.
//!
//! Each function builds the input arguments for one action, runs it through
//! a [`ControlPoint`] and maps the raw output arguments to a typed value.

use std::collections::HashMap;
use std::net::IpAddr;

use thiserror::Error;

use super::services::IgdAction;
use super::traits::ControlPoint;
use super::types::{IgdRates, PortMapping, PortProtocol, ServiceRef};
use crate::protocol_constants::NO_SUCH_ENTRY_IN_ARRAY;

/// Errors from invoking an IGD action.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    /// The device answered with a UPnP fault.
    #[error("UPnP error {code}: {description}")]
    Fault { code: u16, description: String },

    /// A required output argument was absent.
    #[error("missing output argument {0}")]
    MissingOutput(&'static str),

    /// An output argument could not be parsed.
    #[error("invalid value for {name}: {value:?}")]
    InvalidOutput { name: &'static str, value: String },

    /// The request did not complete (network, HTTP or envelope error).
    #[error("transport error: {0}")]
    Transport(String),
}

impl ActionError {
    /// Returns true if the device itself rejected the action.
    #[must_use]
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault { .. })
    }

    /// Message suitable for reporting to the caller: the router's description for faults.
    pub fn router_message(&self) -> String {
        match self {
            Self::Fault { description, .. } => description.clone(),
            other => other.to_string(),
        }
    }
}

/// A mapping entry reported by GetSpecificPortMappingEntry.
///
/// Routers vary in how completely they fill these fields, so all are optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingEntry {
    pub internal_port: Option<u16>,
    pub internal_client: Option<String>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
}

fn required<'a>(
    outputs: &'a HashMap<String, String>,
    name: &'static str,
) -> Result<&'a str, ActionError> {
    outputs
        .get(name)
        .map(|v| v.trim())
        .ok_or(ActionError::MissingOutput(name))
}

fn parse_rate(outputs: &HashMap<String, String>, name: &'static str) -> Result<u64, ActionError> {
    let value = required(outputs, name)?;
    value.parse().map_err(|_| ActionError::InvalidOutput {
        name,
        value: value.to_string(),
    })
}

/// Queries the WAN address of a connection service.
pub async fn get_external_ip(
    cp: &dyn ControlPoint,
    service: &ServiceRef,
) -> Result<IpAddr, ActionError> {
    let outputs = cp
        .execute_action(service, IgdAction::GetExternalIpAddress, &[])
        .await?;
    let value = required(&outputs, "NewExternalIPAddress")?;
    value.parse().map_err(|_| ActionError::InvalidOutput {
        name: "NewExternalIPAddress",
        value: value.to_string(),
    })
}

/// Queries the physical link rates of a WANCommonInterfaceConfig service.
pub async fn get_common_link_properties(
    cp: &dyn ControlPoint,
    service: &ServiceRef,
) -> Result<IgdRates, ActionError> {
    let outputs = cp
        .execute_action(service, IgdAction::GetCommonLinkProperties, &[])
        .await?;
    Ok(IgdRates {
        upstream: parse_rate(&outputs, "NewLayer1UpstreamMaxBitRate")?,
        downstream: parse_rate(&outputs, "NewLayer1DownstreamMaxBitRate")?,
    })
}

/// Queries the link-layer rates of a WANPPPConnection service.
pub async fn get_link_layer_max_bit_rates(
    cp: &dyn ControlPoint,
    service: &ServiceRef,
) -> Result<IgdRates, ActionError> {
    let outputs = cp
        .execute_action(service, IgdAction::GetLinkLayerMaxBitRates, &[])
        .await?;
    Ok(IgdRates {
        upstream: parse_rate(&outputs, "NewUpstreamMaxBitRate")?,
        downstream: parse_rate(&outputs, "NewDownstreamMaxBitRate")?,
    })
}

/// Looks up an existing mapping by external port and protocol.
///
/// Returns `Ok(None)` when the router reports no such entry (error 714).
pub async fn get_specific_port_mapping_entry(
    cp: &dyn ControlPoint,
    service: &ServiceRef,
    external_port: u16,
    protocol: PortProtocol,
) -> Result<Option<MappingEntry>, ActionError> {
    let args = [
        ("NewRemoteHost", String::new()),
        ("NewExternalPort", external_port.to_string()),
        ("NewProtocol", protocol.as_str().to_string()),
    ];
    match cp
        .execute_action(service, IgdAction::GetSpecificPortMappingEntry, &args)
        .await
    {
        Ok(outputs) => Ok(Some(MappingEntry {
            internal_port: outputs
                .get("NewInternalPort")
                .and_then(|v| v.trim().parse().ok()),
            internal_client: outputs.get("NewInternalClient").cloned(),
            description: outputs.get("NewPortMappingDescription").cloned(),
            enabled: outputs.get("NewEnabled").map(|v| v.trim() == "1"),
        })),
        Err(ActionError::Fault { code, .. }) if code == NO_SUCH_ENTRY_IN_ARRAY => Ok(None),
        Err(e) => Err(e),
    }
}

/// Installs a port mapping.
pub async fn add_port_mapping(
    cp: &dyn ControlPoint,
    service: &ServiceRef,
    mapping: &PortMapping,
) -> Result<(), ActionError> {
    let args = [
        ("NewRemoteHost", String::new()),
        ("NewExternalPort", mapping.external_port.to_string()),
        ("NewProtocol", mapping.protocol.as_str().to_string()),
        ("NewInternalPort", mapping.internal_port.to_string()),
        ("NewInternalClient", mapping.internal_client.to_string()),
        (
            "NewEnabled",
            if mapping.enabled { "1" } else { "0" }.to_string(),
        ),
        ("NewPortMappingDescription", mapping.description.clone()),
        ("NewLeaseDuration", mapping.lease_duration.to_string()),
    ];
    cp.execute_action(service, IgdAction::AddPortMapping, &args)
        .await
        .map(|_| ())
}

/// Removes a port mapping.
pub async fn delete_port_mapping(
    cp: &dyn ControlPoint,
    service: &ServiceRef,
    mapping: &PortMapping,
) -> Result<(), ActionError> {
    let args = [
        ("NewRemoteHost", String::new()),
        ("NewExternalPort", mapping.external_port.to_string()),
        ("NewProtocol", mapping.protocol.as_str().to_string()),
    ];
    cp.execute_action(service, IgdAction::DeletePortMapping, &args)
        .await
        .map(|_| ())
}
