//! GENA event XML parsing.
//!
//! Pure parsing functions for GENA NOTIFY payloads, separate from the
//! subscription lifecycle.

use std::collections::HashMap;
use std::net::IpAddr;

use super::utils::collect_child_values;
use crate::protocol_constants::EXTERNAL_IP_STATE_VARIABLE;

/// Parses an `<e:propertyset>` body into evented variable values.
///
/// # Errors
/// Returns a description of the problem if the body is not a well-formed
/// property set.
pub fn parse_property_set(body: &str) -> Result<HashMap<String, String>, String> {
    if !body.contains("propertyset") {
        return Err("missing propertyset element".to_string());
    }
    collect_child_values(body, "property")
}

/// Reads the `ExternalIPAddress` variable from parsed event values.
///
/// Returns `None` if the variable is absent or not an IP address.
#[must_use]
pub fn external_ip_from_values(values: &HashMap<String, String>) -> Option<IpAddr> {
    values
        .get(EXTERNAL_IP_STATE_VARIABLE)
        .and_then(|v| v.trim().parse().ok())
}
