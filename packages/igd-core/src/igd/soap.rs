//! Low-level SOAP protocol implementation for UPnP control actions.
//!
//! Builds the envelope, posts it to a service's control URL and parses the
//! response arguments or the `UPnPError` fault detail.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;

use super::actions::ActionError;
use super::utils::{collect_child_values, escape_xml, extract_xml_text};
use crate::protocol_constants::SOAP_TIMEOUT_SECS;

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur during SOAP operations with a gateway.
#[derive(Debug, Error)]
pub enum SoapError {
    /// HTTP request to the gateway failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Gateway returned a non-success HTTP status without a SOAP fault.
    #[error("HTTP error {0}: {1}")]
    HttpStatus(u16, String),

    /// Gateway returned a SOAP fault response.
    #[error("SOAP fault {code:?}: {description}")]
    Fault {
        /// UPnP error code from the fault detail, if present.
        code: Option<u16>,
        description: String,
    },

    /// Failed to parse SOAP response XML.
    #[error("Failed to parse SOAP response: {0}")]
    Parse(String),
}

/// Convenient Result alias for SOAP operations.
pub type SoapResult<T> = Result<T, SoapError>;

impl From<SoapError> for ActionError {
    fn from(err: SoapError) -> Self {
        match err {
            SoapError::Fault { code, description } => ActionError::Fault {
                // Faults without a UPnPError detail are reported as ActionFailed
                code: code.unwrap_or(501),
                description,
            },
            other => ActionError::Transport(other.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SOAP Request/Response
// ─────────────────────────────────────────────────────────────────────────────

/// Builds the SOAP envelope for an action.
///
/// Single line with no leading whitespace; some embedded stacks reject
/// anything before the XML declaration.
fn build_envelope(service_type: &str, action: &str, args: &[(&str, String)]) -> String {
    let mut body = format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/"><s:Body><u:{} xmlns:u="{}">"#,
        action, service_type
    );
    for (k, v) in args {
        body.push_str(&format!("<{k}>{}</{k}>", escape_xml(v)));
    }
    body.push_str(&format!("</u:{}></s:Body></s:Envelope>", action));
    body
}

/// Parses a fault response into code and description.
fn parse_fault(xml: &str) -> SoapError {
    let code = extract_xml_text(xml, "errorCode").and_then(|c| c.parse().ok());
    let description = extract_xml_text(xml, "errorDescription")
        .or_else(|| extract_xml_text(xml, "faultstring"))
        .unwrap_or_else(|| "Unknown SOAP fault".to_string());
    SoapError::Fault { code, description }
}

/// Parses a successful response into its output arguments.
fn parse_response(xml: &str, action: &str) -> SoapResult<HashMap<String, String>> {
    let response_element = format!("{action}Response");
    if !xml.contains(&response_element) {
        return Err(SoapError::Parse(format!("missing <{response_element}>")));
    }
    collect_child_values(xml, &response_element).map_err(SoapError::Parse)
}

/// Sends a SOAP action to a service control URL and returns its output arguments.
///
/// # Arguments
/// * `client` - The HTTP client to use for the request
/// * `control_url` - Absolute control URL of the service
/// * `service_type` - The service type URN used as the action namespace
/// * `action` - The SOAP action name (e.g., "GetExternalIPAddress")
/// * `args` - Input arguments (order is preserved)
pub async fn send_soap_request(
    client: &Client,
    control_url: &str,
    service_type: &str,
    action: &str,
    args: &[(&str, String)],
) -> SoapResult<HashMap<String, String>> {
    let body = build_envelope(service_type, action, args);

    log::debug!("[SOAP] {} -> {} ({} bytes)", action, control_url, body.len());
    log::trace!("[SOAP] Request body: {}", body);

    let start = std::time::Instant::now();
    let res = client
        .post(control_url)
        .header("Content-Type", "text/xml; charset=\"utf-8\"")
        .header("SOAPAction", format!("\"{}#{}\"", service_type, action))
        .body(body)
        .timeout(Duration::from_secs(SOAP_TIMEOUT_SECS))
        .send()
        .await;

    log::debug!(
        "[SOAP] {} completed in {:?}: {:?}",
        action,
        start.elapsed(),
        res.as_ref().map(|r| r.status())
    );

    let res = res?;
    let status = res.status();
    let response_text = res.text().await?;

    // Faults usually arrive with status 500
    if response_text.contains(":Fault>") || response_text.contains("<Fault>") {
        return Err(parse_fault(&response_text));
    }
    if !status.is_success() {
        return Err(SoapError::HttpStatus(status.as_u16(), response_text));
    }

    parse_response(&response_text, action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::igd::test_fixtures::{GET_EXTERNAL_IP_RESPONSE, NO_SUCH_ENTRY_FAULT};

    #[test]
    fn envelope_carries_namespaced_action_and_escaped_args() {
        let body = build_envelope(
            "urn:schemas-upnp-org:service:WANIPConnection:1",
            "AddPortMapping",
            &[
                ("NewExternalPort", "51413".into()),
                ("NewPortMappingDescription", "A & B".into()),
            ],
        );

        assert!(body.starts_with("<?xml"));
        assert!(body.contains(
            r#"<u:AddPortMapping xmlns:u="urn:schemas-upnp-org:service:WANIPConnection:1">"#
        ));
        assert!(body.contains("<NewExternalPort>51413</NewExternalPort>"));
        assert!(body.contains("<NewPortMappingDescription>A &amp; B</NewPortMappingDescription>"));
        assert!(body.ends_with("</u:AddPortMapping></s:Body></s:Envelope>"));
        // Argument order is preserved
        assert!(body.find("NewExternalPort") < body.find("NewPortMappingDescription"));
    }

    #[test]
    fn parses_response_arguments() {
        let outputs = parse_response(GET_EXTERNAL_IP_RESPONSE, "GetExternalIPAddress").unwrap();
        assert_eq!(
            outputs.get("NewExternalIPAddress").map(String::as_str),
            Some("203.0.113.5")
        );
    }

    #[test]
    fn response_for_other_action_is_a_parse_error() {
        let err = parse_response(GET_EXTERNAL_IP_RESPONSE, "AddPortMapping").unwrap_err();
        assert!(matches!(err, SoapError::Parse(_)));
    }

    #[test]
    fn fault_detail_maps_to_action_fault() {
        let err = parse_fault(NO_SUCH_ENTRY_FAULT);
        match &err {
            SoapError::Fault { code, description } => {
                assert_eq!(*code, Some(714));
                assert_eq!(description, "NoSuchEntryInArray");
            }
            other => panic!("unexpected {other:?}"),
        }

        let action_err = ActionError::from(err);
        assert_eq!(
            action_err,
            ActionError::Fault {
                code: 714,
                description: "NoSuchEntryInArray".into()
            }
        );
    }

    #[test]
    fn fault_without_detail_falls_back_to_faultstring() {
        let xml = "<s:Envelope><s:Body><s:Fault><faultstring>Server busy</faultstring></s:Fault></s:Body></s:Envelope>";
        let err = ActionError::from(parse_fault(xml));
        assert_eq!(
            err,
            ActionError::Fault {
                code: 501,
                description: "Server busy".into()
            }
        );
    }

    #[test]
    fn non_fault_errors_are_transport() {
        let err = ActionError::from(SoapError::HttpStatus(404, "Not Found".into()));
        assert!(matches!(err, ActionError::Transport(_)));
    }
}
