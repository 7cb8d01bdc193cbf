//! Device description loading.
//!
//! Parses the `<root>` description document into a [`GatewayDevice`] tree,
//! resolving control and event URLs against `URLBase` (or the document URL).

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::{Client, Url};

use super::{DiscoveryError, DiscoveryResult, SsdpResponse};
use crate::igd::types::{DeviceId, GatewayDevice, ServiceDescriptor};

/// Fetches and parses the description behind an SSDP response.
pub async fn fetch_description(
    client: &Client,
    response: &SsdpResponse,
) -> DiscoveryResult<GatewayDevice> {
    let fetch_error = |reason: String| DiscoveryError::DescriptionFetch {
        location: response.location.clone(),
        reason,
    };

    let res = client
        .get(&response.location)
        .send()
        .await
        .map_err(|e| fetch_error(e.to_string()))?;
    if !res.status().is_success() {
        return Err(fetch_error(format!("HTTP {}", res.status())));
    }
    let body = res.text().await.map_err(|e| fetch_error(e.to_string()))?;

    let mut device = parse_description(&body, &response.location)?;
    device.local_address = Some(response.local_address);
    device.remote_address = Some(response.remote_address);
    Ok(device)
}

#[derive(Default)]
struct DeviceBuilder {
    udn: String,
    device_type: String,
    friendly_name: String,
    services: Vec<ServiceDescriptor>,
    children: Vec<GatewayDevice>,
}

#[derive(Default)]
struct ServiceBuilder {
    service_type: String,
    service_id: String,
    control_url: String,
    event_sub_url: String,
}

fn resolve(base: &Url, reference: &str) -> DiscoveryResult<String> {
    base.join(reference.trim())
        .map(String::from)
        .map_err(|e| invalid(format!("bad URL {reference:?}: {e}")))
}

fn invalid(msg: impl std::fmt::Display) -> DiscoveryError {
    DiscoveryError::InvalidDescription(msg.to_string())
}

/// Parses a description document fetched from `location`.
///
/// # Errors
/// Returns [`DiscoveryError::InvalidDescription`] for malformed XML, a
/// missing root device, or unresolvable URLs.
pub fn parse_description(xml: &str, location: &str) -> DiscoveryResult<GatewayDevice> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    let mut url_base: Option<String> = None;
    let mut devices: Vec<DeviceBuilder> = Vec::new();
    let mut service: Option<ServiceBuilder> = None;
    let mut root: Option<DeviceBuilder> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"device" => devices.push(DeviceBuilder::default()),
                b"service" if !devices.is_empty() => service = Some(ServiceBuilder::default()),
                b"URLBase" => {
                    let text = reader.read_text(e.name()).map_err(invalid)?;
                    url_base = Some(html_escape::decode_html_entities(&text).trim().to_string());
                }
                name @ (b"deviceType" | b"UDN" | b"friendlyName" | b"serviceType"
                | b"serviceId" | b"controlURL" | b"eventSubURL") => {
                    let name = name.to_vec();
                    let text = reader.read_text(e.name()).map_err(invalid)?;
                    let text = html_escape::decode_html_entities(&text).trim().to_string();
                    match (name.as_slice(), service.as_mut(), devices.last_mut()) {
                        (b"serviceType", Some(s), _) => s.service_type = text,
                        (b"serviceId", Some(s), _) => s.service_id = text,
                        (b"controlURL", Some(s), _) => s.control_url = text,
                        (b"eventSubURL", Some(s), _) => s.event_sub_url = text,
                        (b"deviceType", None, Some(d)) => d.device_type = text,
                        (b"UDN", None, Some(d)) => d.udn = text,
                        (b"friendlyName", None, Some(d)) => d.friendly_name = text,
                        _ => {}
                    }
                }
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"service" => {
                    if let (Some(s), Some(d)) = (service.take(), devices.last_mut()) {
                        d.services.push(ServiceDescriptor {
                            service_type: s.service_type,
                            service_id: s.service_id,
                            control_url: s.control_url,
                            event_sub_url: s.event_sub_url,
                        });
                    }
                }
                b"device" => {
                    let finished = devices
                        .pop()
                        .ok_or_else(|| invalid("unbalanced device element"))?;
                    match devices.last_mut() {
                        Some(parent) => parent.children.push(finished.build(location)),
                        None => root = Some(finished),
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(invalid(e)),
            _ => {}
        }
        buf.clear();
    }

    let root = root.ok_or_else(|| invalid("no root device"))?;
    if root.udn.is_empty() {
        return Err(invalid("root device has no UDN"));
    }

    let base_str = url_base
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| location.to_string());
    let base = Url::parse(&base_str).map_err(|e| invalid(format!("bad base URL: {e}")))?;

    let mut device = root.build(location);
    resolve_urls(&mut device, &base)?;
    Ok(device)
}

impl DeviceBuilder {
    fn build(self, location: &str) -> GatewayDevice {
        GatewayDevice {
            udn: DeviceId::new(self.udn),
            device_type: self.device_type,
            friendly_name: self.friendly_name,
            location: location.to_string(),
            local_address: None,
            remote_address: None,
            services: self.services,
            children: self.children,
        }
    }
}

fn resolve_urls(device: &mut GatewayDevice, base: &Url) -> DiscoveryResult<()> {
    for service in &mut device.services {
        service.control_url = resolve(base, &service.control_url)?;
        service.event_sub_url = resolve(base, &service.event_sub_url)?;
    }
    for child in &mut device.children {
        resolve_urls(child, base)?;
    }
    Ok(())
}
