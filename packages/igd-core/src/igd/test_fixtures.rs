//! Shared test fixtures: device trees, XML payloads and a scripted control point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::actions::ActionError;
use super::discovery::DiscoveryResult;
use super::gena::{GenaError, GenaResult};
use super::services::{IgdAction, IgdServiceKind};
use super::traits::{ControlPoint, SubscriptionId};
use super::types::{
    DeviceId, GatewayDevice, PortProtocol, ServiceDescriptor, ServiceKey, ServiceRef,
};
use crate::protocol_constants::NO_SUCH_ENTRY_IN_ARRAY;

pub const IP_SERVICE_ID: &str = "urn:upnp-org:serviceId:WANIPConn1";
pub const PPP_SERVICE_ID: &str = "urn:upnp-org:serviceId:WANPPPConn1";
pub const COMMON_SERVICE_ID: &str = "urn:upnp-org:serviceId:WANCommonIFC1";

// ─────────────────────────────────────────────────────────────────────────────
// Device Trees
// ─────────────────────────────────────────────────────────────────────────────

fn descriptor(udn: &str, kind: IgdServiceKind, service_id: &str, path: &str) -> ServiceDescriptor {
    let base = format!("http://192.168.1.1:5000/{}", udn.trim_start_matches("uuid:"));
    ServiceDescriptor {
        service_type: kind.urn().to_string(),
        service_id: service_id.to_string(),
        control_url: format!("{base}/{path}/control"),
        event_sub_url: format!("{base}/{path}/event"),
    }
}

fn gateway(udn: &str, connection: IgdServiceKind, with_common: bool) -> GatewayDevice {
    let (service_id, path) = match connection {
        IgdServiceKind::WanPppConnection => (PPP_SERVICE_ID, "pppc"),
        _ => (IP_SERVICE_ID, "ipc"),
    };

    let connection_device = GatewayDevice {
        udn: DeviceId::new(format!("{udn}-wanconn")),
        device_type: "urn:schemas-upnp-org:device:WANConnectionDevice:1".into(),
        friendly_name: "WANConnectionDevice".into(),
        location: String::new(),
        local_address: None,
        remote_address: None,
        services: vec![descriptor(udn, connection, service_id, path)],
        children: Vec::new(),
    };

    let wan_device = GatewayDevice {
        udn: DeviceId::new(format!("{udn}-wan")),
        device_type: "urn:schemas-upnp-org:device:WANDevice:1".into(),
        friendly_name: "WANDevice".into(),
        location: String::new(),
        local_address: None,
        remote_address: None,
        services: if with_common {
            vec![descriptor(
                udn,
                IgdServiceKind::WanCommonInterfaceConfig,
                COMMON_SERVICE_ID,
                "wcic",
            )]
        } else {
            Vec::new()
        },
        children: vec![connection_device],
    };

    GatewayDevice {
        udn: DeviceId::new(udn),
        device_type: "urn:schemas-upnp-org:device:InternetGatewayDevice:1".into(),
        friendly_name: format!("Router {udn}"),
        location: "http://192.168.1.1:5000/rootDesc.xml".into(),
        local_address: Some("192.168.1.20".parse().unwrap()),
        remote_address: Some("192.168.1.1".parse().unwrap()),
        services: Vec::new(),
        children: vec![wan_device],
    }
}

/// A gateway with a WANIPConnection, optionally with WANCommonInterfaceConfig.
pub fn igd_device(udn: &str, with_common: bool) -> GatewayDevice {
    gateway(udn, IgdServiceKind::WanIpConnection, with_common)
}

/// A gateway with a WANPPPConnection, optionally with WANCommonInterfaceConfig.
pub fn ppp_device(udn: &str, with_common: bool) -> GatewayDevice {
    gateway(udn, IgdServiceKind::WanPppConnection, with_common)
}

/// Returns the connection service of a fixture gateway.
pub fn connection_service(device: &GatewayDevice) -> ServiceRef {
    device
        .wan_services()
        .into_iter()
        .find(|s| s.kind.is_connection())
        .expect("fixture has a connection service")
}

/// Returns the common interface service of a fixture gateway, if it has one.
pub fn common_service(device: &GatewayDevice) -> Option<ServiceRef> {
    device
        .wan_services()
        .into_iter()
        .find(|s| s.kind == IgdServiceKind::WanCommonInterfaceConfig)
}

// ─────────────────────────────────────────────────────────────────────────────
// XML Payloads
// ─────────────────────────────────────────────────────────────────────────────

/// Description document of a typical single-WAN router.
pub const ROOT_DESCRIPTION_XML: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <URLBase>http://192.168.1.1:5000/</URLBase>
  <device>
    <deviceType>urn:schemas-upnp-org:device:InternetGatewayDevice:1</deviceType>
    <friendlyName>Home Router &amp; Modem</friendlyName>
    <UDN>uuid:aaaa-0001</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:Layer3Forwarding:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:L3Forwarding1</serviceId>
        <controlURL>/ctl/L3F</controlURL>
        <eventSubURL>/evt/L3F</eventSubURL>
        <SCPDURL>/L3F.xml</SCPDURL>
      </service>
    </serviceList>
    <deviceList>
      <device>
        <deviceType>urn:schemas-upnp-org:device:WANDevice:1</deviceType>
        <friendlyName>WANDevice</friendlyName>
        <UDN>uuid:aaaa-0002</UDN>
        <serviceList>
          <service>
            <serviceType>urn:schemas-upnp-org:service:WANCommonInterfaceConfig:1</serviceType>
            <serviceId>urn:upnp-org:serviceId:WANCommonIFC1</serviceId>
            <controlURL>/ctl/CmnIfCfg</controlURL>
            <eventSubURL>/evt/CmnIfCfg</eventSubURL>
            <SCPDURL>/WANCfg.xml</SCPDURL>
          </service>
        </serviceList>
        <deviceList>
          <device>
            <deviceType>urn:schemas-upnp-org:device:WANConnectionDevice:1</deviceType>
            <friendlyName>WANConnectionDevice</friendlyName>
            <UDN>uuid:aaaa-0003</UDN>
            <serviceList>
              <service>
                <serviceType>urn:schemas-upnp-org:service:WANIPConnection:1</serviceType>
                <serviceId>urn:upnp-org:serviceId:WANIPConn1</serviceId>
                <controlURL>/ctl/IPConn</controlURL>
                <eventSubURL>/evt/IPConn</eventSubURL>
                <SCPDURL>/WANIPCn.xml</SCPDURL>
              </service>
            </serviceList>
          </device>
        </deviceList>
      </device>
    </deviceList>
  </device>
</root>"#;

/// NOTIFY body carrying a new external address.
pub const EXTERNAL_IP_NOTIFY: &str = r#"<?xml version="1.0"?>
<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
  <e:property>
    <ConnectionStatus>Connected</ConnectionStatus>
  </e:property>
  <e:property>
    <ExternalIPAddress>203.0.113.5</ExternalIPAddress>
  </e:property>
</e:propertyset>"#;

/// SOAP response of GetExternalIPAddress.
pub const GET_EXTERNAL_IP_RESPONSE: &str = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
  <s:Body>
    <u:GetExternalIPAddressResponse xmlns:u="urn:schemas-upnp-org:service:WANIPConnection:1">
      <NewExternalIPAddress>203.0.113.5</NewExternalIPAddress>
    </u:GetExternalIPAddressResponse>
  </s:Body>
</s:Envelope>"#;

/// SOAP fault returned for an unknown mapping entry.
pub const NO_SUCH_ENTRY_FAULT: &str = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
  <s:Body>
    <s:Fault>
      <faultcode>s:Client</faultcode>
      <faultstring>UPnPError</faultstring>
      <detail>
        <UPnPError xmlns="urn:schemas-upnp-org:control-1-0">
          <errorCode>714</errorCode>
          <errorDescription>NoSuchEntryInArray</errorDescription>
        </UPnPError>
      </detail>
    </s:Fault>
  </s:Body>
</s:Envelope>"#;

// ─────────────────────────────────────────────────────────────────────────────
// Mock Control Point
// ─────────────────────────────────────────────────────────────────────────────

/// Scripted behaviour of one WAN service.
#[derive(Debug, Default)]
pub struct MockRouter {
    /// Value returned for NewExternalIPAddress; `None` faults the action.
    pub external_ip: Option<String>,
    /// (upstream, downstream) returned by GetLinkLayerMaxBitRates.
    pub link_rates: Option<(u64, u64)>,
    /// (upstream, downstream) returned by GetCommonLinkProperties.
    pub common_rates: Option<(u64, u64)>,
    /// Installed mappings keyed by (external port, protocol), holding their output arguments.
    pub mappings: HashMap<(u16, PortProtocol), HashMap<String, String>>,
    /// Fault returned by AddPortMapping.
    pub add_fault: Option<(u16, String)>,
    /// AddPortMapping is applied at once but answered after this delay.
    pub add_delay: Option<Duration>,
    /// Fault returned by DeletePortMapping.
    pub delete_fault: Option<(u16, String)>,
    /// Every action fails with a transport error.
    pub unreachable: bool,
}

/// In-memory control point that simulates routers per service.
#[derive(Default)]
pub struct MockControlPoint {
    routers: Mutex<HashMap<ServiceKey, MockRouter>>,
    calls: Mutex<Vec<(ServiceKey, IgdAction)>>,
    subscriptions: Mutex<Vec<(SubscriptionId, ServiceKey)>>,
    unsubscribed: Mutex<Vec<SubscriptionId>>,
    removed: Mutex<Vec<SubscriptionId>>,
    fail_subscribe: AtomicBool,
    next_sid: AtomicU64,
}

fn fault(code: u16, description: &str) -> ActionError {
    ActionError::Fault {
        code,
        description: description.to_string(),
    }
}

fn rates(up_name: &str, down_name: &str, (up, down): (u64, u64)) -> HashMap<String, String> {
    HashMap::from([
        (up_name.to_string(), up.to_string()),
        (down_name.to_string(), down.to_string()),
    ])
}

impl MockControlPoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Edits the simulated router behind `service`.
    pub fn router(&self, service: &ServiceRef, f: impl FnOnce(&mut MockRouter)) {
        f(self.routers.lock().entry(service.key()).or_default());
    }

    /// Makes subsequent subscribe requests fail.
    pub fn fail_subscriptions(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Number of invocations of `action` across all services.
    pub fn call_count(&self, action: IgdAction) -> usize {
        self.calls.lock().iter().filter(|(_, a)| *a == action).count()
    }

    /// Number of invocations of `action` on one service.
    pub fn calls_on(&self, service: &ServiceRef, action: IgdAction) -> usize {
        let key = service.key();
        self.calls
            .lock()
            .iter()
            .filter(|(k, a)| *k == key && *a == action)
            .count()
    }

    /// Number of mappings installed on the router behind `service`.
    pub fn mapping_count(&self, service: &ServiceRef) -> usize {
        self.routers
            .lock()
            .get(&service.key())
            .map_or(0, |r| r.mappings.len())
    }

    /// All subscriptions created for `service`, oldest first.
    pub fn subscriptions_for(&self, service: &ServiceRef) -> Vec<SubscriptionId> {
        let key = service.key();
        self.subscriptions
            .lock()
            .iter()
            .filter(|(_, k)| *k == key)
            .map(|(sid, _)| sid.clone())
            .collect()
    }

    pub fn unsubscribed(&self) -> Vec<SubscriptionId> {
        self.unsubscribed.lock().clone()
    }

    pub fn removed(&self) -> Vec<SubscriptionId> {
        self.removed.lock().clone()
    }

    /// Applies `action` to the simulated router and records the call.
    fn apply(
        &self,
        service: &ServiceRef,
        action: IgdAction,
        args: &[(&str, String)],
    ) -> Result<HashMap<String, String>, ActionError> {
        let key = service.key();
        self.calls.lock().push((key.clone(), action));

        let args: HashMap<&str, &str> = args.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let entry_key = || -> Option<(u16, PortProtocol)> {
            let port = args.get("NewExternalPort")?.parse().ok()?;
            let protocol = args.get("NewProtocol")?.parse().ok()?;
            Some((port, protocol))
        };

        let mut routers = self.routers.lock();
        let router = routers.entry(key).or_default();
        if router.unreachable {
            return Err(ActionError::Transport("connection refused".into()));
        }

        match action {
            IgdAction::GetExternalIpAddress => match &router.external_ip {
                Some(ip) => Ok(HashMap::from([(
                    "NewExternalIPAddress".to_string(),
                    ip.clone(),
                )])),
                None => Err(fault(501, "ActionFailed")),
            },
            IgdAction::GetLinkLayerMaxBitRates => router
                .link_rates
                .map(|r| rates("NewUpstreamMaxBitRate", "NewDownstreamMaxBitRate", r))
                .ok_or_else(|| fault(401, "Invalid Action")),
            IgdAction::GetCommonLinkProperties => router
                .common_rates
                .map(|r| {
                    rates(
                        "NewLayer1UpstreamMaxBitRate",
                        "NewLayer1DownstreamMaxBitRate",
                        r,
                    )
                })
                .ok_or_else(|| fault(401, "Invalid Action")),
            IgdAction::GetSpecificPortMappingEntry => entry_key()
                .and_then(|k| router.mappings.get(&k).cloned())
                .ok_or_else(|| fault(NO_SUCH_ENTRY_IN_ARRAY, "NoSuchEntryInArray")),
            IgdAction::AddPortMapping => {
                if let Some((code, description)) = &router.add_fault {
                    return Err(fault(*code, description));
                }
                let k = entry_key().ok_or_else(|| fault(402, "Invalid Args"))?;
                let outputs = [
                    "NewInternalPort",
                    "NewInternalClient",
                    "NewEnabled",
                    "NewPortMappingDescription",
                    "NewLeaseDuration",
                ]
                .iter()
                .filter_map(|name| args.get(name).map(|v| (name.to_string(), v.to_string())))
                .collect();
                router.mappings.insert(k, outputs);
                Ok(HashMap::new())
            }
            IgdAction::DeletePortMapping => {
                if let Some((code, description)) = &router.delete_fault {
                    return Err(fault(*code, description));
                }
                let k = entry_key().ok_or_else(|| fault(402, "Invalid Args"))?;
                router
                    .mappings
                    .remove(&k)
                    .map(|_| HashMap::new())
                    .ok_or_else(|| fault(NO_SUCH_ENTRY_IN_ARRAY, "NoSuchEntryInArray"))
            }
        }
    }
}

#[async_trait]
impl ControlPoint for MockControlPoint {
    async fn search(&self) -> DiscoveryResult<()> {
        Ok(())
    }

    async fn execute_action(
        &self,
        service: &ServiceRef,
        action: IgdAction,
        args: &[(&str, String)],
    ) -> Result<HashMap<String, String>, ActionError> {
        let delay = match action {
            IgdAction::AddPortMapping => self
                .routers
                .lock()
                .get(&service.key())
                .and_then(|r| r.add_delay),
            _ => None,
        };
        let result = self.apply(service, action, args);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn subscribe(
        &self,
        service: &ServiceRef,
        _duration_secs: u64,
    ) -> GenaResult<SubscriptionId> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(GenaError::SubscriptionFailed(503));
        }
        let n = self.next_sid.fetch_add(1, Ordering::SeqCst) + 1;
        let sid = SubscriptionId::new(format!("uuid:sub-{n}"));
        self.subscriptions
            .lock()
            .push((sid.clone(), service.key()));
        Ok(sid)
    }

    async fn unsubscribe(&self, subscription: &SubscriptionId) {
        self.unsubscribed.lock().push(subscription.clone());
    }

    fn remove_subscription(&self, subscription: &SubscriptionId) {
        self.removed.lock().push(subscription.clone());
    }
}
