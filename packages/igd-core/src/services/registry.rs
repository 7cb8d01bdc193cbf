//! Device and service registry.
//!
//! Responsibilities:
//! - Tracking the connection and common-interface services of reachable gateways
//! - Caching external addresses reported by events or active queries
//! - The boot gate that lets early callers wait for discovery
//! - One event subscription per connection service, re-created after
//!   repeated renewal failures
//! - The table of mappings this agent installed, per connection service

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::subscription::{SubscriptionHandle, SubscriptionState};
use crate::igd::actions::{get_common_link_properties, get_external_ip, get_link_layer_max_bit_rates};
use crate::igd::gena_parser::external_ip_from_values;
use crate::igd::{
    CancelReason, ControlPoint, DetectedIp, DeviceId, GatewayDevice, IgdRates, IgdServiceKind,
    PortMapping, ServiceKey, ServiceRef, SubscriptionId,
};
use crate::protocol_constants::{WAN_CONNECTION_DEVICE_TYPE, WAN_DEVICE_TYPE};
use crate::state::{Config, IpCacheInvalidation};
use crate::utils::is_public_address;

/// Registry state guarded by a single lock.
#[derive(Default)]
struct RegistryState {
    connection_services: BTreeMap<ServiceKey, ServiceRef>,
    common_services: BTreeMap<ServiceKey, ServiceRef>,
    external_ips: HashMap<DeviceId, DetectedIp>,
    subscriptions: HashMap<ServiceKey, SubscriptionHandle>,
    active_mappings: HashMap<ServiceKey, HashSet<PortMapping>>,
}

/// Live view of the reachable gateways.
///
/// All state sits behind one `RwLock` that is never held across an `.await`:
/// operations snapshot what they need, release the lock, then talk to the
/// control point.
pub struct DeviceRegistry {
    cp: Arc<dyn ControlPoint>,
    config: Config,
    state: RwLock<RegistryState>,
    booted: AtomicBool,
    /// Serializes the first boot wait; later callers find the gate latched.
    boot_lock: tokio::sync::Mutex<()>,
}

impl DeviceRegistry {
    pub fn new(cp: Arc<dyn ControlPoint>, config: Config) -> Self {
        Self {
            cp,
            config,
            state: RwLock::new(RegistryState::default()),
            booted: AtomicBool::new(false),
            boot_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn control_point(&self) -> &Arc<dyn ControlPoint> {
        &self.cp
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Device Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Registers the WAN services of a newly reachable gateway and subscribes
    /// to its connection service.
    ///
    /// Devices that are not gateways, or lack the WANDevice /
    /// WANConnectionDevice children, are skipped.
    pub async fn on_device_added(&self, device: &GatewayDevice) {
        if !device.is_gateway() {
            log::debug!("[Registry] Ignoring non-gateway device {}", device.udn);
            return;
        }
        log::info!(
            "[Registry] Gateway available: {} ({})",
            device.friendly_name,
            device.udn
        );

        let Some(wan) = device.first_child(WAN_DEVICE_TYPE) else {
            log::info!("[Registry] {} has no {}", device.udn, WAN_DEVICE_TYPE);
            return;
        };

        let common = wan
            .find_service(IgdServiceKind::WanCommonInterfaceConfig)
            .map(|d| device.service_ref(wan, d, IgdServiceKind::WanCommonInterfaceConfig));

        let connection = wan.first_child(WAN_CONNECTION_DEVICE_TYPE).and_then(|conn| {
            [IgdServiceKind::WanIpConnection, IgdServiceKind::WanPppConnection]
                .into_iter()
                .find_map(|kind| conn.find_service(kind).map(|d| device.service_ref(conn, d, kind)))
        });

        let needs_subscription = {
            let mut state = self.state.write();
            if let Some(common) = common {
                state.common_services.insert(common.key(), common);
            }
            let Some(connection) = &connection else {
                log::info!("[Registry] {} has no connection service", device.udn);
                return;
            };
            state
                .connection_services
                .insert(connection.key(), connection.clone());
            !matches!(
                state.subscriptions.get(&connection.key()).map(|h| h.state()),
                Some(SubscriptionState::Subscribing | SubscriptionState::Established)
            )
        };

        if let (Some(connection), true) = (connection, needs_subscription) {
            log::info!("[Registry] Using {}", connection);
            self.subscribe(connection).await;
        }
    }

    /// Forgets every service of a departed gateway.
    ///
    /// Ends their subscriptions, drops the mappings recorded for them and
    /// purges the external-address cache.
    pub async fn on_device_removed(&self, device: &GatewayDevice) {
        log::info!(
            "[Registry] Gateway unavailable: {} ({})",
            device.friendly_name,
            device.udn
        );

        let keys: Vec<ServiceKey> = device.wan_services().iter().map(ServiceRef::key).collect();
        let ended: Vec<SubscriptionId> = {
            let mut state = self.state.write();
            let mut ended = Vec::new();
            for key in &keys {
                if let Some(handle) = state.subscriptions.remove(key) {
                    ended.extend(handle.sid().cloned());
                }
                state.connection_services.remove(key);
                state.common_services.remove(key);
                if let Some(mappings) = state.active_mappings.remove(key) {
                    log::info!(
                        "[Registry] Dropping {} mapping record(s) of {}",
                        mappings.len(),
                        key
                    );
                }
            }
            match self.config.ip_cache_invalidation {
                IpCacheInvalidation::All => state.external_ips.clear(),
                IpCacheInvalidation::Device => {
                    state.external_ips.remove(&device.udn);
                }
            }
            ended
        };

        for sid in ended {
            self.cp.unsubscribe(&sid).await;
            self.cp.remove_subscription(&sid);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Subscriptions
    // ─────────────────────────────────────────────────────────────────────────

    /// Creates a fresh subscription handle for `service` and subscribes.
    async fn subscribe(&self, service: ServiceRef) {
        let key = service.key();
        self.state
            .write()
            .subscriptions
            .insert(key.clone(), SubscriptionHandle::subscribing(service.clone()));

        let result = self
            .cp
            .subscribe(&service, self.config.subscription_duration_secs)
            .await;

        let orphaned = {
            let mut state = self.state.write();
            match (state.subscriptions.get_mut(&key), result) {
                (Some(handle), Ok(sid)) => {
                    log::info!("[Registry] Subscription established: {} for {}", sid, service);
                    handle.established(sid);
                    None
                }
                (Some(handle), Err(e)) => {
                    log::warn!("[Registry] Subscription to {} failed: {}", service, e);
                    handle.failed();
                    None
                }
                // The device left while we were subscribing
                (None, Ok(sid)) => Some(sid),
                (None, Err(_)) => None,
            }
        };

        if let Some(sid) = orphaned {
            self.cp.unsubscribe(&sid).await;
            self.cp.remove_subscription(&sid);
        }
    }

    /// Handles the end of a subscription.
    ///
    /// Renewal failures are counted; on reaching the configured threshold the
    /// subscription is dropped locally and replaced by a new one.
    pub async fn on_subscription_ended(&self, sid: &SubscriptionId, reason: CancelReason) {
        let resubscribe = {
            let mut state = self.state.write();
            let Some(handle) = state.subscriptions.values_mut().find(|h| h.is(sid)) else {
                log::debug!("[Registry] Subscription {} ended ({}), not tracked", sid, reason);
                return;
            };
            log::info!("[Registry] Subscription {} ended: {}", sid, reason);
            match reason {
                CancelReason::RenewalFailed => {
                    let threshold = self.config.renewal_failure_threshold;
                    handle
                        .record_renewal_failure(threshold)
                        .then(|| handle.service().clone())
                }
                _ => {
                    handle.ended();
                    None
                }
            }
        };

        if let Some(service) = resubscribe {
            log::warn!(
                "[Registry] Renewal of {} failed {} times, re-subscribing",
                service,
                self.config.renewal_failure_threshold
            );
            self.cp.remove_subscription(sid);
            self.subscribe(service).await;
        }
    }

    /// Handles a successful renewal.
    pub fn on_subscription_renewed(&self, sid: &SubscriptionId) {
        if let Some(handle) = self
            .state
            .write()
            .subscriptions
            .values_mut()
            .find(|h| h.is(sid))
        {
            handle.renewed();
        }
    }

    /// Handles an event message from a connection service.
    ///
    /// Any event latches the boot gate. A new public `ExternalIPAddress` is
    /// cached for the service's gateway.
    pub fn on_event(&self, service: &ServiceRef, values: &HashMap<String, String>) {
        if !self.booted.swap(true, Ordering::SeqCst) {
            log::debug!("[Registry] Boot gate latched by event from {}", service);
        }

        let Some(address) = external_ip_from_values(values) else {
            return;
        };
        self.record_external_ip(&service.root, address);
    }

    fn record_external_ip(&self, root: &DeviceId, address: IpAddr) -> bool {
        if !is_public_address(address) {
            log::debug!("[Registry] Ignoring non-public address {} from {}", address, root);
            return false;
        }
        let detected = DetectedIp::reported(address);
        let mut state = self.state.write();
        if state.external_ips.values().any(|d| *d == detected) {
            return false;
        }
        log::info!("[Registry] New external IP {} for {}", address, root);
        state.external_ips.insert(root.clone(), detected);
        true
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Boot Gate
    // ─────────────────────────────────────────────────────────────────────────

    pub fn is_booted(&self) -> bool {
        self.booted.load(Ordering::SeqCst)
    }

    /// Waits once for discovery to find gateways.
    ///
    /// The first caller polls while no connection service is known, then
    /// allows a settle period for further gateways once one appears. The gate
    /// then stays latched and later callers return immediately.
    pub async fn wait_for_booting(&self) {
        if self.is_booted() {
            return;
        }
        let _guard = self.boot_lock.lock().await;
        if self.is_booted() {
            return;
        }

        for _ in 0..self.config.boot_poll_attempts {
            if self.has_connection_services() {
                tokio::time::sleep(self.config.boot_settle()).await;
                break;
            }
            tokio::time::sleep(self.config.boot_poll_interval()).await;
        }

        self.booted.store(true, Ordering::SeqCst);
        log::info!(
            "[Registry] Booted with {} connection service(s)",
            self.state.read().connection_services.len()
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // External Addresses and Rates
    // ─────────────────────────────────────────────────────────────────────────

    /// Returns the external addresses of all gateways.
    ///
    /// Waits for booting, serves the cache when it has entries and otherwise
    /// queries every connection service once.
    pub async fn external_ips(&self) -> Vec<DetectedIp> {
        self.wait_for_booting().await;

        if !self.has_connection_services() {
            log::warn!("[Registry] No gateway detected, external address unknown");
            return Vec::new();
        }

        let cached = self.cached_ips();
        if !cached.is_empty() {
            return cached;
        }

        self.query_external_ips().await;
        self.cached_ips()
    }

    /// Actively asks every connection service for its external address.
    async fn query_external_ips(&self) {
        log::info!("[Registry] Querying external IP");
        for service in self.connection_services() {
            match get_external_ip(self.cp.as_ref(), &service).await {
                Ok(address) => {
                    self.record_external_ip(&service.root, address);
                }
                Err(e) => log::warn!("[Registry] Unable to get external IP from {}: {}", service, e),
            }
        }
    }

    /// Returns the cached external addresses without waiting or querying.
    pub fn cached_ips(&self) -> Vec<DetectedIp> {
        let mut ips: Vec<DetectedIp> = self.state.read().external_ips.values().copied().collect();
        ips.sort_by_key(|d| d.address);
        ips
    }

    /// Sums the maximum bit rates of the WAN links.
    ///
    /// Only gateways with a cached external address count; one without is
    /// behind another NAT. PPP link-layer rates are preferred, common
    /// interface rates are the fallback.
    pub async fn rates(&self) -> Option<IgdRates> {
        let (ppp, common) = {
            let state = self.state.read();
            let reachable = |s: &&ServiceRef| state.external_ips.contains_key(&s.root);
            let ppp: Vec<ServiceRef> = state
                .connection_services
                .values()
                .filter(|s| s.kind == IgdServiceKind::WanPppConnection)
                .filter(reachable)
                .cloned()
                .collect();
            let common: Vec<ServiceRef> = state
                .common_services
                .values()
                .filter(reachable)
                .cloned()
                .collect();
            (ppp, common)
        };

        let mut total: Option<IgdRates> = None;
        for service in &ppp {
            match get_link_layer_max_bit_rates(self.cp.as_ref(), service).await {
                Ok(rates) => *total.get_or_insert_with(IgdRates::default) += rates,
                Err(e) => log::warn!("[Registry] Unable to get link rates from {}: {}", service, e),
            }
        }
        if total.is_some() {
            return total;
        }

        for service in &common {
            match get_common_link_properties(self.cp.as_ref(), service).await {
                Ok(rates) => *total.get_or_insert_with(IgdRates::default) += rates,
                Err(e) => log::warn!(
                    "[Registry] Unable to get common link properties from {}: {}",
                    service,
                    e
                ),
            }
        }
        total
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Services and Active Mappings
    // ─────────────────────────────────────────────────────────────────────────

    pub fn has_connection_services(&self) -> bool {
        !self.state.read().connection_services.is_empty()
    }

    pub fn connection_services(&self) -> Vec<ServiceRef> {
        self.state
            .read()
            .connection_services
            .values()
            .cloned()
            .collect()
    }

    pub fn common_services(&self) -> Vec<ServiceRef> {
        self.state.read().common_services.values().cloned().collect()
    }

    /// Returns the subscription state of a connection service.
    pub fn subscription(&self, key: &ServiceKey) -> Option<SubscriptionHandle> {
        self.state.read().subscriptions.get(key).cloned()
    }

    /// Records a mapping installed on a connection service.
    ///
    /// Ignored if the service left the registry in the meantime.
    pub fn record_active_mapping(&self, service: &ServiceRef, mapping: PortMapping) {
        let key = service.key();
        let mut state = self.state.write();
        if state.connection_services.contains_key(&key) {
            state.active_mappings.entry(key).or_default().insert(mapping);
        }
    }

    pub fn forget_active_mapping(&self, service: &ServiceRef, mapping: &PortMapping) {
        let key = service.key();
        let mut state = self.state.write();
        if let Some(set) = state.active_mappings.get_mut(&key) {
            set.remove(mapping);
            if set.is_empty() {
                state.active_mappings.remove(&key);
            }
        }
    }

    pub fn is_mapping_active(&self, service: &ServiceRef, mapping: &PortMapping) -> bool {
        self.state
            .read()
            .active_mappings
            .get(&service.key())
            .is_some_and(|set| set.contains(mapping))
    }

    /// Snapshot of all recorded mappings with their services.
    pub fn active_mappings(&self) -> Vec<(ServiceRef, PortMapping)> {
        let state = self.state.read();
        let mut out: Vec<(ServiceRef, PortMapping)> = state
            .active_mappings
            .iter()
            .filter_map(|(key, set)| Some((state.connection_services.get(key)?, set)))
            .flat_map(|(service, set)| set.iter().map(move |m| (service.clone(), m.clone())))
            .collect();
        out.sort_by(|a, b| {
            (a.0.key(), a.1.external_port, a.1.protocol.as_str())
                .cmp(&(b.0.key(), b.1.external_port, b.1.protocol.as_str()))
        });
        out
    }

    /// Ends every subscription (for graceful shutdown).
    pub async fn end_subscriptions(&self) {
        let sids: Vec<SubscriptionId> = self
            .state
            .write()
            .subscriptions
            .drain()
            .filter_map(|(_, h)| h.sid().cloned())
            .collect();
        for sid in sids {
            self.cp.unsubscribe(&sid).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::igd::services::IgdAction;
    use crate::igd::test_fixtures::{
        common_service, connection_service, igd_device, ppp_device, MockControlPoint,
        PPP_SERVICE_ID,
    };
    use crate::igd::types::{ForwardPort, PortProtocol, ServiceDescriptor};
    use tokio::time::Instant;

    fn registry_with(cp: &Arc<MockControlPoint>, config: Config) -> DeviceRegistry {
        DeviceRegistry::new(Arc::clone(cp) as Arc<dyn ControlPoint>, config)
    }

    fn registry(cp: &Arc<MockControlPoint>) -> DeviceRegistry {
        registry_with(cp, Config::default())
    }

    fn ip_event(address: &str) -> HashMap<String, String> {
        HashMap::from([("ExternalIPAddress".to_string(), address.to_string())])
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn gateway_registers_services_and_subscribes_once() {
        let cp = Arc::new(MockControlPoint::new());
        let reg = registry(&cp);
        let device = igd_device("uuid:gw-1", true);
        let conn = connection_service(&device);

        reg.on_device_added(&device).await;
        reg.on_device_added(&device).await;

        assert_eq!(reg.connection_services(), vec![conn.clone()]);
        assert_eq!(reg.common_services(), vec![common_service(&device).unwrap()]);
        assert_eq!(cp.subscriptions_for(&conn).len(), 1);
        let handle = reg.subscription(&conn.key()).unwrap();
        assert_eq!(handle.state(), SubscriptionState::Established);
    }

    #[tokio::test]
    async fn ip_connection_is_preferred_over_ppp() {
        let cp = Arc::new(MockControlPoint::new());
        let reg = registry(&cp);
        let mut device = igd_device("uuid:gw-1", false);
        let ppp = ppp_device("uuid:gw-1", false);
        let ppp_descriptor: ServiceDescriptor = ppp.children[0].children[0].services[0].clone();
        assert_eq!(ppp_descriptor.service_id, PPP_SERVICE_ID);
        device.children[0].children[0]
            .services
            .insert(0, ppp_descriptor);

        reg.on_device_added(&device).await;

        let services = reg.connection_services();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].kind, IgdServiceKind::WanIpConnection);
    }

    #[tokio::test]
    async fn non_gateways_and_incomplete_gateways_are_skipped() {
        let cp = Arc::new(MockControlPoint::new());
        let reg = registry(&cp);

        let mut renderer = igd_device("uuid:tv", true);
        renderer.device_type = "urn:schemas-upnp-org:device:MediaRenderer:1".into();
        reg.on_device_added(&renderer).await;

        let mut bare = igd_device("uuid:bare", true);
        bare.children.clear();
        reg.on_device_added(&bare).await;

        assert!(reg.connection_services().is_empty());
        assert!(reg.common_services().is_empty());
        assert_eq!(cp.subscriptions_for(&connection_service(&renderer)).len(), 0);
    }

    #[tokio::test]
    async fn gateway_without_common_service_still_registers_connection() {
        let cp = Arc::new(MockControlPoint::new());
        let reg = registry(&cp);

        reg.on_device_added(&ppp_device("uuid:gw-1", false)).await;

        assert_eq!(reg.connection_services().len(), 1);
        assert!(reg.common_services().is_empty());
    }

    #[tokio::test]
    async fn removal_ends_subscription_and_purges_state() {
        let cp = Arc::new(MockControlPoint::new());
        let reg = registry(&cp);
        let device = igd_device("uuid:gw-1", true);
        let conn = connection_service(&device);

        reg.on_device_added(&device).await;
        reg.on_event(&conn, &ip_event("203.0.113.5"));
        let mapping = PortMapping::for_port(
            &ForwardPort::new("opennet", PortProtocol::Udp, 51413),
            ip("192.168.1.20"),
            "test ",
        );
        reg.record_active_mapping(&conn, mapping);

        reg.on_device_removed(&device).await;

        let sid = cp.subscriptions_for(&conn)[0].clone();
        assert_eq!(cp.unsubscribed(), vec![sid.clone()]);
        assert_eq!(cp.removed(), vec![sid]);
        assert!(reg.connection_services().is_empty());
        assert!(reg.common_services().is_empty());
        assert!(reg.active_mappings().is_empty());
        assert!(reg.cached_ips().is_empty());
        assert!(reg.subscription(&conn.key()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn removed_gateway_leaves_no_address_to_report() {
        let cp = Arc::new(MockControlPoint::new());
        let reg = registry(&cp);
        let device = igd_device("uuid:gw-1", true);
        let conn = connection_service(&device);
        cp.router(&conn, |r| r.external_ip = Some("203.0.113.5".into()));

        reg.on_device_added(&device).await;
        reg.on_event(&conn, &ip_event("203.0.113.5"));
        assert_eq!(reg.external_ips().await.len(), 1);

        reg.on_device_removed(&device).await;

        assert!(reg.external_ips().await.is_empty());
        assert_eq!(cp.call_count(IgdAction::GetExternalIpAddress), 0);
    }

    #[tokio::test]
    async fn service_sets_follow_add_remove_sequences() {
        let cp = Arc::new(MockControlPoint::new());
        let reg = registry(&cp);
        let gw1 = igd_device("uuid:gw-1", true);
        let gw2 = ppp_device("uuid:gw-2", true);
        let gw3 = igd_device("uuid:gw-3", false);

        reg.on_device_added(&gw1).await;
        reg.on_device_added(&gw2).await;
        reg.on_device_removed(&gw1).await;
        reg.on_device_added(&gw3).await;
        reg.on_device_removed(&gw3).await;
        reg.on_device_added(&gw1).await;

        let mut conns: Vec<_> = reg.connection_services().into_iter().map(|s| s.root).collect();
        conns.sort();
        assert_eq!(conns, vec![gw1.udn.clone(), gw2.udn.clone()]);

        let commons: Vec<_> = reg.common_services().into_iter().map(|s| s.root).collect();
        assert_eq!(commons.len(), 2);
        assert!(!commons.contains(&gw3.udn));
    }

    #[tokio::test]
    async fn device_policy_purges_only_the_removed_gateway() {
        let cp = Arc::new(MockControlPoint::new());
        let config = Config {
            ip_cache_invalidation: IpCacheInvalidation::Device,
            ..Config::default()
        };
        let reg = registry_with(&cp, config);
        let gw1 = igd_device("uuid:gw-1", false);
        let gw2 = igd_device("uuid:gw-2", false);

        reg.on_device_added(&gw1).await;
        reg.on_device_added(&gw2).await;
        reg.on_event(&connection_service(&gw1), &ip_event("203.0.113.5"));
        reg.on_event(&connection_service(&gw2), &ip_event("198.51.100.7"));

        reg.on_device_removed(&gw1).await;

        assert_eq!(
            reg.cached_ips(),
            vec![DetectedIp::reported(ip("198.51.100.7"))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn event_address_is_served_without_querying() {
        let cp = Arc::new(MockControlPoint::new());
        let reg = registry(&cp);
        let device = igd_device("uuid:gw-1", false);
        let conn = connection_service(&device);

        reg.on_device_added(&device).await;
        reg.on_event(&conn, &ip_event("203.0.113.5"));
        assert!(reg.is_booted());

        let start = Instant::now();
        let ips = reg.external_ips().await;

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(ips, vec![DetectedIp::reported(ip("203.0.113.5"))]);
        assert!(!ips[0].supported);
        assert_eq!(cp.call_count(IgdAction::GetExternalIpAddress), 0);
    }

    #[tokio::test]
    async fn private_and_duplicate_addresses_are_not_cached() {
        let cp = Arc::new(MockControlPoint::new());
        let reg = registry(&cp);
        let gw1 = connection_service(&igd_device("uuid:gw-1", false));
        let gw2 = connection_service(&igd_device("uuid:gw-2", false));

        reg.on_event(&gw1, &ip_event("192.168.0.1"));
        reg.on_event(&gw1, &ip_event("garbage"));
        reg.on_event(&gw1, &HashMap::new());
        assert!(reg.cached_ips().is_empty());
        // Events latch the gate even without a usable address
        assert!(reg.is_booted());

        reg.on_event(&gw1, &ip_event("203.0.113.5"));
        reg.on_event(&gw2, &ip_event("203.0.113.5"));
        assert_eq!(reg.cached_ips().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_cache_falls_back_to_active_query() {
        let cp = Arc::new(MockControlPoint::new());
        let reg = registry(&cp);
        let gw1 = igd_device("uuid:gw-1", false);
        let gw2 = igd_device("uuid:gw-2", false);
        cp.router(&connection_service(&gw1), |r| {
            r.external_ip = Some("198.51.100.7".into())
        });
        cp.router(&connection_service(&gw2), |r| r.unreachable = true);

        reg.on_device_added(&gw1).await;
        reg.on_device_added(&gw2).await;

        let ips = reg.external_ips().await;
        assert_eq!(ips, vec![DetectedIp::reported(ip("198.51.100.7"))]);
        assert_eq!(cp.call_count(IgdAction::GetExternalIpAddress), 2);

        // Served from the cache afterwards
        reg.external_ips().await;
        assert_eq!(cp.call_count(IgdAction::GetExternalIpAddress), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn no_gateways_yields_no_addresses_after_bounded_wait() {
        let cp = Arc::new(MockControlPoint::new());
        let reg = registry(&cp);

        let start = Instant::now();
        assert!(reg.external_ips().await.is_empty());
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert!(reg.is_booted());
    }

    #[tokio::test(start_paused = true)]
    async fn boot_wait_settles_once_a_gateway_is_known() {
        let cp = Arc::new(MockControlPoint::new());
        let reg = registry(&cp);
        reg.on_device_added(&igd_device("uuid:gw-1", false)).await;

        let start = Instant::now();
        reg.wait_for_booting().await;
        assert_eq!(start.elapsed(), Duration::from_secs(5));

        // Latched: no further waiting
        let start = Instant::now();
        reg.wait_for_booting().await;
        reg.on_device_removed(&igd_device("uuid:gw-1", false)).await;
        reg.wait_for_booting().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(reg.is_booted());
    }

    #[tokio::test(start_paused = true)]
    async fn boot_wait_picks_up_late_gateway() {
        let cp = Arc::new(MockControlPoint::new());
        let reg = Arc::new(registry(&cp));

        let late = Arc::clone(&reg);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            late.on_device_added(&igd_device("uuid:gw-1", false)).await;
        });

        let start = Instant::now();
        reg.wait_for_booting().await;
        // Seen on the poll at 3 s, then 5 s of settling
        assert_eq!(start.elapsed(), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn rates_sum_ppp_links_of_gateways_with_addresses() {
        let cp = Arc::new(MockControlPoint::new());
        let reg = registry(&cp);
        let gw1 = ppp_device("uuid:gw-1", true);
        let gw2 = ppp_device("uuid:gw-2", true);
        let natted = ppp_device("uuid:gw-3", true);
        for (device, rates) in [(&gw1, (1000, 8000)), (&gw2, (500, 2000)), (&natted, (7, 7))] {
            cp.router(&connection_service(device), |r| r.link_rates = Some(rates));
            reg.on_device_added(device).await;
        }
        reg.on_event(&connection_service(&gw1), &ip_event("203.0.113.5"));
        reg.on_event(&connection_service(&gw2), &ip_event("198.51.100.7"));

        assert_eq!(
            reg.rates().await,
            Some(IgdRates {
                upstream: 1500,
                downstream: 10000
            })
        );
        assert_eq!(cp.calls_on(&connection_service(&natted), IgdAction::GetLinkLayerMaxBitRates), 0);
        assert_eq!(cp.call_count(IgdAction::GetCommonLinkProperties), 0);
    }

    #[tokio::test]
    async fn rates_fall_back_to_common_interface() {
        let cp = Arc::new(MockControlPoint::new());
        let reg = registry(&cp);
        let ip_gw = igd_device("uuid:gw-1", true);
        let ppp_gw = ppp_device("uuid:gw-2", true);
        cp.router(&common_service(&ip_gw).unwrap(), |r| {
            r.common_rates = Some((20_000, 100_000))
        });
        // PPP link query faults, so the common path is used for both gateways
        cp.router(&common_service(&ppp_gw).unwrap(), |r| {
            r.common_rates = Some((1_000, 5_000))
        });
        reg.on_device_added(&ip_gw).await;
        reg.on_device_added(&ppp_gw).await;
        reg.on_event(&connection_service(&ip_gw), &ip_event("203.0.113.5"));
        reg.on_event(&connection_service(&ppp_gw), &ip_event("198.51.100.7"));

        assert_eq!(
            reg.rates().await,
            Some(IgdRates {
                upstream: 21_000,
                downstream: 105_000
            })
        );
        assert_eq!(cp.call_count(IgdAction::GetLinkLayerMaxBitRates), 1);
    }

    #[tokio::test]
    async fn rates_are_unknown_without_addresses_or_data() {
        let cp = Arc::new(MockControlPoint::new());
        let reg = registry(&cp);
        let gw = igd_device("uuid:gw-1", true);
        cp.router(&common_service(&gw).unwrap(), |r| r.common_rates = Some((1, 1)));
        reg.on_device_added(&gw).await;

        // Double-NAT guard: no cached address, nothing queried
        assert_eq!(reg.rates().await, None);
        assert_eq!(cp.call_count(IgdAction::GetCommonLinkProperties), 0);

        cp.router(&common_service(&gw).unwrap(), |r| r.common_rates = None);
        reg.on_event(&connection_service(&gw), &ip_event("203.0.113.5"));
        assert_eq!(reg.rates().await, None);
    }

    #[tokio::test]
    async fn fifth_renewal_failure_resubscribes() {
        let cp = Arc::new(MockControlPoint::new());
        let reg = registry(&cp);
        let device = igd_device("uuid:gw-1", false);
        let conn = connection_service(&device);
        reg.on_device_added(&device).await;
        let first = cp.subscriptions_for(&conn)[0].clone();

        for _ in 0..4 {
            reg.on_subscription_ended(&first, CancelReason::RenewalFailed)
                .await;
        }
        assert_eq!(cp.subscriptions_for(&conn).len(), 1);
        assert!(cp.removed().is_empty());
        assert_eq!(reg.subscription(&conn.key()).unwrap().renewal_failures(), 4);

        reg.on_subscription_ended(&first, CancelReason::RenewalFailed)
            .await;

        let subs = cp.subscriptions_for(&conn);
        assert_eq!(subs.len(), 2);
        assert_eq!(cp.removed(), vec![first.clone()]);
        let handle = reg.subscription(&conn.key()).unwrap();
        assert!(handle.is(&subs[1]));
        assert_eq!(handle.renewal_failures(), 0);

        // Late failures of the replaced subscription are not tracked
        reg.on_subscription_ended(&first, CancelReason::RenewalFailed)
            .await;
        assert_eq!(cp.subscriptions_for(&conn).len(), 2);
    }

    #[tokio::test]
    async fn renewal_success_makes_failures_non_consecutive() {
        let cp = Arc::new(MockControlPoint::new());
        let reg = registry(&cp);
        let device = igd_device("uuid:gw-1", false);
        let conn = connection_service(&device);
        reg.on_device_added(&device).await;
        let sid = cp.subscriptions_for(&conn)[0].clone();

        for _ in 0..3 {
            reg.on_subscription_ended(&sid, CancelReason::RenewalFailed)
                .await;
        }
        reg.on_subscription_renewed(&sid);
        for _ in 0..3 {
            reg.on_subscription_ended(&sid, CancelReason::RenewalFailed)
                .await;
        }

        assert_eq!(cp.subscriptions_for(&conn).len(), 1);
        assert_eq!(reg.subscription(&conn.key()).unwrap().renewal_failures(), 3);
    }

    #[tokio::test]
    async fn failed_subscription_is_retried_when_gateway_reappears() {
        let cp = Arc::new(MockControlPoint::new());
        let reg = registry(&cp);
        let device = igd_device("uuid:gw-1", false);
        let conn = connection_service(&device);

        cp.fail_subscriptions(true);
        reg.on_device_added(&device).await;
        assert_eq!(
            reg.subscription(&conn.key()).unwrap().state(),
            SubscriptionState::Failed
        );
        assert_eq!(reg.connection_services().len(), 1);

        cp.fail_subscriptions(false);
        reg.on_device_added(&device).await;
        assert_eq!(
            reg.subscription(&conn.key()).unwrap().state(),
            SubscriptionState::Established
        );
    }

    #[tokio::test]
    async fn mappings_are_recorded_only_for_registered_services() {
        let cp = Arc::new(MockControlPoint::new());
        let reg = registry(&cp);
        let device = igd_device("uuid:gw-1", false);
        let conn = connection_service(&device);
        let stranger = connection_service(&igd_device("uuid:gw-9", false));
        let mapping = PortMapping::for_port(
            &ForwardPort::new("fproxy", PortProtocol::Tcp, 8888),
            ip("192.168.1.20"),
            "",
        );

        reg.record_active_mapping(&stranger, mapping.clone());
        assert!(reg.active_mappings().is_empty());

        reg.on_device_added(&device).await;
        reg.record_active_mapping(&conn, mapping.clone());
        assert!(reg.is_mapping_active(&conn, &mapping));
        assert_eq!(reg.active_mappings(), vec![(conn.clone(), mapping.clone())]);

        reg.forget_active_mapping(&conn, &mapping);
        assert!(!reg.is_mapping_active(&conn, &mapping));
    }
}
