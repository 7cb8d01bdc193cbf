//! Reference UPnP control point.
//!
//! Implements [`ControlPoint`] over SSDP discovery, description fetching,
//! SOAP control and GENA eventing. Device and subscription notifications are
//! delivered on the channel returned by [`UpnpControlPoint::new`].

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::actions::ActionError;
use super::discovery::{fetch_description, search_gateways, DiscoveryResult, SsdpConfig};
use super::gena::{GenaError, GenaResult, GenaSubscriptionManager};
use super::services::IgdAction;
use super::soap::send_soap_request;
use super::traits::{ControlPoint, ControlPointEvent, SubscriptionId};
use super::types::{GatewayDevice, ServiceRef};
use crate::protocol_constants::{GENA_RENEWAL_BUFFER_SECS, GENA_RENEWAL_CHECK_SECS};
use crate::runtime::TaskSpawner;
use crate::state::Config;
use crate::utils::{gena_callback_url, resolve_local_address};

/// A gateway seen by discovery.
struct KnownDevice {
    device: Arc<GatewayDevice>,
    last_seen: Instant,
    max_age: Option<u64>,
}

/// Control point backed by the local network.
pub struct UpnpControlPoint {
    client: Client,
    gena: GenaSubscriptionManager,
    devices: DashMap<String, KnownDevice>,
    event_tx: mpsc::UnboundedSender<ControlPointEvent>,
    ssdp_config: SsdpConfig,
    search_interval: Duration,
    device_expiry: Duration,
    /// Port of the local NOTIFY endpoint; 0 until the server is bound.
    callback_port: AtomicU16,
    /// Serializes searches so a slow one cannot race the next tick.
    search_lock: Mutex<()>,
}

impl UpnpControlPoint {
    /// Creates a control point and the receiver for its notifications.
    pub fn new(client: Client, config: &Config) -> (Self, mpsc::UnboundedReceiver<ControlPointEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let gena = GenaSubscriptionManager::with_sender(client.clone(), event_tx.clone());

        let control_point = Self {
            client,
            gena,
            devices: DashMap::new(),
            event_tx,
            ssdp_config: config.ssdp_config(),
            search_interval: config.ssdp_search_interval(),
            device_expiry: config.device_expiry(),
            callback_port: AtomicU16::new(0),
            search_lock: Mutex::new(()),
        };
        (control_point, event_rx)
    }

    fn emit(&self, event: ControlPointEvent) {
        if self.event_tx.send(event).is_err() {
            log::debug!("[ControlPoint] Event receiver dropped");
        }
    }

    /// Sets the port of the local HTTP server receiving NOTIFY requests.
    pub fn set_callback_port(&self, port: u16) {
        self.callback_port.store(port, Ordering::SeqCst);
    }

    fn callback_url(&self, service: &ServiceRef) -> GenaResult<String> {
        let port = self.callback_port.load(Ordering::SeqCst);
        if port == 0 {
            return Err(GenaError::CallbackUnavailable);
        }
        let ip: IpAddr = resolve_local_address(service).map_err(|e| {
            log::warn!("[ControlPoint] No callback address for {}: {}", service, e);
            GenaError::CallbackUnavailable
        })?;
        Ok(gena_callback_url(ip, port))
    }

    /// Handles a NOTIFY delivered to the callback endpoint.
    pub fn handle_notify(&self, sid: &str, seq: Option<u32>, body: &str) -> GenaResult<()> {
        self.gena.handle_notify(sid, seq, body)
    }

    /// Returns the gateways currently known to discovery.
    pub fn devices(&self) -> Vec<Arc<GatewayDevice>> {
        let mut devices: Vec<_> = self
            .devices
            .iter()
            .map(|entry| Arc::clone(&entry.device))
            .collect();
        devices.sort_by(|a, b| a.udn.cmp(&b.udn));
        devices
    }

    /// Drops gateways that stopped answering searches.
    fn expire_stale_devices(&self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .devices
            .iter()
            .filter(|entry| {
                let max_age = entry.max_age.map(Duration::from_secs).unwrap_or_default();
                let ttl = self.device_expiry.max(max_age);
                now.saturating_duration_since(entry.last_seen) > ttl
            })
            .map(|entry| entry.key().clone())
            .collect();

        for udn in expired {
            if let Some((_, known)) = self.devices.remove(&udn) {
                log::info!(
                    "[ControlPoint] Gateway {} ({}) expired",
                    known.device.friendly_name,
                    udn
                );
                self.emit(ControlPointEvent::DeviceRemoved(known.device));
            }
        }
    }

    /// Starts the periodic search and GENA renewal loops.
    pub fn start_background_tasks<S: TaskSpawner>(
        self: &Arc<Self>,
        spawner: &S,
        cancel: CancellationToken,
    ) {
        let cp = Arc::clone(self);
        let token = cancel.clone();
        spawner.spawn(async move {
            let mut ticker = interval(cp.search_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = cp.search().await {
                            log::warn!("[ControlPoint] Search failed: {}", e);
                        }
                        cp.expire_stale_devices();
                    }
                }
            }
            log::debug!("[ControlPoint] Search loop stopped");
        });

        let cp = Arc::clone(self);
        spawner.spawn(async move {
            let mut ticker = interval(Duration::from_secs(GENA_RENEWAL_CHECK_SECS));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => cp.gena.renew_expiring(GENA_RENEWAL_BUFFER_SECS).await,
                }
            }
            log::debug!("[GENA] Renewal loop stopped");
        });
    }

    /// Ends all subscriptions (for graceful shutdown).
    pub async fn shutdown(&self) {
        self.gena.unsubscribe_all().await;
    }
}

#[async_trait]
impl ControlPoint for UpnpControlPoint {
    async fn search(&self) -> DiscoveryResult<()> {
        let _guard = self.search_lock.lock().await;
        let responses = search_gateways(&self.ssdp_config).await?;
        let now = Instant::now();

        for response in responses {
            let refreshed = match self.devices.get_mut(&response.udn) {
                Some(mut known) if known.device.location == response.location => {
                    known.last_seen = now;
                    known.max_age = response.max_age;
                    true
                }
                _ => false,
            };
            if refreshed {
                continue;
            }

            // Same UDN at a new location: the gateway restarted
            if let Some((_, stale)) = self.devices.remove(&response.udn) {
                log::info!("[ControlPoint] Gateway {} moved, reloading", response.udn);
                self.emit(ControlPointEvent::DeviceRemoved(stale.device));
            }

            match fetch_description(&self.client, &response).await {
                Ok(device) => {
                    log::info!(
                        "[ControlPoint] Found {} ({}) via {}",
                        device.friendly_name,
                        device.udn,
                        response.local_address
                    );
                    let device = Arc::new(device);
                    self.devices.insert(
                        response.udn.clone(),
                        KnownDevice {
                            device: Arc::clone(&device),
                            last_seen: now,
                            max_age: response.max_age,
                        },
                    );
                    self.emit(ControlPointEvent::DeviceAdded(device));
                }
                Err(e) => log::warn!("[ControlPoint] Skipping {}: {}", response.location, e),
            }
        }
        Ok(())
    }

    async fn execute_action(
        &self,
        service: &ServiceRef,
        action: IgdAction,
        args: &[(&str, String)],
    ) -> Result<HashMap<String, String>, ActionError> {
        send_soap_request(
            &self.client,
            &service.control_url,
            &service.service_type,
            action.name(),
            args,
        )
        .await
        .map_err(ActionError::from)
    }

    async fn subscribe(
        &self,
        service: &ServiceRef,
        duration_secs: u64,
    ) -> GenaResult<SubscriptionId> {
        let callback_url = self.callback_url(service)?;
        self.gena
            .subscribe(service, &callback_url, duration_secs)
            .await
    }

    async fn unsubscribe(&self, subscription: &SubscriptionId) {
        self.gena.unsubscribe(subscription).await;
    }

    fn remove_subscription(&self, subscription: &SubscriptionId) {
        self.gena.remove(subscription);
    }
}
