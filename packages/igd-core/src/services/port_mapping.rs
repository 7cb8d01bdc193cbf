//! Port-mapping reconciliation.
//!
//! Responsibilities:
//! - Holding the desired port set and the listener that receives outcomes
//! - Periodic passes that install missing mappings on every gateway
//! - Removing the mappings this agent installed when the desired set changes

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::registry::DeviceRegistry;
use crate::igd::actions::{add_port_mapping, delete_port_mapping, get_specific_port_mapping_entry};
use crate::igd::{ForwardPort, ForwardPortStatus, PortMapping, PortStatusListener, ServiceRef};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::state::Config;
use crate::utils::resolve_local_address;

/// The desired port set currently adopted.
struct TickerState {
    ports: HashSet<ForwardPort>,
    listener: Arc<dyn PortStatusListener>,
    cancel: CancellationToken,
}

impl TickerState {
    fn matches(&self, ports: &HashSet<ForwardPort>, listener: &Arc<dyn PortStatusListener>) -> bool {
        self.ports == *ports && Arc::ptr_eq(&self.listener, listener)
    }
}

/// Keeps the desired ports mapped on every reachable gateway.
pub struct PortMappingTicker {
    registry: Arc<DeviceRegistry>,
    description_prefix: String,
    interval: std::time::Duration,
    state: Mutex<Option<TickerState>>,
    /// Serializes passes and removals.
    pass_lock: Mutex<()>,
    spawner: TokioSpawner,
}

impl PortMappingTicker {
    pub fn new(registry: Arc<DeviceRegistry>, config: &Config, spawner: TokioSpawner) -> Self {
        Self {
            registry,
            description_prefix: config.mapping_description_prefix.clone(),
            interval: config.reconcile_interval(),
            state: Mutex::new(None),
            pass_lock: Mutex::new(()),
            spawner,
        }
    }

    /// Adopts a desired port set and starts reconciling it.
    ///
    /// Waits for booting first. Restarting with the same ports and the same
    /// listener is a no-op; a different pair first removes every mapping
    /// installed for the previous one. One pass runs before returning, the
    /// next after the reconcile interval.
    pub async fn start(
        self: &Arc<Self>,
        ports: HashSet<ForwardPort>,
        listener: Arc<dyn PortStatusListener>,
    ) {
        self.registry.wait_for_booting().await;

        let mut state = self.state.lock().await;
        if let Some(previous) = state.take() {
            if previous.matches(&ports, &listener) && !previous.cancel.is_cancelled() {
                log::debug!("[PortMapping] Desired ports unchanged, already running");
                *state = Some(previous);
                return;
            }
            previous.cancel.cancel();
            if !previous.matches(&ports, &listener) {
                log::info!(
                    "[PortMapping] Desired ports changed ({} -> {}), removing old mappings",
                    previous.ports.len(),
                    ports.len()
                );
                self.remove_all_port_mappings().await;
            }
        }

        let cancel = CancellationToken::new();
        *state = Some(TickerState {
            ports: ports.clone(),
            listener: Arc::clone(&listener),
            cancel: cancel.clone(),
        });
        drop(state);

        log::info!("[PortMapping] Reconciling {} port(s)", ports.len());
        self.run_pass(&ports, listener.as_ref()).await;
        self.spawn_ticker(ports, listener, cancel);
    }

    fn spawn_ticker(
        self: &Arc<Self>,
        ports: HashSet<ForwardPort>,
        listener: Arc<dyn PortStatusListener>,
        cancel: CancellationToken,
    ) {
        let ticker = Arc::clone(self);
        let period = self.interval;
        self.spawner.spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                // Only the wait is cancellable; a started pass runs to completion
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                ticker.run_scheduled_pass(&ports, listener.as_ref(), &cancel).await;
            }
            log::debug!("[PortMapping] Ticker exited");
        });
    }

    /// Cancels future passes. Installed mappings stay in place.
    ///
    /// Returns once a pass already in flight has finished.
    pub async fn stop(&self) {
        if let Some(state) = self.state.lock().await.as_ref() {
            state.cancel.cancel();
            log::info!("[PortMapping] Stopped");
        }
        let _pass = self.pass_lock.lock().await;
    }

    /// Stops reconciling and removes every installed mapping.
    pub async fn clear(&self) {
        if let Some(state) = self.state.lock().await.take() {
            state.cancel.cancel();
        }
        self.remove_all_port_mappings().await;
    }

    /// Returns true while passes are scheduled.
    pub async fn is_running(&self) -> bool {
        self.state
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| !s.cancel.is_cancelled())
    }

    /// Returns the adopted desired ports, sorted.
    pub async fn desired_ports(&self) -> Vec<ForwardPort> {
        let mut ports: Vec<ForwardPort> = self
            .state
            .lock()
            .await
            .as_ref()
            .map(|s| s.ports.iter().cloned().collect())
            .unwrap_or_default();
        ports.sort();
        ports
    }

    /// Runs one reconciliation pass over every connection service.
    ///
    /// Existing router entries are left alone. Each add attempt reports its
    /// own single-entry status map to `listener`.
    pub async fn run_pass(&self, ports: &HashSet<ForwardPort>, listener: &dyn PortStatusListener) {
        let _pass = self.pass_lock.lock().await;
        self.reconcile_all(ports, listener).await;
    }

    /// Runs a timer-driven pass unless the ticker was cancelled while it
    /// waited for a removal to finish.
    async fn run_scheduled_pass(
        &self,
        ports: &HashSet<ForwardPort>,
        listener: &dyn PortStatusListener,
        cancel: &CancellationToken,
    ) {
        let _pass = self.pass_lock.lock().await;
        if cancel.is_cancelled() {
            return;
        }
        self.reconcile_all(ports, listener).await;
    }

    async fn reconcile_all(&self, ports: &HashSet<ForwardPort>, listener: &dyn PortStatusListener) {
        let services = self.registry.connection_services();
        if services.is_empty() {
            log::debug!("[PortMapping] No connection service, nothing to map");
            return;
        }

        let mut sorted: Vec<&ForwardPort> = ports.iter().collect();
        sorted.sort();

        for service in &services {
            let local_ip = match resolve_local_address(service) {
                Ok(ip) => ip,
                Err(e) => {
                    log::warn!("[PortMapping] No local address for {}: {}", service, e);
                    continue;
                }
            };
            for port in &sorted {
                let mapping = PortMapping::for_port(port, local_ip, &self.description_prefix);
                if let Some(status) = self.reconcile_port(service, port, mapping).await {
                    listener.port_forward_status(HashMap::from([((*port).clone(), status)]));
                }
            }
        }
    }

    /// Installs one mapping unless the router already has an entry for it.
    async fn reconcile_port(
        &self,
        service: &ServiceRef,
        port: &ForwardPort,
        mapping: PortMapping,
    ) -> Option<ForwardPortStatus> {
        let cp = self.registry.control_point().as_ref();

        match get_specific_port_mapping_entry(cp, service, port.port, port.protocol).await {
            Ok(Some(entry)) => {
                log::debug!(
                    "[PortMapping] {} already mapped on {} (client {:?})",
                    port,
                    service,
                    entry.internal_client
                );
                return None;
            }
            Ok(None) => {}
            Err(e) => log::debug!("[PortMapping] Lookup of {} on {} failed: {}", port, service, e),
        }

        match add_port_mapping(cp, service, &mapping).await {
            Ok(()) => {
                log::info!(
                    "[PortMapping] Mapped {} to {} on {}",
                    port,
                    mapping.internal_client,
                    service
                );
                self.registry.record_active_mapping(service, mapping);
                Some(ForwardPortStatus::MaybeSuccess {
                    external_port: port.port,
                })
            }
            Err(e) => {
                log::warn!("[PortMapping] Unable to map {} on {}: {}", port, service, e);
                Some(ForwardPortStatus::DefiniteFailure {
                    reason: e.router_message(),
                    port: port.port,
                })
            }
        }
    }

    /// Deletes every mapping recorded as installed.
    ///
    /// Entries whose deletion fails stay recorded.
    pub async fn remove_all_port_mappings(&self) {
        let _pass = self.pass_lock.lock().await;
        let cp = self.registry.control_point().as_ref();

        for (service, mapping) in self.registry.active_mappings() {
            match delete_port_mapping(cp, &service, &mapping).await {
                Ok(()) => {
                    log::info!(
                        "[PortMapping] Removed {}/{} from {}",
                        mapping.external_port,
                        mapping.protocol,
                        service
                    );
                    self.registry.forget_active_mapping(&service, &mapping);
                }
                Err(e) => log::warn!(
                    "[PortMapping] Unable to remove {}/{} from {}: {}",
                    mapping.external_port,
                    mapping.protocol,
                    service,
                    e
                ),
            }
        }
    }
}
