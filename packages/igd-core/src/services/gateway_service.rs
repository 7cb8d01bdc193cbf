//! Gateway service facade.
//!
//! Composes the registry, the port-mapping ticker and the event processor
//! behind the operations the host application uses.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::event_processor::ControlPointEventProcessor;
use super::port_mapping::PortMappingTicker;
use super::registry::DeviceRegistry;
use crate::igd::{ControlPoint, ControlPointEvent, DetectedIp, ForwardPort, IgdRates, PortStatusListener};
use crate::runtime::TokioSpawner;
use crate::state::Config;

/// Public entry point for external-address detection and port forwarding.
pub struct GatewayService {
    registry: Arc<DeviceRegistry>,
    ticker: Arc<PortMappingTicker>,
    event_processor: ControlPointEventProcessor,
}

impl GatewayService {
    /// Creates the service around a control point and its notification channel.
    pub fn new(
        control_point: Arc<dyn ControlPoint>,
        event_rx: mpsc::UnboundedReceiver<ControlPointEvent>,
        config: &Config,
        spawner: TokioSpawner,
    ) -> Self {
        let registry = Arc::new(DeviceRegistry::new(control_point, config.clone()));
        let ticker = Arc::new(PortMappingTicker::new(
            Arc::clone(&registry),
            config,
            spawner.clone(),
        ));
        let event_processor =
            ControlPointEventProcessor::new(Arc::clone(&registry), event_rx, spawner);

        Self {
            registry,
            ticker,
            event_processor,
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn ticker(&self) -> &Arc<PortMappingTicker> {
        &self.ticker
    }

    /// Starts applying control point notifications.
    pub fn start(&self, cancel: CancellationToken) {
        self.event_processor.start(cancel);
    }

    /// Returns the external addresses of all gateways, waiting for boot first.
    pub async fn external_ips(&self) -> Vec<DetectedIp> {
        self.registry.external_ips().await
    }

    /// Replaces the desired port set. An empty set clears it.
    pub async fn set_desired_ports(
        &self,
        ports: HashSet<ForwardPort>,
        listener: Arc<dyn PortStatusListener>,
    ) {
        if ports.is_empty() {
            self.clear_desired_ports().await;
            return;
        }
        self.ticker.start(ports, listener).await;
    }

    /// Stops reconciling and removes the mappings installed so far.
    pub async fn clear_desired_ports(&self) {
        log::info!("[GatewayService] Clearing desired ports");
        self.ticker.clear().await;
    }

    /// Summed link rates, waiting for boot first.
    pub async fn rates(&self) -> Option<IgdRates> {
        self.registry.wait_for_booting().await;
        self.registry.rates().await
    }

    /// Summed upstream maximum bit rate, or `None` if unknown.
    pub async fn upstream_max_bit_rate(&self) -> Option<u64> {
        self.rates().await.map(|r| r.upstream)
    }

    /// Summed downstream maximum bit rate, or `None` if unknown.
    pub async fn downstream_max_bit_rate(&self) -> Option<u64> {
        self.rates().await.map(|r| r.downstream)
    }

    /// Removes installed mappings and ends all subscriptions.
    pub async fn shutdown(&self) {
        log::info!("[GatewayService] Shutting down");
        self.ticker.clear().await;
        self.registry.end_subscriptions().await;
    }
}
