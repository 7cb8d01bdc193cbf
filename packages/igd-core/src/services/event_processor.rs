//! Control point event processing.
//!
//! Drains the [`ControlPointEvent`] channel of the control point and applies
//! each notification to the [`DeviceRegistry`].

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::registry::DeviceRegistry;
use crate::igd::ControlPointEvent;
use crate::runtime::{TaskSpawner, TokioSpawner};

/// Applies control point notifications to the registry.
pub struct ControlPointEventProcessor {
    registry: Arc<DeviceRegistry>,
    event_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ControlPointEvent>>>>,
    spawner: TokioSpawner,
}

impl ControlPointEventProcessor {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        event_rx: mpsc::UnboundedReceiver<ControlPointEvent>,
        spawner: TokioSpawner,
    ) -> Self {
        Self {
            registry,
            event_rx: Arc::new(Mutex::new(Some(event_rx))),
            spawner,
        }
    }

    /// Applies a single notification.
    pub async fn process_event(registry: &DeviceRegistry, event: ControlPointEvent) {
        match event {
            ControlPointEvent::DeviceAdded(device) => registry.on_device_added(&device).await,
            ControlPointEvent::DeviceRemoved(device) => registry.on_device_removed(&device).await,
            ControlPointEvent::EventReceived {
                subscription,
                service,
                values,
            } => {
                log::debug!(
                    "[EventProcessor] Event on {} ({} variable(s))",
                    subscription,
                    values.len()
                );
                registry.on_event(&service, &values);
            }
            ControlPointEvent::EventsMissed {
                subscription,
                count,
            } => {
                log::warn!(
                    "[EventProcessor] {} event(s) missed on {}",
                    count,
                    subscription
                );
            }
            ControlPointEvent::InvalidMessage {
                subscription,
                reason,
            } => {
                log::warn!(
                    "[EventProcessor] Invalid event message on {}: {}",
                    subscription,
                    reason
                );
            }
            ControlPointEvent::SubscriptionRenewed { subscription } => {
                registry.on_subscription_renewed(&subscription)
            }
            ControlPointEvent::SubscriptionEnded {
                subscription,
                reason,
            } => registry.on_subscription_ended(&subscription, reason).await,
        }
    }

    /// Spawns the task draining the notification channel.
    ///
    /// Only the first call has an effect; the receiver is taken by it.
    pub fn start(&self, cancel: CancellationToken) {
        let registry = Arc::clone(&self.registry);
        let event_rx = Arc::clone(&self.event_rx);

        self.spawner.spawn_until_cancelled(cancel, async move {
            let rx = event_rx.lock().take();
            let Some(mut rx) = rx else {
                log::warn!("[EventProcessor] Already started");
                return;
            };
            while let Some(event) = rx.recv().await {
                Self::process_event(&registry, event).await;
            }
            log::debug!("[EventProcessor] Channel closed");
        });
    }
}
