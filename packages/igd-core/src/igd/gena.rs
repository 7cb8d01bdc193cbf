//! UPnP GENA event subscription lifecycle.
//!
//! [`GenaSubscriptionManager`] coordinates [`GenaClient`] (HTTP) and
//! [`GenaSubscriptionStore`] (state). Everything observable is reported as a
//! [`ControlPointEvent`] on the channel returned by [`GenaSubscriptionManager::new`].

use reqwest::Client;
use thiserror::Error;
use tokio::sync::mpsc;

use super::gena_client::GenaClient;
use super::gena_parser::parse_property_set;
use super::gena_store::{GenaSubscriptionStore, SeqCheck};
use super::traits::{CancelReason, ControlPointEvent, SubscriptionId};
use super::types::ServiceRef;

/// Errors that can occur during GENA operations.
#[derive(Debug, Error)]
pub enum GenaError {
    /// HTTP request to the publisher failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// SUBSCRIBE was rejected.
    #[error("subscription failed with status {0}")]
    SubscriptionFailed(u16),

    /// Renewal SUBSCRIBE was rejected.
    #[error("renewal failed with status {0}")]
    RenewalFailed(u16),

    /// Publisher accepted the subscription without returning a SID.
    #[error("response carried no SID header")]
    MissingSid,

    /// NOTIFY for a SID we do not know.
    #[error("unknown subscription: {0}")]
    UnknownSubscription(String),

    /// No local address or callback port to receive events on.
    #[error("event callback is not available")]
    CallbackUnavailable,
}

/// Convenient Result alias for GENA operations.
pub type GenaResult<T> = Result<T, GenaError>;

/// Manages GENA subscriptions to gateway services.
pub struct GenaSubscriptionManager {
    client: GenaClient,
    store: GenaSubscriptionStore,
    event_tx: mpsc::UnboundedSender<ControlPointEvent>,
}

impl GenaSubscriptionManager {
    /// Creates a new manager and the receiver for the events it emits.
    pub fn new(client: Client) -> (Self, mpsc::UnboundedReceiver<ControlPointEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (Self::with_sender(client, event_tx), event_rx)
    }

    /// Creates a manager that emits into an existing channel.
    pub fn with_sender(client: Client, event_tx: mpsc::UnboundedSender<ControlPointEvent>) -> Self {
        Self {
            client: GenaClient::new(client),
            store: GenaSubscriptionStore::new(),
            event_tx,
        }
    }

    fn emit(&self, event: ControlPointEvent) {
        if self.event_tx.send(event).is_err() {
            log::debug!("[GENA] Event receiver dropped");
        }
    }

    /// Subscribes to a service's events.
    ///
    /// # Arguments
    /// * `service` - The WAN service to subscribe to
    /// * `callback_url` - URL where NOTIFY events should be sent
    /// * `duration_secs` - Requested subscription duration
    pub async fn subscribe(
        &self,
        service: &ServiceRef,
        callback_url: &str,
        duration_secs: u64,
    ) -> GenaResult<SubscriptionId> {
        let response = self
            .client
            .subscribe(&service.event_sub_url, callback_url, duration_secs)
            .await?;

        log::info!(
            "[GENA] Subscribed to {} (SID: {}, timeout: {}s)",
            service,
            response.sid,
            response.timeout_secs
        );

        self.store
            .insert(response.sid.clone(), service.clone(), response.timeout_secs);
        Ok(SubscriptionId::new(response.sid))
    }

    /// Unsubscribes and forgets a subscription.
    pub async fn unsubscribe(&self, sid: &SubscriptionId) {
        let Some(service) = self.store.remove(sid.as_str()) else {
            return;
        };
        if self.client.unsubscribe(&service.event_sub_url, sid.as_str()).await {
            log::info!("[GENA] Unsubscribed from {} (SID: {})", service, sid);
        } else {
            log::warn!(
                "[GENA] UNSUBSCRIBE failed for {} (SID: {}), dropped locally",
                service,
                sid
            );
        }
        self.emit(ControlPointEvent::SubscriptionEnded {
            subscription: sid.clone(),
            reason: CancelReason::Unsubscribed,
        });
    }

    /// Forgets a subscription without contacting the publisher.
    pub fn remove(&self, sid: &SubscriptionId) {
        if let Some(service) = self.store.remove(sid.as_str()) {
            log::debug!("[GENA] Removed subscription {} for {}", sid, service);
        }
    }

    /// Unsubscribes all subscriptions (for graceful shutdown).
    pub async fn unsubscribe_all(&self) {
        let sids = self.store.get_all_sids();
        if !sids.is_empty() {
            log::info!("[GENA] Unsubscribing {} subscription(s)", sids.len());
        }
        for sid in sids {
            self.unsubscribe(&SubscriptionId::new(sid)).await;
        }
    }

    /// Renews subscriptions close to expiry.
    ///
    /// A failed renewal keeps the subscription so the next check retries it,
    /// and reports `SubscriptionEnded { reason: RenewalFailed }`.
    pub async fn renew_expiring(&self, buffer_secs: u64) {
        for due in self.store.get_expiring(buffer_secs) {
            match self
                .client
                .renew(&due.service.event_sub_url, due.sid.as_str(), due.timeout_secs)
                .await
            {
                Ok(timeout_secs) => {
                    self.store.update_expiry(due.sid.as_str(), timeout_secs);
                    log::debug!("[GENA] Renewed {} for {}s", due.sid, timeout_secs);
                    self.emit(ControlPointEvent::SubscriptionRenewed {
                        subscription: due.sid,
                    });
                }
                Err(e) => {
                    log::warn!(
                        "[GENA] Renewal of {} for {} failed: {}",
                        due.sid,
                        due.service,
                        e
                    );
                    self.emit(ControlPointEvent::SubscriptionEnded {
                        subscription: due.sid,
                        reason: CancelReason::RenewalFailed,
                    });
                }
            }
        }
    }

    /// Handles an incoming NOTIFY.
    ///
    /// Emits `EventsMissed` for SEQ gaps, then either `EventReceived` or
    /// `InvalidMessage`.
    ///
    /// # Errors
    /// Returns [`GenaError::UnknownSubscription`] if the SID is not ours.
    pub fn handle_notify(&self, sid: &str, seq: Option<u32>, body: &str) -> GenaResult<()> {
        let service = self
            .store
            .get(sid)
            .ok_or_else(|| GenaError::UnknownSubscription(sid.to_string()))?;
        let subscription = SubscriptionId::new(sid);

        if let Some(SeqCheck::Gap { missed }) = self.store.record_seq(sid, seq) {
            log::warn!("[GENA] {} missed {} event(s)", sid, missed);
            self.emit(ControlPointEvent::EventsMissed {
                subscription: subscription.clone(),
                count: missed,
            });
        }

        match parse_property_set(body) {
            Ok(values) => {
                log::debug!("[GENA] Event from {}: {:?}", service, values.keys());
                self.emit(ControlPointEvent::EventReceived {
                    subscription,
                    service,
                    values,
                });
            }
            Err(reason) => {
                log::warn!("[GENA] Invalid event body from {}: {}", service, reason);
                self.emit(ControlPointEvent::InvalidMessage {
                    subscription,
                    reason,
                });
            }
        }
        Ok(())
    }

    /// Returns the number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.store.len()
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &GenaSubscriptionStore {
        &self.store
    }
}
