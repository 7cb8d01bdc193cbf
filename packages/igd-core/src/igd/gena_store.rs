//! GENA subscription state management.
//!
//! Pure data structure for tracking active subscriptions without I/O operations.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use super::traits::SubscriptionId;
use super::types::{ServiceKey, ServiceRef};

/// Internal subscription state (keyed by SID in the subscriptions HashMap).
pub(crate) struct Subscription {
    pub service: ServiceRef,
    pub timeout_secs: u64,
    pub expires_at: Instant,
    /// Last SEQ header value received, if any.
    pub last_seq: Option<u32>,
}

/// Outcome of recording an event sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeqCheck {
    /// The sequence continued without a gap (or carried no SEQ).
    InOrder,
    /// `missed` events were skipped since the previous message.
    Gap { missed: u32 },
}

/// A subscription due for renewal.
#[derive(Debug, Clone)]
pub struct ExpiringSubscription {
    pub sid: SubscriptionId,
    pub service: ServiceRef,
    pub timeout_secs: u64,
}

/// Pure state container for GENA subscriptions.
///
/// This struct manages subscription state without performing any I/O.
/// All HTTP operations are delegated to `GenaClient`.
pub struct GenaSubscriptionStore {
    /// Map from SID to subscription state.
    subscriptions: RwLock<HashMap<String, Subscription>>,
    /// Reverse lookup: service -> SID.
    subscription_keys: RwLock<HashMap<ServiceKey, String>>,
}

impl GenaSubscriptionStore {
    /// Creates a new empty subscription store.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            subscription_keys: RwLock::new(HashMap::new()),
        }
    }

    /// Checks if a subscription exists for the given service.
    #[must_use]
    pub fn is_subscribed(&self, key: &ServiceKey) -> bool {
        self.subscription_keys.read().contains_key(key)
    }

    /// Inserts a new subscription into the store.
    ///
    /// A previous subscription for the same service is replaced in the
    /// reverse lookup but stays addressable by its SID until removed.
    pub fn insert(&self, sid: String, service: ServiceRef, timeout_secs: u64) {
        let key = service.key();

        self.subscriptions.write().insert(
            sid.clone(),
            Subscription {
                service,
                timeout_secs,
                expires_at: Instant::now() + Duration::from_secs(timeout_secs),
                last_seq: None,
            },
        );
        self.subscription_keys.write().insert(key, sid);
    }

    /// Removes a subscription by SID.
    ///
    /// Returns the subscribed service if it existed.
    pub fn remove(&self, sid: &str) -> Option<ServiceRef> {
        let sub = self.subscriptions.write().remove(sid)?;
        let key = sub.service.key();
        let mut keys = self.subscription_keys.write();
        if keys.get(&key).is_some_and(|s| s == sid) {
            keys.remove(&key);
        }
        Some(sub.service)
    }

    /// Gets the subscribed service by SID.
    pub fn get(&self, sid: &str) -> Option<ServiceRef> {
        self.subscriptions.read().get(sid).map(|s| s.service.clone())
    }

    /// Updates the expiration time for a subscription.
    pub fn update_expiry(&self, sid: &str, timeout_secs: u64) {
        if let Some(sub) = self.subscriptions.write().get_mut(sid) {
            sub.timeout_secs = timeout_secs;
            sub.expires_at = Instant::now() + Duration::from_secs(timeout_secs);
        }
    }

    /// Records the SEQ of an incoming event and reports skipped sequence numbers.
    ///
    /// Returns `None` for unknown SIDs. SEQ 0 is the initial event and restarts
    /// the sequence.
    pub fn record_seq(&self, sid: &str, seq: Option<u32>) -> Option<SeqCheck> {
        let mut subs = self.subscriptions.write();
        let sub = subs.get_mut(sid)?;
        let Some(seq) = seq else {
            return Some(SeqCheck::InOrder);
        };

        let check = match sub.last_seq {
            Some(last) if seq != 0 && seq > last.saturating_add(1) => SeqCheck::Gap {
                missed: seq - last - 1,
            },
            _ => SeqCheck::InOrder,
        };
        sub.last_seq = Some(seq);
        Some(check)
    }

    /// Returns subscriptions that need renewal.
    ///
    /// A subscription is due once its remaining lifetime drops below
    /// `buffer_secs` or half its granted timeout, whichever is smaller.
    pub fn get_expiring(&self, buffer_secs: u64) -> Vec<ExpiringSubscription> {
        let now = Instant::now();

        self.subscriptions
            .read()
            .iter()
            .filter(|(_, sub)| {
                let buffer = Duration::from_secs(buffer_secs.min(sub.timeout_secs / 2));
                sub.expires_at.saturating_duration_since(now) < buffer
            })
            .map(|(sid, sub)| ExpiringSubscription {
                sid: SubscriptionId::new(sid.clone()),
                service: sub.service.clone(),
                timeout_secs: sub.timeout_secs,
            })
            .collect()
    }

    /// Gets all SIDs in the store.
    pub fn get_all_sids(&self) -> Vec<String> {
        self.subscriptions.read().keys().cloned().collect()
    }

    /// Returns the number of active subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Returns true if there are no active subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.read().is_empty()
    }
}

impl Default for GenaSubscriptionStore {
    fn default() -> Self {
        Self::new()
    }
}
