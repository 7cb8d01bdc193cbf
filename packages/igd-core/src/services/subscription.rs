//! Per-service event subscription handle.
//!
//! Tracks one connection service's subscription through
//! SUBSCRIBING → ESTABLISHED → ENDED (or FAILED) and counts consecutive
//! renewal failures.

use crate::igd::{ServiceRef, SubscriptionId};

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// SUBSCRIBE sent, no answer yet.
    Subscribing,
    /// The publisher accepted the subscription.
    Established,
    /// The initial SUBSCRIBE was rejected.
    Failed,
    /// The subscription was ended.
    Ended,
}

/// Subscription of one connection service.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    service: ServiceRef,
    sid: Option<SubscriptionId>,
    state: SubscriptionState,
    renewal_failures: u32,
}

impl SubscriptionHandle {
    /// A handle for a subscription about to be requested.
    pub fn subscribing(service: ServiceRef) -> Self {
        Self {
            service,
            sid: None,
            state: SubscriptionState::Subscribing,
            renewal_failures: 0,
        }
    }

    pub fn service(&self) -> &ServiceRef {
        &self.service
    }

    pub fn sid(&self) -> Option<&SubscriptionId> {
        self.sid.as_ref()
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn renewal_failures(&self) -> u32 {
        self.renewal_failures
    }

    /// Returns true if this handle owns `sid`.
    pub fn is(&self, sid: &SubscriptionId) -> bool {
        self.sid.as_ref() == Some(sid)
    }

    pub fn established(&mut self, sid: SubscriptionId) {
        self.sid = Some(sid);
        self.state = SubscriptionState::Established;
    }

    pub fn failed(&mut self) {
        self.state = SubscriptionState::Failed;
    }

    pub fn ended(&mut self) {
        self.state = SubscriptionState::Ended;
    }

    /// Resets the failure count after a successful renewal.
    pub fn renewed(&mut self) {
        self.renewal_failures = 0;
        self.state = SubscriptionState::Established;
    }

    /// Counts a failed renewal. Returns true exactly when the count reaches `threshold`.
    pub fn record_renewal_failure(&mut self, threshold: u32) -> bool {
        self.renewal_failures += 1;
        self.renewal_failures == threshold
    }
}
