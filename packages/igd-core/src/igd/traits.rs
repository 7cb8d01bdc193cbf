//! Trait abstractions at the UPnP boundary.
//!
//! The registry and reconciler depend on [`ControlPoint`] rather than on the
//! SSDP/SOAP/GENA implementation, so they can be driven by an in-memory
//! control point in tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::actions::ActionError;
use super::discovery::DiscoveryResult;
use super::gena::GenaResult;
use super::services::IgdAction;
use super::types::{ForwardPort, ForwardPortStatus, GatewayDevice, ServiceRef};

/// Subscription identifier (GENA SID).
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubscriptionId(pub String);

impl SubscriptionId {
    pub fn new(sid: impl Into<String>) -> Self {
        Self(sid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a subscription ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// A renewal request was rejected or timed out.
    RenewalFailed,
    /// The subscription lapsed without renewal.
    Expired,
    /// The publishing device left the network.
    DeviceWasRemoved,
    /// Ended on request.
    Unsubscribed,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RenewalFailed => write!(f, "renewal failed"),
            Self::Expired => write!(f, "expired"),
            Self::DeviceWasRemoved => write!(f, "device removed"),
            Self::Unsubscribed => write!(f, "unsubscribed"),
        }
    }
}

/// Notifications emitted by a control point.
#[derive(Debug, Clone)]
pub enum ControlPointEvent {
    /// A root device finished loading its description.
    DeviceAdded(Arc<GatewayDevice>),
    /// A root device is no longer reachable.
    DeviceRemoved(Arc<GatewayDevice>),
    /// An event message with evented state variable values.
    EventReceived {
        subscription: SubscriptionId,
        service: ServiceRef,
        values: HashMap<String, String>,
    },
    /// Event sequence numbers skipped.
    EventsMissed {
        subscription: SubscriptionId,
        count: u32,
    },
    /// An event message could not be parsed.
    InvalidMessage {
        subscription: SubscriptionId,
        reason: String,
    },
    /// A renewal request succeeded.
    SubscriptionRenewed { subscription: SubscriptionId },
    /// A subscription ended, either finally or pending a retried renewal.
    SubscriptionEnded {
        subscription: SubscriptionId,
        reason: CancelReason,
    },
}

/// Operations the gateway logic needs from a UPnP control point.
#[async_trait]
pub trait ControlPoint: Send + Sync {
    /// Sends a search for gateway devices. Results arrive as `DeviceAdded` events.
    async fn search(&self) -> DiscoveryResult<()>;

    /// Invokes a control action and returns its output arguments by name.
    ///
    /// # Arguments
    /// * `service` - Target WAN service
    /// * `action` - The action to invoke
    /// * `args` - Input arguments (order is preserved)
    async fn execute_action(
        &self,
        service: &ServiceRef,
        action: IgdAction,
        args: &[(&str, String)],
    ) -> Result<HashMap<String, String>, ActionError>;

    /// Subscribes to a service's events for `duration_secs`, renewing automatically.
    async fn subscribe(&self, service: &ServiceRef, duration_secs: u64)
        -> GenaResult<SubscriptionId>;

    /// Ends a subscription, notifying the publisher.
    async fn unsubscribe(&self, subscription: &SubscriptionId);

    /// Forgets a subscription locally without contacting the publisher.
    fn remove_subscription(&self, subscription: &SubscriptionId);
}

/// Receives per-port outcomes of reconciliation passes.
pub trait PortStatusListener: Send + Sync {
    /// Called with the statuses that changed during a pass. Never called with an empty map.
    fn port_forward_status(&self, statuses: HashMap<ForwardPort, ForwardPortStatus>);
}
