//! Internet Gateway Device control and discovery.
//!
//! # Module Structure
//!
//! - `types` - Device tree, service references and port-mapping types
//! - `services` - IGD service kinds and action names
//! - `traits` - The [`ControlPoint`] boundary and its notifications
//! - `actions` - Typed invokers for the IGD actions
//! - `discovery` - SSDP search and device description loading
//! - `soap` - Low-level SOAP protocol implementation
//! - `gena` - GENA subscription lifecycle (coordinator)
//! - `gena_client` - GENA HTTP operations
//! - `gena_store` - GENA subscription state management
//! - `gena_parser` - NOTIFY property-set parsing
//! - `control_point` - [`UpnpControlPoint`], the network-backed control point
//! - `utils` - Shared XML helpers

pub mod actions;
pub mod control_point;
pub mod discovery;
pub mod gena;
pub mod gena_client;
pub mod gena_parser;
pub mod gena_store;
pub mod services;
pub mod soap;
pub mod traits;
pub mod types;
pub(crate) mod utils;

#[cfg(test)]
pub(crate) mod test_fixtures;

pub use actions::ActionError;
pub use control_point::UpnpControlPoint;
pub use services::{IgdAction, IgdServiceKind};
pub use traits::{
    CancelReason, ControlPoint, ControlPointEvent, PortStatusListener, SubscriptionId,
};
pub use types::{
    DetectedIp, DeviceId, ForwardPort, ForwardPortStatus, GatewayDevice, IgdRates, PortMapping,
    PortProtocol, ServiceKey, ServiceRef,
};
