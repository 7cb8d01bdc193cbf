//! Application services layer.
//!
//! Gateway bookkeeping and port-mapping reconciliation on top of the
//! [`ControlPoint`](crate::igd::ControlPoint) boundary.

pub mod event_processor;
pub mod gateway_service;
pub mod port_mapping;
pub mod registry;
pub mod subscription;

pub use event_processor::ControlPointEventProcessor;
pub use gateway_service::GatewayService;
pub use port_mapping::PortMappingTicker;
pub use registry::DeviceRegistry;
pub use subscription::{SubscriptionHandle, SubscriptionState};
