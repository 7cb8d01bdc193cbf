//! IGD Core - shared library for the IGD Agent.
//!
//! This crate finds UPnP Internet Gateway Devices on the local network,
//! tracks the external addresses they report, and keeps a desired set of
//! ports forwarded on every reachable gateway.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`runtime`]: Task spawning abstraction for async runtime independence
//! - [`state`]: Configuration and runtime state
//! - [`igd`]: Gateway discovery and control (SSDP/SOAP/GENA)
//! - [`services`]: Registry, port-mapping reconciliation and the public facade
//! - [`api`]: GENA callback and status HTTP endpoints
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//! - [`ControlPoint`](igd::ControlPoint): The UPnP control point the
//!   gateway logic is driven by
//! - [`PortStatusListener`](igd::PortStatusListener): Receives per-port
//!   reconciliation outcomes

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod error;
pub mod igd;
pub mod protocol_constants;
pub mod runtime;
pub mod services;
pub mod state;
pub mod utils;

// Re-export commonly used types at the crate root
pub use error::{DiscoveryResult, ErrorCode, GenaResult, IgdError, IgdResult, SoapResult};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use state::{Config, IpCacheInvalidation, PortStatusBoard};
pub use utils::{is_public_address, NetworkError};

// Re-export gateway types
pub use igd::{
    ControlPoint, ControlPointEvent, DetectedIp, ForwardPort, ForwardPortStatus, IgdRates,
    PortMapping, PortProtocol, PortStatusListener, UpnpControlPoint,
};

// Re-export service types
pub use services::{DeviceRegistry, GatewayService, PortMappingTicker};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, BootstrappedServices};

// Re-export API types
pub use api::{AppState, ServerError};
