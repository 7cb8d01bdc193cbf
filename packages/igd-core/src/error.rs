//! Centralized error types for the IGD agent core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::igd::actions::ActionError;
use crate::igd::discovery::DiscoveryError;
use crate::igd::gena::GenaError;
use crate::igd::soap::SoapError;
use crate::utils::NetworkError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for DiscoveryError {
    fn code(&self) -> &'static str {
        match self {
            Self::SocketBind(_) => "socket_bind_failed",
            Self::NoInterfaces => "no_network_interfaces",
            Self::DescriptionFetch { .. } => "description_fetch_failed",
            Self::InvalidDescription(_) => "invalid_description",
        }
    }
}

impl ErrorCode for SoapError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::HttpStatus(_, _) => "http_error_status",
            Self::Fault { .. } => "soap_fault",
            Self::Parse(_) => "soap_parse_error",
        }
    }
}

impl ErrorCode for GenaError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::SubscriptionFailed(_) => "gena_subscription_failed",
            Self::RenewalFailed(_) => "gena_renewal_failed",
            Self::MissingSid => "gena_missing_sid",
            Self::UnknownSubscription(_) => "gena_unknown_subscription",
            Self::CallbackUnavailable => "gena_callback_unavailable",
        }
    }
}

impl ErrorCode for ActionError {
    fn code(&self) -> &'static str {
        match self {
            Self::Fault { .. } => "upnp_fault",
            Self::MissingOutput(_) => "missing_output",
            Self::InvalidOutput { .. } => "invalid_output",
            Self::Transport(_) => "transport_error",
        }
    }
}

/// Application-wide error type for the IGD agent.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum IgdError {
    /// Gateway discovery failed (SSDP/network issues).
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// A control action on a gateway failed.
    #[error("SOAP request failed: {0}")]
    Soap(String),

    /// Event subscription handling failed.
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// A NOTIFY referenced a subscription we do not hold.
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(String),

    /// No gateway is available to answer.
    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Network-related error (local address detection, binding).
    #[error("Network error: {0}")]
    Network(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Server configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl IgdError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Discovery(_) => "discovery_failed",
            Self::Soap(_) => "soap_error",
            Self::Subscription(_) => "subscription_error",
            Self::UnknownSubscription(_) => "unknown_subscription",
            Self::GatewayUnavailable(_) => "gateway_unavailable",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Network(_) => "network_error",
            Self::Internal(_) => "internal_error",
            Self::Configuration(_) => "configuration_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnknownSubscription(_) => StatusCode::PRECONDITION_FAILED,
            Self::GatewayUnavailable(_) | Self::Configuration(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Soap(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result Type Aliases
// ─────────────────────────────────────────────────────────────────────────────

// Re-export Result type aliases from their defining modules
pub use crate::igd::discovery::DiscoveryResult;
pub use crate::igd::gena::GenaResult;
pub use crate::igd::soap::SoapResult;

/// Convenient Result alias for application-wide operations.
pub type IgdResult<T> = Result<T, IgdError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for IgdError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<GenaError> for IgdError {
    fn from(err: GenaError) -> Self {
        match err {
            GenaError::UnknownSubscription(sid) => Self::UnknownSubscription(sid),
            GenaError::MissingSid => Self::InvalidRequest(err.to_string()),
            other => Self::Subscription(other.to_string()),
        }
    }
}

impl From<SoapError> for IgdError {
    fn from(err: SoapError) -> Self {
        Self::Soap(err.to_string())
    }
}

impl From<ActionError> for IgdError {
    fn from(err: ActionError) -> Self {
        Self::Soap(err.to_string())
    }
}

impl From<DiscoveryError> for IgdError {
    fn from(err: DiscoveryError) -> Self {
        Self::Discovery(err.to_string())
    }
}

impl From<NetworkError> for IgdError {
    fn from(err: NetworkError) -> Self {
        Self::Network(err.to_string())
    }
}
