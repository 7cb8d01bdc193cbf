//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root: the HTTP client, the reference
//! control point, the gateway service and the API state are created and
//! wired together here.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::api::{self, AppState};
use crate::error::{IgdError, IgdResult};
use crate::igd::{ControlPoint, UpnpControlPoint};
use crate::protocol_constants::SOAP_TIMEOUT_SECS;
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::services::GatewayService;
use crate::state::{Config, PortStatusBoard};

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Public facade over registry and reconciler.
    pub gateway: Arc<GatewayService>,
    /// Network-backed control point.
    pub control_point: Arc<UpnpControlPoint>,
    /// Latest port outcomes for ports set through the API.
    pub status_board: Arc<PortStatusBoard>,
    /// Application configuration.
    pub config: Arc<Config>,
    /// Task spawner for background operations.
    pub spawner: TokioSpawner,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Builds the API state for these services.
    pub fn app_state(&self) -> AppState {
        AppState {
            gateway: Arc::clone(&self.gateway),
            control_point: Arc::clone(&self.control_point),
            status_board: Arc::clone(&self.status_board),
        }
    }

    /// Binds the callback server, then starts event processing, discovery
    /// and subscription renewal.
    ///
    /// The callback port is known before the first search, so every
    /// subscription carries a reachable callback URL.
    ///
    /// # Returns
    /// The bound HTTP port.
    pub async fn start(&self) -> IgdResult<u16> {
        let (port, listener) = api::bind(self.config.callback_port)
            .await
            .map_err(|e| IgdError::Network(e.to_string()))?;
        self.control_point.set_callback_port(port);

        let state = self.app_state();
        let cancel = self.cancel_token.clone();
        self.spawner.spawn(async move {
            if let Err(e) = api::serve(state, listener, cancel).await {
                log::error!("[Bootstrap] Server error: {}", e);
            }
        });

        self.gateway.start(self.cancel_token.clone());
        self.control_point
            .start_background_tasks(&self.spawner, self.cancel_token.clone());

        log::info!("[Bootstrap] Services started, callback port {}", port);
        Ok(port)
    }

    /// Initiates graceful shutdown of all services.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        // Remove mappings and end subscriptions while the event loop still runs
        self.gateway.shutdown().await;

        // Signal cancellation to all background tasks
        self.cancel_token.cancel();

        // Drop any subscription the registry did not know about
        self.control_point.shutdown().await;

        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Creates the shared HTTP client for SOAP, GENA and description requests.
fn create_http_client() -> IgdResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(SOAP_TIMEOUT_SECS))
        .build()
        .map_err(|e| IgdError::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// Bootstraps all application services with their dependencies.
///
/// Services are created in dependency order:
///
/// 1. Shared infrastructure (HTTP client, cancellation token, spawner)
/// 2. Control point (depends on HTTP client and config)
/// 3. Gateway service (depends on control point and its event channel)
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the HTTP client
/// cannot be created.
pub fn bootstrap_services(config: Config) -> IgdResult<BootstrappedServices> {
    config.validate().map_err(IgdError::Configuration)?;

    let spawner = TokioSpawner::current();
    let http_client = create_http_client()?;
    let cancel_token = CancellationToken::new();

    let (control_point, event_rx) = UpnpControlPoint::new(http_client, &config);
    let control_point = Arc::new(control_point);

    let gateway = Arc::new(GatewayService::new(
        Arc::clone(&control_point) as Arc<dyn ControlPoint>,
        event_rx,
        &config,
        spawner.clone(),
    ));

    Ok(BootstrappedServices {
        gateway,
        control_point,
        status_board: Arc::new(PortStatusBoard::new()),
        config: Arc::new(config),
        spawner,
        cancel_token,
    })
}
