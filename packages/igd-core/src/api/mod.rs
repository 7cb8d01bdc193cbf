//! HTTP API layer.
//!
//! Serves the GENA NOTIFY callback for the reference control point and a
//! small status API. Handlers are thin and delegate to services.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::igd::UpnpControlPoint;
use crate::services::GatewayService;
use crate::state::PortStatusBoard;

pub mod http;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
#[derive(Clone)]
pub struct AppState {
    /// Public facade over registry and reconciler.
    pub gateway: Arc<GatewayService>,
    /// Control point receiving NOTIFY callbacks.
    pub control_point: Arc<UpnpControlPoint>,
    /// Listener for ports set through the API.
    pub status_board: Arc<PortStatusBoard>,
}

/// Binds the HTTP listener on all interfaces.
///
/// Port 0 lets the OS pick a free port; the bound port is returned.
pub async fn bind(port: u16) -> Result<(u16, TcpListener), ServerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(&addr).await?;
    let port = listener.local_addr()?.port();
    Ok((port, listener))
}

/// Serves the API on `listener` until `cancel` fires.
pub async fn serve(
    state: AppState,
    listener: TcpListener,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("Server listening on http://{}", addr);
    }
    let app = http::create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}
