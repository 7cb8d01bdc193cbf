//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to services for business logic.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    response::IntoResponse,
    routing::{any, get},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::api::AppState;
use crate::error::{IgdError, IgdResult};
use crate::igd::{ForwardPort, PortStatusListener};
use crate::protocol_constants::{APP_NAME, GENA_CALLBACK_PATH, MAX_GENA_BODY_SIZE, SERVICE_ID};

// ─────────────────────────────────────────────────────────────────────────────
// GENA Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Validates required GENA headers and extracts SID and SEQ values.
fn validate_gena_headers(headers: &HeaderMap) -> IgdResult<(String, Option<u32>)> {
    // NT header should be "upnp:event"
    let nt = headers.get("NT").and_then(|v| v.to_str().ok());
    if nt != Some("upnp:event") {
        log::warn!("[GENA] NOTIFY missing or invalid NT header: {:?}", nt);
        return Err(IgdError::InvalidRequest(
            "Missing or invalid NT header".into(),
        ));
    }

    // NTS header should be "upnp:propchange"
    let nts = headers.get("NTS").and_then(|v| v.to_str().ok());
    if nts != Some("upnp:propchange") {
        log::warn!("[GENA] NOTIFY missing or invalid NTS header: {:?}", nts);
        return Err(IgdError::InvalidRequest(
            "Missing or invalid NTS header".into(),
        ));
    }

    // SID is required
    let sid = match headers.get("SID").and_then(|v| v.to_str().ok()) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => {
            log::warn!("[GENA] NOTIFY missing SID header");
            return Err(IgdError::InvalidRequest("Missing SID header".into()));
        }
    };

    // An unparsable SEQ is treated as absent
    let seq = headers
        .get("SEQ")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok());

    Ok((sid, seq))
}

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct DesiredPortsRequest {
    ports: Vec<ForwardPort>,
}

impl DesiredPortsRequest {
    fn into_set(self) -> IgdResult<HashSet<ForwardPort>> {
        if let Some(bad) = self.ports.iter().find(|p| p.port == 0) {
            return Err(IgdError::InvalidRequest(format!(
                "Port 0 is not forwardable ({})",
                bad.name
            )));
        }
        Ok(self.ports.into_iter().collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/external-ip", get(get_external_ips))
        .route("/api/rates", get(get_rates))
        .route("/api/gateways", get(list_gateways))
        .route(
            "/api/mappings",
            get(get_mappings)
                .post(set_mappings)
                .delete(clear_mappings),
        )
        .route(GENA_CALLBACK_PATH, any(handle_gena_notify))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness probe.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.gateway.registry();
    Json(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "name": APP_NAME,
        "booted": registry.is_booted(),
        "gateways": registry.connection_services().len(),
    }))
}

/// External addresses of all gateways. Waits for the boot gate on first use.
async fn get_external_ips(State(state): State<AppState>) -> impl IntoResponse {
    let addresses = state.gateway.external_ips().await;
    Json(json!({ "addresses": addresses }))
}

async fn get_rates(State(state): State<AppState>) -> impl IntoResponse {
    let rates = state.gateway.rates().await;
    Json(json!({
        "upstream": rates.map(|r| r.upstream),
        "downstream": rates.map(|r| r.downstream),
    }))
}

async fn list_gateways(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.gateway.registry();
    let connections: Vec<_> = registry
        .connection_services()
        .into_iter()
        .map(|s| {
            json!({
                "root": s.root,
                "device": s.device,
                "serviceType": s.service_type,
                "controlUrl": s.control_url,
                "localAddress": s.local_address,
                "subscribed": registry
                    .subscription(&s.key())
                    .and_then(|h| h.sid().map(|sid| sid.to_string())),
            })
        })
        .collect();
    Json(json!({ "connections": connections }))
}

async fn get_mappings(State(state): State<AppState>) -> impl IntoResponse {
    let desired = state.gateway.ticker().desired_ports().await;
    let active: Vec<_> = state
        .gateway
        .registry()
        .active_mappings()
        .into_iter()
        .map(|(service, mapping)| json!({ "gateway": service.root, "mapping": mapping }))
        .collect();
    let statuses: Vec<_> = state
        .status_board
        .snapshot()
        .into_iter()
        .map(|(port, status)| json!({ "port": port, "status": status }))
        .collect();

    Json(json!({
        "desired": desired,
        "active": active,
        "statuses": statuses,
    }))
}

/// Replaces the desired port set; returns after the first pass.
async fn set_mappings(
    State(state): State<AppState>,
    Json(request): Json<DesiredPortsRequest>,
) -> IgdResult<impl IntoResponse> {
    let ports = request.into_set()?;
    log::info!("[API] Desired ports set: {} port(s)", ports.len());

    let listener: Arc<dyn PortStatusListener> = state.status_board.clone();
    state.gateway.set_desired_ports(ports, listener).await;

    Ok(Json(json!({
        "desired": state.gateway.ticker().desired_ports().await,
    })))
}

async fn clear_mappings(State(state): State<AppState>) -> impl IntoResponse {
    state.gateway.clear_desired_ports().await;
    state.status_board.clear();
    StatusCode::NO_CONTENT
}

async fn handle_gena_notify(
    State(state): State<AppState>,
    req: Request<Body>,
) -> IgdResult<impl IntoResponse> {
    let (parts, body) = req.into_parts();

    // Only accept NOTIFY method (used by UPnP/GENA)
    if parts.method.as_str() != "NOTIFY" {
        return Err(IgdError::InvalidRequest(format!(
            "Expected NOTIFY method, got {}",
            parts.method
        )));
    }

    let (sid, seq) = validate_gena_headers(&parts.headers)?;

    let body_bytes = axum::body::to_bytes(body, MAX_GENA_BODY_SIZE)
        .await
        .map_err(|e| {
            log::warn!("[GENA] Failed to read NOTIFY body: {}", e);
            IgdError::InvalidRequest("Failed to read body".into())
        })?;

    state
        .control_point
        .handle_notify(&sid, seq, &String::from_utf8_lossy(&body_bytes))?;

    log::debug!("[GENA] NOTIFY from {} (SEQ: {:?})", sid, seq);
    Ok(StatusCode::OK)
}
