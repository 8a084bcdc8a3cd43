//! /routes handlers for forwarding table administration.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use hopsync_core::wire::EndpointId;
use hopsync_services::{FibEntry, TransportKind};

use super::{parse_addr, ApiState};

// ── /routes (GET) ─────────────────────────────────────────────────────────────

pub async fn handle_routes(
    State(state): State<ApiState>,
) -> Result<Json<Vec<FibEntry>>, (StatusCode, String)> {
    state
        .controller
        .routes()
        .list()
        .await
        .map(Json)
        .map_err(|e| (StatusCode::BAD_GATEWAY, e))
}

// ── /routes (POST) ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RouteCreateRequest {
    pub prefix: String,
    pub addr: String,
    /// Overrides the configured transport kind, e.g. "tcp4".
    #[serde(default)]
    pub transport: Option<String>,
}

pub async fn handle_route_create(
    State(state): State<ApiState>,
    Json(req): Json<RouteCreateRequest>,
) -> Result<String, (StatusCode, String)> {
    let remote = parse_addr(&req.addr)?;
    let kind = match &req.transport {
        Some(text) => text
            .parse::<TransportKind>()
            .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?,
        None => state.transport,
    };
    state
        .controller
        .routes()
        .create(req.prefix, remote, kind)
        .await
        .map_err(|e| (StatusCode::BAD_GATEWAY, e))?;
    Ok("OK".to_string())
}

// ── /routes/remove (POST) ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RouteRemoveRequest {
    pub prefix: String,
    pub endpoints: Vec<EndpointId>,
}

pub async fn handle_route_remove(
    State(state): State<ApiState>,
    Json(req): Json<RouteRemoveRequest>,
) -> Result<String, (StatusCode, String)> {
    state
        .controller
        .routes()
        .remove(req.prefix, req.endpoints)
        .await
        .map_err(|e| (StatusCode::BAD_GATEWAY, e))?;
    Ok("OK".to_string())
}
