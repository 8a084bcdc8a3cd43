//! /events handlers: platform notifications delivered by the daemon's
//! platform bridge.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use hopsync_services::{ConnectivityInfo, DeviceInfo, MembershipChange};

use super::ApiState;

// ── /events/peers (POST) ──────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct PeersChangedRequest {
    pub devices: Vec<DeviceInfo>,
}

pub async fn handle_peers_changed(
    State(state): State<ApiState>,
    Json(req): Json<PeersChangedRequest>,
) -> Json<MembershipChange> {
    Json(state.controller.on_peers_changed(req.devices).await)
}

// ── /events/connectivity (POST) ───────────────────────────────────────────────

pub async fn handle_connectivity(
    State(state): State<ApiState>,
    Json(info): Json<ConnectivityInfo>,
) -> String {
    state.controller.on_connectivity_changed(info).await;
    "OK".to_string()
}

// ── /events/connect-failed (POST) ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ConnectFailedRequest {
    pub link_addr: String,
}

#[derive(Serialize)]
pub struct ConnectFailedResponse {
    pub link_addr: String,
    pub removed: bool,
}

pub async fn handle_connect_failed(
    State(state): State<ApiState>,
    Json(req): Json<ConnectFailedRequest>,
) -> Json<ConnectFailedResponse> {
    let removed = state
        .controller
        .on_connect_failed(&req.link_addr)
        .await
        .is_some();
    Json(ConnectFailedResponse {
        link_addr: req.link_addr,
        removed,
    })
}
