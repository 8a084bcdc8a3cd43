//! /peers handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use hopsync_services::Peer;

use super::{parse_addr, ApiState};

// ── /peers ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct PeersResponse {
    pub peers: Vec<Peer>,
    pub members: usize,
}

pub async fn handle_peers(State(state): State<ApiState>) -> Json<PeersResponse> {
    Json(PeersResponse {
        peers: state.controller.peers().await,
        members: state.controller.member_count().await,
    })
}

// ── /peers/{addr} ─────────────────────────────────────────────────────────────

/// Look a peer up by network address, or by link-layer address when the
/// path is not an IP address.
pub async fn handle_peer(
    State(state): State<ApiState>,
    Path(addr): Path<String>,
) -> Result<Json<Peer>, (StatusCode, String)> {
    let peer = match parse_addr(&addr) {
        Ok(ip) => state.controller.peer_by_network_addr(&ip).await,
        Err(_) => state.controller.peer_by_link_addr(&addr).await,
    };
    peer.map(Json)
        .ok_or((StatusCode::NOT_FOUND, format!("no peer {addr}")))
}
