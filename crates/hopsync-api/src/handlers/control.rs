//! /status, /enable, /cleanup handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use hopsync_services::ControllerStatus;

use super::ApiState;

// ── /status ──────────────────────────────────────────────────────────────────

pub async fn handle_status(State(state): State<ApiState>) -> Json<ControllerStatus> {
    Json(state.controller.status().await)
}

// ── /enable (POST) ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct EnableRequest {
    pub enabled: bool,
}

pub async fn handle_enable(
    State(state): State<ApiState>,
    Json(req): Json<EnableRequest>,
) -> Result<String, (StatusCode, String)> {
    state
        .controller
        .set_enabled(req.enabled)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    tracing::info!(enabled = req.enabled, "toggle changed via API");
    Ok("OK".to_string())
}

// ── /cleanup (POST) ───────────────────────────────────────────────────────────

pub async fn handle_cleanup(State(state): State<ApiState>) -> String {
    state.controller.clean_up().await;
    "OK".to_string()
}
