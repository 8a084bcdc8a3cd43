//! HTTP API handlers: the operator and platform surface of the daemon.

pub mod control;
pub mod events;
pub mod peers;
pub mod probe;
pub mod routes;

use std::net::IpAddr;
use std::sync::Arc;

use axum::http::StatusCode;

use hopsync_services::{Controller, TransportKind};

#[derive(Clone)]
pub struct ApiState {
    pub controller: Arc<Controller>,
    /// Transport kind for endpoints created through `/routes`.
    pub transport: TransportKind,
}

// ── Shared helpers ────────────────────────────────────────────────────────────

fn parse_addr(text: &str) -> Result<IpAddr, (StatusCode, String)> {
    text.parse()
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("invalid address: {text}")))
}

// Re-export handler functions for use in router setup.
pub use control::{handle_cleanup, handle_enable, handle_status};
pub use events::{handle_connect_failed, handle_connectivity, handle_peers_changed};
pub use peers::{handle_peer, handle_peers};
pub use probe::handle_probe;
pub use routes::{handle_route_create, handle_route_remove, handle_routes};
