//! /probe handler, the producer side of the probe exchange.
//!
//! The request body is the probe name in URI form; the response body is the
//! encoded advertisement, ready to be published as the reply payload.

use axum::extract::State;
use axum::http::{header, StatusCode};

use hopsync_services::ResponderError;

use super::ApiState;

pub async fn handle_probe(
    State(state): State<ApiState>,
    name: String,
) -> Result<([(header::HeaderName, &'static str); 1], String), (StatusCode, String)> {
    let name = name.trim();
    match state.controller.respond(name).await {
        Ok(payload) => Ok(([(header::CONTENT_TYPE, "text/plain")], payload)),
        Err(e) => {
            let status = match &e {
                ResponderError::Wire(_) | ResponderError::NotForUs(_) => StatusCode::BAD_REQUEST,
                ResponderError::NoAddress => StatusCode::SERVICE_UNAVAILABLE,
                ResponderError::Gateway(_) => StatusCode::BAD_GATEWAY,
            };
            tracing::debug!(name, error = %e, "probe rejected");
            Err((status, e.to_string()))
        }
    }
}
