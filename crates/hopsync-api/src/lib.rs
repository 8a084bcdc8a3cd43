pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/status", get(handlers::handle_status))
        .route("/peers", get(handlers::handle_peers))
        .route("/peers/{addr}", get(handlers::handle_peer))
        .route("/enable", post(handlers::handle_enable))
        .route("/cleanup", post(handlers::handle_cleanup))
        .route("/events/peers", post(handlers::handle_peers_changed))
        .route("/events/connectivity", post(handlers::handle_connectivity))
        .route("/events/connect-failed", post(handlers::handle_connect_failed))
        .route("/probe", post(handlers::handle_probe))
        .route(
            "/routes",
            get(handlers::handle_routes).post(handlers::handle_route_create),
        )
        .route("/routes/remove", post(handlers::handle_route_remove))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

pub async fn serve(state: ApiState, port: u16) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "API listening on 127.0.0.1");
    axum::serve(listener, app).await?;
    Ok(())
}
