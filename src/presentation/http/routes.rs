//! Route Configuration
//!
//! Configures all HTTP routes, including the chat upgrade endpoint.

use axum::{middleware, response::IntoResponse, routing::get, Router};

use super::handlers;
use crate::infrastructure::metrics;
use crate::presentation::middleware::auth_middleware;
use crate::presentation::websocket::ws_handler;
use crate::startup::AppState;

/// Create the main router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/ws", websocket_routes(state.clone()))
        // Health check endpoints
        .route("/health", get(handlers::health::health_check))
        .route("/health/live", get(handlers::health::liveness))
        .route("/health/ready", get(handlers::health::readiness))
        // Prometheus metrics endpoint
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Prometheus metrics endpoint handler
async fn metrics_handler() -> impl IntoResponse {
    let metrics = metrics::gather_metrics();
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics,
    )
}

/// Chat upgrade routes (authenticated)
fn websocket_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/chats/{chat_id}", get(ws_handler))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}
