use super::handlers;
use super::state::GatewayState;
use super::ws;
use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: GatewayState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Session introspection
        .route("/sessions", get(handlers::list_sessions))
        .route(
            "/sessions/:session_id/context",
            get(handlers::get_session_context),
        )
        // Duplex audio ingress
        .route("/ws/:session_id", get(ws::ws_handler))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
