use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};

use super::state::GatewayState;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "service": "meeting-relay",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

/// GET /sessions
/// Live sessions as the registry sees them.
pub async fn list_sessions(State(state): State<GatewayState>) -> impl IntoResponse {
    let sessions = state.registry.session_ids();
    Json(serde_json::json!({
        "count": sessions.len(),
        "connections": state.registry.total_connection_count(),
        "sessions": sessions,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextQuery {
    pub max_characters: Option<usize>,
    pub topic_id: Option<String>,
}

/// GET /sessions/:session_id/context
/// Assembled context window for downstream consumers.
pub async fn get_session_context(
    State(state): State<GatewayState>,
    Path(session_id): Path<String>,
    Query(query): Query<ContextQuery>,
) -> impl IntoResponse {
    let mut options = state.context.default_options();
    if let Some(max_characters) = query.max_characters {
        options.max_characters = max_characters;
    }
    options.topic_id = query.topic_id;

    match state.context.assemble(&session_id, &options) {
        Some(assembled) => (StatusCode::OK, Json(assembled)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("No context for session {}", session_id),
            }),
        )
            .into_response(),
    }
}
