//! API route definitions

use crate::handlers::{PlaybackHandler, StreamHandler};
use crate::state::AppState;
use axum::http::Method;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Decision
        .route("/playback/decide", post(PlaybackHandler::decide))
        // Session lifecycle
        .route("/playback/start", post(PlaybackHandler::start))
        .route("/playback/sessions", get(PlaybackHandler::list_sessions))
        .route(
            "/playback/session/:id",
            get(PlaybackHandler::get_session).delete(PlaybackHandler::stop_session),
        )
        // Streaming (HEAD requests are routed to the GET handlers)
        .route("/playback/stream/:id", get(StreamHandler::stream))
        .route("/playback/stream/:id/:file", get(StreamHandler::stream_file))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint reporting capacity
async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<serde_json::Value> {
    let active = state.transcoder.manager().active_count().await;
    Json(json!({
        "status": "ok",
        "active_sessions": active,
        "max_concurrent": state.config.transcoding.max_concurrent,
    }))
}
