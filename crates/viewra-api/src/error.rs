//! HTTP error mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use viewra_core::PlaybackError;

/// Wrapper mapping playback errors onto HTTP responses
#[derive(Debug)]
pub struct ApiError(pub PlaybackError);

impl From<PlaybackError> for ApiError {
    fn from(err: PlaybackError) -> Self {
        Self(err)
    }
}

impl ApiError {
    /// Status code for a playback error kind
    pub fn status(&self) -> StatusCode {
        match self.0.kind() {
            "BAD_REQUEST" | "UNSUPPORTED_SOURCE" | "PROBE_INCOMPLETE" => StatusCode::BAD_REQUEST,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "DUPLICATE_SESSION" | "BAD_STATE" => StatusCode::CONFLICT,
            "AT_CAPACITY" => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
            "status": status.as_u16(),
        }));
        (status, body).into_response()
    }
}
