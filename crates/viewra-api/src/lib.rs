//! # Viewra API
//!
//! REST API layer for the playback stack: decision, session lifecycle, and
//! streaming endpoints.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

// Re-export commonly used types
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;

use axum::Router;

/// API service for handling HTTP requests
#[derive(Clone)]
pub struct ApiService {
    router: Router,
}

impl ApiService {
    /// Create a new API service over the shared application state
    pub fn new(state: AppState) -> Self {
        Self {
            router: create_router(state),
        }
    }

    /// Get the router
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}
