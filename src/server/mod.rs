//! HTTP API
//!
//! - `GET /`, `GET /health`: liveness and model state
//! - `GET /info`: API and model information
//! - `POST /predict`: multipart image upload, returns a prediction

pub mod routes;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::{AppState, SharedState};

/// Build the router with CORS, request tracing and the upload limit
pub fn create_router(state: SharedState) -> Router {
    let max_upload_bytes = state.config.max_upload_bytes;

    Router::new()
        // Health check
        .route("/", get(routes::health::health_check))
        .route("/health", get(routes::health::health_check))

        // Info
        .route("/info", get(routes::info::get_info))

        // Prediction
        .route("/predict", post(routes::predict::predict))

        // Add state
        .with_state(state)

        // Add middleware
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
