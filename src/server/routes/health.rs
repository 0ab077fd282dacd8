//! Health check endpoint

use axum::{extract::State, Json};
use serde::Serialize;

use crate::server::state::SharedState;
use crate::{APP_NAME, VERSION};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    /// `loaded` once a model backend is resolved, `not_loaded` otherwise
    pub model: String,
    pub app: String,
    pub uptime_seconds: u64,
    pub version: String,
}

/// GET / and GET /health - Health check endpoint; never loads the model
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    let model = if state.model_loaded() {
        "loaded"
    } else {
        "not_loaded"
    };

    Json(HealthResponse {
        status: "running".to_string(),
        model: model.to_string(),
        app: APP_NAME.to_string(),
        uptime_seconds: state.uptime_seconds(),
        version: VERSION.to_string(),
    })
}
