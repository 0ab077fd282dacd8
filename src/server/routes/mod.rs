//! HTTP handlers and the error response shared by them

pub mod health;
pub mod info;
pub mod predict;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

use crate::utils::error::DermaError;

/// Body of every error response
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub detail: String,
}

/// A pipeline error on its way out of a handler
#[derive(Debug)]
pub struct ApiError(pub DermaError);

impl From<DermaError> for ApiError {
    fn from(err: DermaError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Rejected request: {}", self.0);
        }

        let body = ErrorBody {
            error: self.0.kind().to_string(),
            detail: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError(DermaError::Preprocessing("bad".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(DermaError::UnsupportedMediaType("text/plain".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(DermaError::Inference("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError(DermaError::UnsupportedOutputShape(5)).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
