//! Prediction endpoint

use axum::{
    extract::{Multipart, State},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use crate::inference::{ConfidenceBand, InferenceMode, LesionClass, PredictionResult};
use crate::server::routes::ApiError;
use crate::server::state::SharedState;
use crate::utils::error::DermaError;
use crate::utils::round_to;
use crate::{ACCEPTED_CONTENT_TYPES, DISCLAIMER};

/// Multipart field carrying the image
const FILE_FIELD: &str = "file";

#[derive(Debug, Clone, Serialize)]
pub struct RoundedProbabilities {
    #[serde(rename = "Benign")]
    pub benign: f64,
    #[serde(rename = "Malignant")]
    pub malignant: f64,
}

/// Flat prediction record returned to clients
#[derive(Debug, Clone, Serialize)]
pub struct PredictResponse {
    pub predicted_class: LesionClass,
    pub class_index: usize,
    pub confidence: f64,
    pub confidence_percentage: f64,
    pub confidence_band: ConfidenceBand,
    pub probabilities: RoundedProbabilities,
    pub inference_time_ms: f64,
    pub disclaimer: String,
    pub mode: InferenceMode,
    /// Unix time of the response, in seconds
    pub timestamp: f64,
}

impl PredictResponse {
    pub fn from_result(result: &PredictionResult) -> Self {
        let confidence = result.confidence as f64;
        Self {
            predicted_class: result.predicted_class,
            class_index: result.class_index,
            confidence: round_to(confidence, 4),
            confidence_percentage: round_to(confidence * 100.0, 2),
            confidence_band: result.confidence_band,
            probabilities: RoundedProbabilities {
                benign: round_to(result.probabilities.benign as f64, 4),
                malignant: round_to(result.probabilities.malignant as f64, 4),
            },
            inference_time_ms: round_to(result.inference_time_ms, 2),
            disclaimer: DISCLAIMER.to_string(),
            mode: result.mode,
            timestamp: Utc::now().timestamp_micros() as f64 / 1_000_000.0,
        }
    }
}

/// Whether a declared content type is one of the accepted image types
pub fn is_accepted_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    ACCEPTED_CONTENT_TYPES.contains(&essence.as_str())
}

/// Pull the image bytes out of the `file` field, checking its content type first
async fn read_upload(multipart: &mut Multipart) -> Result<Vec<u8>, DermaError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DermaError::InvalidUpload(e.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let content_type = field.content_type().unwrap_or("").to_string();
        if !is_accepted_content_type(&content_type) {
            return Err(DermaError::UnsupportedMediaType(content_type));
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| DermaError::InvalidUpload(e.body_text()))?;
        debug!("Received {} bytes of {}", bytes.len(), content_type);
        return Ok(bytes.to_vec());
    }

    Err(DermaError::InvalidUpload(format!(
        "missing multipart field '{}'",
        FILE_FIELD
    )))
}

/// POST /predict - Classify an uploaded skin lesion image
pub async fn predict(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<PredictResponse>, ApiError> {
    let span = info_span!("predict", request_id = %Uuid::new_v4());
    async move {
        let bytes = read_upload(&mut multipart).await?;
        let result = state.predictor.predict(bytes).await?;
        Ok(Json(PredictResponse::from_result(&result)))
    }
    .instrument(span)
    .await
}
