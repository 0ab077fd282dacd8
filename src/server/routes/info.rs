//! API and model information endpoint

use std::collections::BTreeMap;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::inference::classifier::{HIGH_CONFIDENCE_THRESHOLD, MEDIUM_CONFIDENCE_THRESHOLD};
use crate::model::ResolverState;
use crate::server::state::SharedState;
use crate::utils::round_to;
use crate::{CLASS_NAMES, DISCLAIMER, INPUT_SIZE, VERSION};

#[derive(Debug, Serialize)]
pub struct ConfidenceThresholds {
    #[serde(rename = "High")]
    pub high: f64,
    #[serde(rename = "Medium")]
    pub medium: f64,
    #[serde(rename = "Low")]
    pub low: f64,
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub app_name: String,
    pub version: String,
    pub description: String,
    pub model_input_size: usize,
    pub classes: BTreeMap<String, String>,
    pub confidence_thresholds: ConfidenceThresholds,
    pub model_type: String,
    pub model_loaded: bool,
    pub resolver_state: ResolverState,
    pub disclaimer: String,
}

fn model_type(state: ResolverState) -> &'static str {
    match state {
        ResolverState::LoadedCompact => "ONNX (compact)",
        ResolverState::LoadedGraph => "Graph (Burn)",
        ResolverState::Unavailable => "demo",
        ResolverState::NotAttempted | ResolverState::Attempting => "not_loaded",
    }
}

/// GET /info - Static API facts plus the current model state
pub async fn get_info(State(state): State<SharedState>) -> Json<InfoResponse> {
    let resolver_state = state.model_state();
    let classes = CLASS_NAMES
        .iter()
        .enumerate()
        .map(|(i, name)| (i.to_string(), name.to_string()))
        .collect();

    Json(InfoResponse {
        app_name: "DermaVision".to_string(),
        version: VERSION.to_string(),
        description: "Binary Skin Lesion Classifier (Benign vs Malignant)".to_string(),
        model_input_size: INPUT_SIZE,
        classes,
        confidence_thresholds: ConfidenceThresholds {
            high: round_to(HIGH_CONFIDENCE_THRESHOLD as f64, 2),
            medium: round_to(MEDIUM_CONFIDENCE_THRESHOLD as f64, 2),
            low: 0.0,
        },
        model_type: model_type(resolver_state).to_string(),
        model_loaded: state.model_loaded(),
        resolver_state,
        disclaimer: DISCLAIMER.to_string(),
    })
}
