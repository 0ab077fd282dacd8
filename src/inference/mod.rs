//! Inference pipeline
//!
//! This module provides:
//! - Image normalization to the fixed model input
//! - A single call site over both model runtimes, with a demo fallback
//! - Interpretation of raw model outputs into classes and confidence bands
//! - The [`Predictor`] service tying them together

pub mod adapter;
pub mod classifier;
pub mod normalizer;
pub mod predictor;

// Re-export main types for convenience
pub use adapter::{infer, run_timed, DemoPredictor, InferenceMode, InferenceOutcome, TimedOutput};
pub use classifier::{
    classify, ClassProbabilities, Classification, ConfidenceBand, LesionClass,
    HIGH_CONFIDENCE_THRESHOLD, MEDIUM_CONFIDENCE_THRESHOLD,
};
pub use normalizer::{normalize, normalize_image, ImageTensor};
pub use predictor::{PredictionResult, Predictor};
