//! # DermaVision
//!
//! Serves a binary skin-lesion classifier (benign vs malignant) over HTTP.
//!
//! An uploaded image is normalized to a `[1, 224, 224, 3]` tensor, run through
//! whichever pretrained model the process could load (a compact ONNX artifact
//! or a graph artifact interpreted with Burn), and the raw output is turned
//! into a class, a confidence score and a confidence band. Without any usable
//! model the service keeps answering in demo mode.
//!
//! ## Modules
//!
//! - `inference`: Normalization, the inference adapter, output classification and the [`Predictor`]
//! - `model`: Artifact formats, both runtimes and the process-wide [`ModelResolver`]
//! - `server`: Axum router and handlers
//! - `config`: Server and model configuration
//! - `utils`: Logging, errors and formatting helpers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dermavision::{ModelConfig, Predictor};
//!
//! let predictor = Predictor::from_config(ModelConfig::default())?;
//! let result = predictor.predict(std::fs::read("lesion.jpg")?).await?;
//! println!("{} ({:.1}%)", result.predicted_class, result.confidence * 100.0);
//! ```

pub mod backend;
pub mod config;
pub mod inference;
pub mod model;
pub mod server;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::{ModelConfig, ServerConfig};
pub use inference::{
    classify, normalize, ConfidenceBand, DemoPredictor, ImageTensor, InferenceMode, LesionClass,
    PredictionResult, Predictor,
};
pub use model::{BackendHandle, ModelResolver, ResolverState};
pub use server::create_router;
pub use utils::error::{DermaError, Result};

/// Side length of the square model input
pub const INPUT_SIZE: usize = 224;

/// Class names by output index
pub const CLASS_NAMES: [&str; 2] = ["Benign", "Malignant"];

/// Name reported by the HTTP service
pub const APP_NAME: &str = "DermaVision API";

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Attached to every prediction
pub const DISCLAIMER: &str = "⚠️ RESEARCH & EDUCATIONAL TOOL ONLY\n\
DermaVision is NOT a medical device and cannot be used for medical diagnosis or treatment decisions.\n\
Results are ML model predictions, NOT medical advice.\n\
Always consult a qualified dermatologist for skin concerns.";

/// Upload content types accepted by `/predict`
pub const ACCEPTED_CONTENT_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];
