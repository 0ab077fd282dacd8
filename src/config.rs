//! Server and model configuration
//!
//! Defaults describe the stock deployment layout (`models/` next to the
//! working directory). The CLI overrides individual fields.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::utils::error::{DermaError, Result};

/// File name of the compact (ONNX) artifact
pub const COMPACT_MODEL_FILE: &str = "skin_cancer_cnn.onnx";

/// File name of the graph artifact
pub const GRAPH_MODEL_FILE: &str = "skin_cancer_cnn.dvg";

/// Published location of the full graph artifact, used when the local copy is a pointer file
pub const DEFAULT_MODEL_DOWNLOAD_URL: &str =
    "https://github.com/sa1165/DermaVision-AI-Skin-Cancer-Prediction-/raw/main/models/skin_cancer_cnn.dvg";

/// Where model artifacts live and how to fetch a missing graph artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Directory containing model artifacts
    pub models_dir: PathBuf,
    /// Path to the compact artifact (tried first)
    pub compact_path: PathBuf,
    /// Path to the graph artifact (fallback)
    pub graph_path: PathBuf,
    /// Remote location of the real graph artifact; `None` disables fetching
    pub download_url: Option<String>,
    /// Upper bound on the whole download, in seconds
    pub download_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::in_dir("models")
    }
}

impl ModelConfig {
    /// Configuration with both artifacts under `models_dir`
    pub fn in_dir(models_dir: impl Into<PathBuf>) -> Self {
        let models_dir = models_dir.into();
        Self {
            compact_path: models_dir.join(COMPACT_MODEL_FILE),
            graph_path: models_dir.join(GRAPH_MODEL_FILE),
            models_dir,
            download_url: Some(DEFAULT_MODEL_DOWNLOAD_URL.to_string()),
            download_timeout_secs: 300,
        }
    }

    /// Disable or replace the download URL
    pub fn with_download_url(mut self, url: Option<String>) -> Self {
        self.download_url = url;
        self
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Maximum accepted request body for uploads
    pub max_upload_bytes: usize,
    /// Model artifact configuration
    pub model: ModelConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_bytes: 10 * 1024 * 1024,
            model: ModelConfig::default(),
        }
    }
}

impl ServerConfig {
    /// `host:port` bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject values that cannot work at all
    pub fn validate(&self) -> Result<()> {
        if self.max_upload_bytes == 0 {
            return Err(DermaError::Config(
                "max_upload_bytes must be greater than zero".to_string(),
            ));
        }
        if self.model.download_timeout_secs == 0 {
            return Err(DermaError::Config(
                "download_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if let Some(url) = &self.model.download_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(DermaError::Config(format!(
                    "download_url must be an http(s) URL, got '{}'",
                    url
                )));
            }
        }
        Ok(())
    }
}
