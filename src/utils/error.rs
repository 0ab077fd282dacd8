//! Error Handling Module
//!
//! Defines the error type shared by the normalizer, the model resolver, the
//! inference adapter and the HTTP layer. Uses thiserror for ergonomic error
//! definitions.

use thiserror::Error;

/// Main error type for DermaVision operations
#[derive(Error, Debug)]
pub enum DermaError {
    /// The uploaded bytes could not be decoded, converted or resized
    #[error("Image preprocessing failed: {0}")]
    Preprocessing(String),

    /// A loaded backend failed while running a forward pass
    #[error("Inference failed: {0}")]
    Inference(String),

    /// The model produced a vector that is neither one nor two values long
    #[error("Unsupported model output shape: expected 1 or 2 values, got {0}")]
    UnsupportedOutputShape(usize),

    /// A model artifact could not be parsed or constructed
    #[error("Model error: {0}")]
    Model(String),

    /// The real graph artifact could not be fetched
    #[error("Download error: {0}")]
    Download(String),

    /// Upload rejected before reaching the pipeline
    #[error("Invalid file type '{0}'. Please upload JPG, PNG, or WebP.")]
    UnsupportedMediaType(String),

    /// Malformed multipart request
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DermaError {
    /// Whether the failure is the caller's fault (reported as 4xx)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DermaError::Preprocessing(_)
                | DermaError::UnsupportedMediaType(_)
                | DermaError::InvalidUpload(_)
        )
    }

    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            DermaError::Preprocessing(_) => "preprocessing_error",
            DermaError::Inference(_) => "inference_error",
            DermaError::UnsupportedOutputShape(_) => "unsupported_output_shape",
            DermaError::Model(_) => "model_error",
            DermaError::Download(_) => "download_error",
            DermaError::UnsupportedMediaType(_) => "unsupported_media_type",
            DermaError::InvalidUpload(_) => "invalid_upload",
            DermaError::Config(_) => "config_error",
            DermaError::Io(_) => "io_error",
            DermaError::Serialization(_) => "serialization_error",
        }
    }
}

impl From<serde_json::Error> for DermaError {
    fn from(err: serde_json::Error) -> Self {
        DermaError::Serialization(err.to_string())
    }
}

/// Convenience Result type for DermaVision operations
pub type Result<T> = std::result::Result<T, DermaError>;

/// Extension trait for attaching model-loading context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| DermaError::Model(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| DermaError::Model(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| DermaError::Model(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| DermaError::Model(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DermaError::Preprocessing("bad header".to_string());
        assert_eq!(format!("{}", err), "Image preprocessing failed: bad header");

        let err = DermaError::UnsupportedOutputShape(3);
        assert!(err.to_string().contains("got 3"));
    }

    #[test]
    fn test_client_errors() {
        assert!(DermaError::Preprocessing("x".into()).is_client_error());
        assert!(DermaError::UnsupportedMediaType("text/plain".into()).is_client_error());
        assert!(DermaError::InvalidUpload("no file".into()).is_client_error());
        assert!(!DermaError::Inference("x".into()).is_client_error());
        assert!(!DermaError::UnsupportedOutputShape(0).is_client_error());
    }

    #[test]
    fn test_result_context() {
        let result: std::result::Result<i32, std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"));

        let err = result.context("Failed to read artifact").unwrap_err();
        assert!(matches!(err, DermaError::Model(_)));
        assert!(err.to_string().contains("Failed to read artifact: file not found"));
    }

    #[test]
    fn test_option_context() {
        let opt: Option<i32> = None;
        let err = opt.with_context(|| format!("missing tensor {}", "conv1/kernel")).unwrap_err();
        assert!(err.to_string().contains("conv1/kernel"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: DermaError = io_err.into();
        assert!(matches!(err, DermaError::Io(_)));
        assert_eq!(err.kind(), "io_error");
    }
}
