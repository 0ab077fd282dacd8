//! Prediction service
//!
//! Runs the full pipeline for one upload: normalize, resolve the backend,
//! infer (or draw a demo probability) and classify. Shared by the HTTP layer
//! and the CLI.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ModelConfig;
use crate::inference::adapter::{run_timed, DemoPredictor, InferenceMode, TimedOutput};
use crate::inference::classifier::{classify, ClassProbabilities, ConfidenceBand, LesionClass};
use crate::inference::normalizer::{normalize, ImageTensor};
use crate::model::fetch::HttpFetcher;
use crate::model::resolver::{FsBackendLoader, ModelResolver};
use crate::model::BackendHandle;
use crate::utils::error::{DermaError, Result};

/// Result of a single prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub predicted_class: LesionClass,

    /// 0 for Benign, 1 for Malignant
    pub class_index: usize,

    /// Probability of the predicted class
    pub confidence: f32,

    pub confidence_band: ConfidenceBand,

    /// Benign and Malignant probabilities; they sum to one
    pub probabilities: ClassProbabilities,

    /// Wall-clock time of the inference call (or the demo draw)
    pub inference_time_ms: f64,

    pub mode: InferenceMode,
}

impl PredictionResult {
    /// Classify a timed raw output
    pub fn from_output(output: &TimedOutput) -> Result<Self> {
        let classification = classify(&output.vector)?;
        Ok(Self {
            predicted_class: classification.predicted_class,
            class_index: classification.class_index,
            confidence: classification.confidence,
            confidence_band: classification.confidence_band,
            probabilities: classification.probabilities,
            inference_time_ms: output.inference_time_ms(),
            mode: output.mode,
        })
    }

    /// Check whether the prediction falls in the high confidence band
    pub fn is_high_confidence(&self) -> bool {
        self.confidence_band == ConfidenceBand::High
    }
}

/// Owns the resolver and the demo predictor
#[derive(Debug)]
pub struct Predictor {
    resolver: Arc<ModelResolver>,
    demo: Arc<DemoPredictor>,
}

impl Predictor {
    pub fn new(resolver: Arc<ModelResolver>, demo: DemoPredictor) -> Self {
        Self {
            resolver,
            demo: Arc::new(demo),
        }
    }

    /// Predictor backed by the filesystem and the HTTP fetcher
    pub fn from_config(config: ModelConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(Duration::from_secs(config.download_timeout_secs))?;
        let resolver = ModelResolver::new(
            config,
            Arc::new(FsBackendLoader::default()),
            Arc::new(fetcher),
        );
        Ok(Self::new(Arc::new(resolver), DemoPredictor::default()))
    }

    pub fn resolver(&self) -> &Arc<ModelResolver> {
        &self.resolver
    }

    /// Resolve the backend without predicting
    pub async fn warm_up(&self) -> BackendHandle {
        self.resolver.resolve().await
    }

    /// Run the full pipeline on raw image bytes
    pub async fn predict(&self, bytes: Vec<u8>) -> Result<PredictionResult> {
        let tensor = blocking(move || normalize(&bytes)).await?;
        debug!("Normalized upload to {:?}", tensor.shape());

        let handle = self.resolver.resolve().await;
        self.predict_tensor(handle, tensor).await
    }

    /// Infer and classify an already normalized tensor with a given backend
    pub async fn predict_tensor(
        &self,
        handle: BackendHandle,
        tensor: ImageTensor,
    ) -> Result<PredictionResult> {
        let demo = Arc::clone(&self.demo);
        let output = blocking(move || run_timed(&handle, &tensor, &demo)).await?;
        let result = PredictionResult::from_output(&output)?;

        info!(
            "Prediction: {} ({:.1}%, {}) in {:.2}ms [{}]",
            result.predicted_class,
            result.confidence * 100.0,
            result.confidence_band,
            result.inference_time_ms,
            result.mode
        );
        Ok(result)
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DermaError::Inference(format!("worker task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

    use super::*;
    use crate::model::test_support::constant_graph_writer;

    fn png_bytes() -> Vec<u8> {
        let img = RgbImage::from_fn(32, 32, |x, y| Rgb([(x * 8) as u8, (y * 8) as u8, 90]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn predictor_in(dir: &std::path::Path) -> Predictor {
        let config = ModelConfig::in_dir(dir).with_download_url(None);
        let resolver = ModelResolver::new(
            config,
            Arc::new(FsBackendLoader::default()),
            Arc::new(HttpFetcher::new(Duration::from_secs(1)).unwrap()),
        );
        Predictor::new(Arc::new(resolver), DemoPredictor::seeded(3))
    }

    #[tokio::test]
    async fn test_demo_mode_without_models() {
        let dir = tempfile::tempdir().unwrap();
        let predictor = predictor_in(dir.path());

        for _ in 0..5 {
            let result = predictor.predict(png_bytes()).await.unwrap();
            assert_eq!(result.mode, InferenceMode::Demo);
            let sum = result.probabilities.benign + result.probabilities.malignant;
            assert!((sum - 1.0).abs() < 1e-6);
            assert_eq!(result.class_index, result.predicted_class.index());
            assert_eq!(result.confidence, result.probabilities.of(result.predicted_class));
        }
    }

    #[tokio::test]
    async fn test_graph_mode_with_model() {
        let dir = tempfile::tempdir().unwrap();
        constant_graph_writer(0.9)
            .write_to(&dir.path().join(crate::config::GRAPH_MODEL_FILE))
            .unwrap();
        let predictor = predictor_in(dir.path());

        let result = predictor.predict(png_bytes()).await.unwrap();
        assert_eq!(result.mode, InferenceMode::ProductionGraph);
        assert_eq!(result.predicted_class, LesionClass::Malignant);
        assert_eq!(result.confidence_band, ConfidenceBand::High);
        assert!(result.is_high_confidence());
        assert!((result.confidence - 0.9).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_malformed_upload_is_client_error() {
        let dir = tempfile::tempdir().unwrap();
        let predictor = predictor_in(dir.path());

        let err = predictor.predict(b"GIF89a garbage".to_vec()).await.unwrap_err();
        assert!(matches!(err, DermaError::Preprocessing(_)));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_bad_upload_does_not_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let predictor = predictor_in(dir.path());

        let _ = predictor.predict(Vec::new()).await;
        assert_eq!(
            predictor.resolver().state(),
            crate::model::ResolverState::NotAttempted
        );
    }
}
