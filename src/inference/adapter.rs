//! Inference Adapter
//!
//! One call site for both runtimes. A loaded backend produces a raw probability
//! vector; an unavailable one hands over to the demo predictor. Either way the
//! wall-clock time of the call is measured.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::inference::normalizer::ImageTensor;
use crate::model::BackendHandle;
use crate::utils::error::{DermaError, Result};
use crate::utils::round_to;

/// Which path produced a prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InferenceMode {
    ProductionCompact,
    ProductionGraph,
    Demo,
}

impl InferenceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InferenceMode::ProductionCompact => "production-compact",
            InferenceMode::ProductionGraph => "production-graph",
            InferenceMode::Demo => "demo",
        }
    }
}

impl std::fmt::Display for InferenceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the raw inference step
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceOutcome {
    Vector(Vec<f32>),
    DemoMode,
}

/// Run the backend behind `handle`, or report that demo mode applies
pub fn infer(handle: &BackendHandle, tensor: &ImageTensor) -> Result<InferenceOutcome> {
    match handle.backend() {
        Some(backend) => backend.infer(tensor).map(InferenceOutcome::Vector),
        None => Ok(InferenceOutcome::DemoMode),
    }
}

/// Synthetic predictor used when no model is available
///
/// Draws P(Malignant) uniformly from `[0, 1]`, rounded to four decimals.
#[derive(Debug)]
pub struct DemoPredictor {
    rng: Mutex<StdRng>,
}

impl Default for DemoPredictor {
    fn default() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }
}

impl DemoPredictor {
    /// Deterministic draws for tests and reproducible demos
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn draw(&self) -> Result<f32> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| DermaError::Inference("demo generator lock poisoned".to_string()))?;
        let p: f64 = rng.gen_range(0.0..=1.0);
        Ok(round_to(p, 4) as f32)
    }
}

/// Raw output of one timed inference
#[derive(Debug, Clone, PartialEq)]
pub struct TimedOutput {
    pub vector: Vec<f32>,
    pub mode: InferenceMode,
    pub elapsed: Duration,
}

impl TimedOutput {
    pub fn inference_time_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }
}

/// Infer with the loaded backend or draw a demo probability, timing either one
///
/// Backend failures are returned as errors and never replaced by a demo draw.
pub fn run_timed(
    handle: &BackendHandle,
    tensor: &ImageTensor,
    demo: &DemoPredictor,
) -> Result<TimedOutput> {
    let start = Instant::now();
    let (vector, mode) = match infer(handle, tensor)? {
        InferenceOutcome::Vector(vector) => (vector, handle.mode()),
        InferenceOutcome::DemoMode => (vec![demo.draw()?], InferenceMode::Demo),
    };
    Ok(TimedOutput {
        vector,
        mode,
        elapsed: start.elapsed(),
    })
}
