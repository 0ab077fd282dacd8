//! Compact (ONNX) model runtime
//!
//! Loads the mobile-oriented artifact with `tract-onnx`: the graph is parsed,
//! its first input pinned to `f32[1, 224, 224, 3]`, optimized and turned into
//! a runnable plan whose buffers are sized once at load time.

use std::path::Path;
use std::sync::Mutex;

use tract_onnx::prelude::*;

use crate::inference::normalizer::ImageTensor;
use crate::utils::error::{DermaError, Result, ResultExt};
use crate::INPUT_SIZE;

type CompactPlan = TypedRunnableModel<TypedModel>;

/// A loaded compact interpreter
pub struct CompactModel {
    plan: Mutex<CompactPlan>,
    num_inputs: usize,
    num_outputs: usize,
}

impl std::fmt::Debug for CompactModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactModel")
            .field("num_inputs", &self.num_inputs)
            .field("num_outputs", &self.num_outputs)
            .finish()
    }
}

impl CompactModel {
    /// Parse an ONNX file and build its plan
    pub fn load(path: &Path) -> Result<Self> {
        // Called through the trait: the tract prelude brings its own `context`.
        let model = ResultExt::with_context(tract_onnx::onnx().model_for_path(path), || {
            format!("failed to parse {}", path.display())
        })?;
        Self::from_model(model)
    }

    /// Pin the input shape, optimize and build the plan of a parsed graph
    pub(crate) fn from_model(model: InferenceModel) -> Result<Self> {
        let num_inputs = model.inputs.len();
        let num_outputs = model.outputs.len();
        if num_inputs == 0 || num_outputs == 0 {
            return Err(DermaError::Model(format!(
                "compact model declares {} inputs and {} outputs",
                num_inputs, num_outputs
            )));
        }

        let pinned = ResultExt::context(
            model.with_input_fact(
                0,
                f32::fact([1, INPUT_SIZE, INPUT_SIZE, ImageTensor::CHANNELS]).into(),
            ),
            "failed to pin input shape",
        )?;
        let optimized =
            ResultExt::context(pinned.into_optimized(), "failed to optimize compact model")?;
        let plan = ResultExt::context(optimized.into_runnable(), "failed to build compact plan")?;

        Ok(Self {
            plan: Mutex::new(plan),
            num_inputs,
            num_outputs,
        })
    }

    /// Bind the tensor to input 0, run, and read back the first row of output 0
    pub fn run(&self, input: &ImageTensor) -> Result<Vec<f32>> {
        let tensor = Tensor::from_shape(&input.shape(), input.as_slice())
            .map_err(|e| DermaError::Inference(e.to_string()))?;

        let plan = self
            .plan
            .lock()
            .map_err(|_| DermaError::Inference("compact interpreter lock poisoned".to_string()))?;
        let outputs = plan
            .run(tvec!(tensor.into()))
            .map_err(|e| DermaError::Inference(e.to_string()))?;
        drop(plan);

        let output = outputs
            .first()
            .ok_or_else(|| DermaError::Inference("compact model produced no output".to_string()))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| DermaError::Inference(e.to_string()))?;

        let batch = view.shape().first().copied().unwrap_or(1).max(1);
        let row_len = view.len() / batch;
        Ok(view.iter().take(row_len).copied().collect())
    }

    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::adapter::{run_timed, DemoPredictor, InferenceMode};
    use crate::model::test_support::compact_mean_sigmoid_model;
    use crate::model::BackendHandle;

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = CompactModel::load(&dir.path().join("absent.onnx")).unwrap_err();
        assert!(matches!(err, DermaError::Model(_)));
    }

    #[test]
    fn test_runs_and_reads_back_one_row() {
        let model = compact_mean_sigmoid_model();
        assert_eq!(model.num_inputs(), 1);
        assert_eq!(model.num_outputs(), 1);

        let ones = ImageTensor::from_nhwc(vec![1.0; 224 * 224 * 3], 224, 224).unwrap();
        let output = model.run(&ones).unwrap();
        assert_eq!(output.len(), 1);
        assert!((output[0] - 0.731_058_6).abs() < 1e-4);

        let zeros = ImageTensor::from_nhwc(vec![0.0; 224 * 224 * 3], 224, 224).unwrap();
        assert!((model.run(&zeros).unwrap()[0] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_compact_handle_reports_compact_mode() {
        let handle = BackendHandle::compact(compact_mean_sigmoid_model());
        let ones = ImageTensor::from_nhwc(vec![1.0; 224 * 224 * 3], 224, 224).unwrap();

        let output = run_timed(&handle, &ones, &DemoPredictor::seeded(1)).unwrap();
        assert_eq!(output.mode, InferenceMode::ProductionCompact);
        assert_eq!(output.vector.len(), 1);
        assert!(handle.describe().contains("compact"));
    }

    #[test]
    fn test_load_garbage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.onnx");
        std::fs::write(&path, b"this is not a protobuf model").unwrap();
        let err = CompactModel::load(&path).unwrap_err();
        assert!(matches!(err, DermaError::Model(_)));
        assert!(err.to_string().contains("failed to parse"));
    }
}
