//! Model artifacts and runtimes
//!
//! Two runtimes can serve predictions:
//! - [`CompactModel`]: ONNX artifact executed by `tract`
//! - [`GraphModel`]: layer description plus weights, interpreted with Burn
//!
//! [`ModelResolver`] picks at most one of them per process.

pub mod compact;
pub mod container;
pub mod fetch;
pub mod graph;
pub mod resolver;
pub mod shims;

use std::sync::{Arc, Mutex};

use burn::tensor::backend::Backend;

use crate::backend::GraphBackend;
use crate::inference::adapter::InferenceMode;
use crate::inference::normalizer::ImageTensor;
use crate::utils::error::{DermaError, Result};

pub use compact::CompactModel;
pub use container::{GraphArtifact, GraphArtifactWriter};
pub use fetch::{is_pointer_file, ArtifactFetcher, HttpFetcher};
pub use graph::{load_graph_model, GraphModel};
pub use resolver::{BackendLoader, FsBackendLoader, ModelResolver, ResolverState};
pub use shims::ShimTable;

/// A runtime that maps one normalized image to a raw probability vector
pub trait InferenceBackend: Send + Sync {
    fn infer(&self, input: &ImageTensor) -> Result<Vec<f32>>;
}

impl InferenceBackend for CompactModel {
    fn infer(&self, input: &ImageTensor) -> Result<Vec<f32>> {
        self.run(input)
    }
}

impl<B: Backend> InferenceBackend for Mutex<GraphModel<B>> {
    fn infer(&self, input: &ImageTensor) -> Result<Vec<f32>> {
        let model = self
            .lock()
            .map_err(|_| DermaError::Inference("graph model lock poisoned".to_string()))?;
        model.forward(input)
    }
}

/// The backend chosen for this process
#[derive(Clone)]
pub enum BackendHandle {
    Compact(Arc<CompactModel>),
    Graph(Arc<Mutex<GraphModel<GraphBackend>>>),
    Unavailable,
}

impl BackendHandle {
    pub fn compact(model: CompactModel) -> Self {
        BackendHandle::Compact(Arc::new(model))
    }

    pub fn graph(model: GraphModel<GraphBackend>) -> Self {
        BackendHandle::Graph(Arc::new(Mutex::new(model)))
    }

    pub fn is_loaded(&self) -> bool {
        !matches!(self, BackendHandle::Unavailable)
    }

    /// Mode reported with predictions served by this handle
    pub fn mode(&self) -> InferenceMode {
        match self {
            BackendHandle::Compact(_) => InferenceMode::ProductionCompact,
            BackendHandle::Graph(_) => InferenceMode::ProductionGraph,
            BackendHandle::Unavailable => InferenceMode::Demo,
        }
    }

    /// The runtime behind the handle, if any
    pub fn backend(&self) -> Option<&dyn InferenceBackend> {
        match self {
            BackendHandle::Compact(model) => Some(model.as_ref() as &dyn InferenceBackend),
            BackendHandle::Graph(model) => Some(model.as_ref() as &dyn InferenceBackend),
            BackendHandle::Unavailable => None,
        }
    }

    /// One-line description for logs and the CLI
    pub fn describe(&self) -> String {
        match self {
            BackendHandle::Compact(model) => format!(
                "compact interpreter ({} inputs, {} outputs)",
                model.num_inputs(),
                model.num_outputs()
            ),
            BackendHandle::Graph(model) => match model.lock() {
                Ok(model) => format!(
                    "graph model '{}' ({} layers, {} parameters, {} outputs)",
                    model.name(),
                    model.num_layers(),
                    model.num_params(),
                    model.output_len()
                ),
                Err(_) => "graph model".to_string(),
            },
            BackendHandle::Unavailable => "unavailable".to_string(),
        }
    }
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendHandle::Compact(_) => write!(f, "BackendHandle::Compact"),
            BackendHandle::Graph(_) => write!(f, "BackendHandle::Graph"),
            BackendHandle::Unavailable => write!(f, "BackendHandle::Unavailable"),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_modes() {
        assert_eq!(BackendHandle::Unavailable.mode(), InferenceMode::Demo);
        assert!(!BackendHandle::Unavailable.is_loaded());
        assert!(BackendHandle::Unavailable.backend().is_none());

        let handle = BackendHandle::graph(test_support::constant_graph_model(0.7));
        assert_eq!(handle.mode(), InferenceMode::ProductionGraph);
        assert!(handle.is_loaded());
        assert!(handle.describe().contains("constant"));
    }

    #[test]
    fn test_graph_handle_infers() {
        let handle = BackendHandle::graph(test_support::constant_graph_model(0.7));
        let input = ImageTensor::from_nhwc(vec![0.5; 224 * 224 * 3], 224, 224).unwrap();
        let out = handle.backend().unwrap().infer(&input).unwrap();
        assert_eq!(out.len(), 1);
        assert!((out[0] - 0.7).abs() < 1e-5);
    }
}
