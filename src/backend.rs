//! Backend abstraction for the graph model runtime
//!
//! Graph models are executed on Burn's NdArray (CPU) backend.

/// The backend used for graph model inference
pub type GraphBackend = burn_ndarray::NdArray<f32>;

/// Device type of the graph backend
pub type GraphDevice = <GraphBackend as burn::tensor::backend::Backend>::Device;

/// Get the default device
pub fn default_device() -> GraphDevice {
    GraphDevice::default()
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    "NdArray (CPU)"
}
