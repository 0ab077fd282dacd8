//! Compatibility shims for legacy layer configurations
//!
//! Older exports describe layers with fields the current schema rejects. Each
//! shim is keyed by the legacy field it detects and rewrites one layer config
//! object into the current form. Shims are only applied when loading with the
//! strict schema has already failed.

use serde_json::{Map, Value};

/// A pure rewrite of one layer config object
pub type ShimFn = fn(Map<String, Value>) -> Map<String, Value>;

/// One registered shim
#[derive(Debug, Clone, Copy)]
pub struct Shim {
    /// Legacy field that triggers the shim
    pub legacy_field: &'static str,
    pub description: &'static str,
    pub apply: ShimFn,
}

/// Ordered registry of shims
#[derive(Debug, Clone)]
pub struct ShimTable {
    shims: Vec<Shim>,
}

impl Default for ShimTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl ShimTable {
    /// Table with no shims
    pub fn empty() -> Self {
        Self { shims: Vec::new() }
    }

    /// The shims needed for exports produced by older training toolchains
    pub fn standard() -> Self {
        Self::empty()
            .register(Shim {
                legacy_field: "batch_shape",
                description: "input layer shape given as batch_shape",
                apply: rename_batch_shape,
            })
            .register(Shim {
                legacy_field: "dtype",
                description: "precision policy serialized as an object",
                apply: flatten_dtype_policy,
            })
    }

    pub fn register(mut self, shim: Shim) -> Self {
        self.shims.push(shim);
        self
    }

    pub fn len(&self) -> usize {
        self.shims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shims.is_empty()
    }

    /// Run every shim whose legacy field is present on one layer config
    pub fn apply_to_layer(&self, mut config: Map<String, Value>) -> Map<String, Value> {
        for shim in &self.shims {
            if config.contains_key(shim.legacy_field) {
                config = (shim.apply)(config);
            }
        }
        config
    }

    /// Rewrite every layer config of a `{class_name, config: {layers: [...]}}` description
    pub fn apply_to_model(&self, mut model_config: Value) -> Value {
        let layers = model_config
            .get_mut("config")
            .and_then(|c| c.get_mut("layers"))
            .and_then(Value::as_array_mut);

        if let Some(layers) = layers {
            for layer in layers.iter_mut() {
                if let Some(Value::Object(config)) = layer.get_mut("config") {
                    let taken = std::mem::take(config);
                    *config = self.apply_to_layer(taken);
                }
            }
        }
        model_config
    }
}

/// `batch_shape: [null, h, w, c]` becomes `input_shape: [h, w, c]`
fn rename_batch_shape(mut config: Map<String, Value>) -> Map<String, Value> {
    if let Some(Value::Array(batch_shape)) = config.remove("batch_shape") {
        if batch_shape.len() > 1 && !config.contains_key("input_shape") {
            config.insert(
                "input_shape".to_string(),
                Value::Array(batch_shape[1..].to_vec()),
            );
        }
    }
    config
}

/// Replace an object-valued `dtype` with the name of its policy
fn flatten_dtype_policy(mut config: Map<String, Value>) -> Map<String, Value> {
    let Some(Value::Object(policy)) = config.get("dtype") else {
        return config;
    };

    let name = policy
        .get("config")
        .and_then(|c| c.get("name"))
        .or_else(|| policy.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("float32")
        .to_string();

    config.insert("dtype".to_string(), Value::String(name));
    config
}
