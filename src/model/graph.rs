//! Graph model interpreter
//!
//! Builds a Burn network from the layer description stored in a graph
//! artifact and runs it on a normalized image. Layers execute in listed order;
//! every shape is propagated from the fixed `224x224x3` input and checked
//! against the stored parameters while loading, so a model that loads always
//! produces a flat output.
//!
//! Tensors run channels-first internally. Kernels are stored channels-last
//! (`HWIO` for convolutions, `[in, out]` for dense layers) and are permuted on
//! load; `Flatten` restores channels-last order first so dense weights line up.

use std::path::Path;

use burn::{
    module::Param,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{
            AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, AvgPool2d, AvgPool2dConfig, MaxPool2d,
            MaxPool2dConfig,
        },
        Linear, LinearConfig, PaddingConfig2d,
    },
    tensor::{activation, backend::Backend, Tensor, TensorData},
};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::inference::normalizer::ImageTensor;
use crate::model::container::GraphArtifact;
use crate::model::shims::ShimTable;
use crate::utils::error::{DermaError, Result};
use crate::INPUT_SIZE;

type LayerResult<T> = std::result::Result<T, String>;

/// Shape of the features flowing between layers (batch dimension excluded)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureShape {
    Spatial { h: usize, w: usize, c: usize },
    Flat(usize),
}

impl FeatureShape {
    fn channels(&self) -> usize {
        match *self {
            FeatureShape::Spatial { c, .. } => c,
            FeatureShape::Flat(n) => n,
        }
    }
}

impl std::fmt::Display for FeatureShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeatureShape::Spatial { h, w, c } => write!(f, "{}x{}x{}", h, w, c),
            FeatureShape::Flat(n) => write!(f, "{}", n),
        }
    }
}

/// Element-wise activation functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationKind {
    Linear,
    Relu,
    Sigmoid,
    Softmax,
    Tanh,
}

impl ActivationKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "linear" => Some(ActivationKind::Linear),
            "relu" => Some(ActivationKind::Relu),
            "sigmoid" => Some(ActivationKind::Sigmoid),
            "softmax" => Some(ActivationKind::Softmax),
            "tanh" => Some(ActivationKind::Tanh),
            _ => None,
        }
    }

    /// Softmax runs over axis 1: channels for spatial features, units for flat ones
    fn apply<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            ActivationKind::Linear => x,
            ActivationKind::Relu => activation::relu(x),
            ActivationKind::Sigmoid => activation::sigmoid(x),
            ActivationKind::Softmax => activation::softmax(x, 1),
            ActivationKind::Tanh => x.tanh(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PaddingMode {
    Valid,
    Same,
}

/// Explicit spatial padding, possibly asymmetric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Padding2d {
    pub top: usize,
    pub bottom: usize,
    pub left: usize,
    pub right: usize,
}

impl Padding2d {
    fn is_zero(&self) -> bool {
        self.top == 0 && self.bottom == 0 && self.left == 0 && self.right == 0
    }
}

/// Output size and `(before, after)` padding along one axis
///
/// `same` pads to `ceil(size / stride)` outputs and puts the odd cell after.
fn resolve_axis(
    mode: PaddingMode,
    size: usize,
    kernel: usize,
    stride: usize,
) -> LayerResult<(usize, usize, usize)> {
    if kernel == 0 || stride == 0 {
        return Err("kernel and stride must be positive".to_string());
    }
    match mode {
        PaddingMode::Valid => {
            if size < kernel {
                return Err(format!(
                    "kernel {} does not fit input of size {} with valid padding",
                    kernel, size
                ));
            }
            Ok(((size - kernel) / stride + 1, 0, 0))
        }
        PaddingMode::Same => {
            let out = size.div_ceil(stride);
            let total = ((out - 1) * stride + kernel).saturating_sub(size);
            let before = total / 2;
            Ok((out, before, total - before))
        }
    }
}

fn pad_spatial<B: Backend>(x: Tensor<B, 4>, pad: Padding2d, value: f32) -> Tensor<B, 4> {
    if pad.is_zero() {
        return x;
    }
    let [n, c, h, w] = x.dims();
    let device = x.device();
    Tensor::<B, 4>::full(
        [n, c, h + pad.top + pad.bottom, w + pad.left + pad.right],
        value,
        &device,
    )
    .slice_assign(
        [0..n, 0..c, pad.top..pad.top + h, pad.left..pad.left + w],
        x,
    )
}

/// Features flowing through the network at runtime
enum Features<B: Backend> {
    Spatial(Tensor<B, 4>),
    Flat(Tensor<B, 2>),
}

/// One executable layer
#[derive(Debug)]
enum GraphLayer<B: Backend> {
    Conv {
        conv: Conv2d<B>,
        padding: Padding2d,
        activation: ActivationKind,
    },
    MaxPool {
        pool: MaxPool2d,
        padding: Padding2d,
    },
    AvgPool {
        pool: AvgPool2d,
    },
    GlobalAvgPool {
        pool: AdaptiveAvgPool2d,
    },
    BatchNorm {
        scale: Tensor<B, 1>,
        shift: Tensor<B, 1>,
    },
    Flatten,
    Dense {
        linear: Linear<B>,
        activation: ActivationKind,
    },
    Activation(ActivationKind),
    Identity,
}

impl<B: Backend> GraphLayer<B> {
    fn kind(&self) -> &'static str {
        match self {
            GraphLayer::Conv { .. } => "conv",
            GraphLayer::MaxPool { .. } => "max_pool",
            GraphLayer::AvgPool { .. } => "avg_pool",
            GraphLayer::GlobalAvgPool { .. } => "global_avg_pool",
            GraphLayer::BatchNorm { .. } => "batch_norm",
            GraphLayer::Flatten => "flatten",
            GraphLayer::Dense { .. } => "dense",
            GraphLayer::Activation(_) => "activation",
            GraphLayer::Identity => "identity",
        }
    }

    fn forward(&self, x: Features<B>) -> Result<Features<B>> {
        let out = match (self, x) {
            (GraphLayer::Identity, x) => x,
            (
                GraphLayer::Conv {
                    conv,
                    padding,
                    activation,
                },
                Features::Spatial(x),
            ) => Features::Spatial(activation.apply(conv.forward(pad_spatial(x, *padding, 0.0)))),
            (GraphLayer::MaxPool { pool, padding }, Features::Spatial(x)) => {
                Features::Spatial(pool.forward(pad_spatial(x, *padding, f32::NEG_INFINITY)))
            }
            (GraphLayer::AvgPool { pool }, Features::Spatial(x)) => {
                Features::Spatial(pool.forward(x))
            }
            (GraphLayer::GlobalAvgPool { pool }, Features::Spatial(x)) => {
                let [n, c, _, _] = x.dims();
                Features::Flat(pool.forward(x).reshape([n, c]))
            }
            (GraphLayer::BatchNorm { scale, shift }, Features::Spatial(x)) => {
                let c = scale.dims()[0];
                Features::Spatial(
                    x * scale.clone().reshape([1, c, 1, 1]) + shift.clone().reshape([1, c, 1, 1]),
                )
            }
            (GraphLayer::BatchNorm { scale, shift }, Features::Flat(x)) => {
                let c = scale.dims()[0];
                Features::Flat(x * scale.clone().reshape([1, c]) + shift.clone().reshape([1, c]))
            }
            (GraphLayer::Flatten, Features::Spatial(x)) => {
                let [n, c, h, w] = x.dims();
                Features::Flat(x.permute([0, 2, 3, 1]).reshape([n, h * w * c]))
            }
            (GraphLayer::Flatten, flat @ Features::Flat(_)) => flat,
            (GraphLayer::Dense { linear, activation }, Features::Flat(x)) => {
                Features::Flat(activation.apply(linear.forward(x)))
            }
            (GraphLayer::Activation(act), Features::Spatial(x)) => Features::Spatial(act.apply(x)),
            (GraphLayer::Activation(act), Features::Flat(x)) => Features::Flat(act.apply(x)),
            (layer, _) => {
                return Err(DermaError::Inference(format!(
                    "{} layer received features of the wrong rank",
                    layer.kind()
                )))
            }
        };
        Ok(out)
    }
}

/// A loaded graph model
#[derive(Debug)]
pub struct GraphModel<B: Backend> {
    name: String,
    layers: Vec<GraphLayer<B>>,
    output_len: usize,
    num_params: usize,
    device: B::Device,
}

impl<B: Backend> GraphModel<B> {
    /// Build the network described by an artifact
    ///
    /// With `shims`, every layer config is rewritten by the shim table before
    /// it is interpreted; without, the strict schema applies.
    pub fn from_artifact(
        artifact: &GraphArtifact,
        shims: Option<&ShimTable>,
        device: &B::Device,
    ) -> Result<Self> {
        let model_config = match shims {
            Some(table) => table.apply_to_model(artifact.model_config.clone()),
            None => artifact.model_config.clone(),
        };

        let class_name = model_config
            .get("class_name")
            .and_then(Value::as_str)
            .ok_or_else(|| DermaError::Model("model_config has no class_name".to_string()))?;
        if !matches!(class_name, "Sequential" | "Functional" | "Model") {
            return Err(DermaError::Model(format!(
                "unsupported model class '{}'",
                class_name
            )));
        }

        let inner = model_config
            .get("config")
            .ok_or_else(|| DermaError::Model("model_config has no config".to_string()))?;
        let name = inner
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("graph_model")
            .to_string();
        let layer_specs = inner
            .get("layers")
            .and_then(Value::as_array)
            .ok_or_else(|| DermaError::Model("model_config has no layer list".to_string()))?;

        let empty = Map::new();
        let mut shape = FeatureShape::Spatial {
            h: INPUT_SIZE,
            w: INPUT_SIZE,
            c: ImageTensor::CHANNELS,
        };
        let mut layers = Vec::with_capacity(layer_specs.len());
        let mut num_params = 0;

        for (index, spec) in layer_specs.iter().enumerate() {
            let class = spec
                .get("class_name")
                .and_then(Value::as_str)
                .ok_or_else(|| DermaError::Model(format!("layer {} has no class_name", index)))?;
            let config = match spec.get("config") {
                Some(Value::Object(config)) => config,
                None => &empty,
                Some(_) => {
                    return Err(DermaError::Model(format!(
                        "layer {} config is not an object",
                        index
                    )))
                }
            };
            let label = config
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("layer_{}", index));

            let built = build_layer::<B>(class, &label, config, shape, artifact, device)
                .map_err(|e| {
                    DermaError::Model(format!("layer '{}' ({}): {}", label, class, e))
                })?;

            debug!("  {} ({}) {} -> {}", label, class, shape, built.output);
            shape = built.output;
            num_params += built.num_params;
            layers.push(built.layer);
        }

        let output_len = match shape {
            FeatureShape::Flat(n) => n,
            spatial => {
                return Err(DermaError::Model(format!(
                    "model output must be flat, got {}",
                    spatial
                )))
            }
        };

        Ok(Self {
            name,
            layers,
            output_len,
            num_params,
            device: device.clone(),
        })
    }

    /// Run one image through the network and return the first batch row
    pub fn forward(&self, input: &ImageTensor) -> Result<Vec<f32>> {
        let shape = input.shape();
        if shape != [1, INPUT_SIZE, INPUT_SIZE, ImageTensor::CHANNELS] {
            return Err(DermaError::Inference(format!(
                "input tensor has shape {:?}",
                shape
            )));
        }

        let x = Tensor::<B, 4>::from_data(
            TensorData::new(input.as_slice().to_vec(), shape),
            &self.device,
        )
        .permute([0, 3, 1, 2]);

        let mut features = Features::Spatial(x);
        for layer in &self.layers {
            features = layer.forward(features)?;
        }

        let output = match features {
            Features::Flat(output) => output,
            Features::Spatial(_) => {
                return Err(DermaError::Inference(
                    "network ended with spatial features".to_string(),
                ))
            }
        };

        let values: Vec<f32> = output
            .into_data()
            .to_vec()
            .map_err(|e| DermaError::Inference(format!("failed to read output: {:?}", e)))?;

        Ok(values.into_iter().take(self.output_len).collect())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Length of one output row
    pub fn output_len(&self) -> usize {
        self.output_len
    }

    /// Number of stored parameter values the network uses
    pub fn num_params(&self) -> usize {
        self.num_params
    }
}

/// Load a graph artifact, retrying once with the compatibility shims
///
/// Returns the model and whether the shims were needed.
pub fn load_graph_model<B: Backend>(
    path: &Path,
    shims: &ShimTable,
    device: &B::Device,
) -> Result<(GraphModel<B>, bool)> {
    let artifact = GraphArtifact::open(path)?;

    match GraphModel::from_artifact(&artifact, None, device) {
        Ok(model) => Ok((model, false)),
        Err(strict_err) => {
            warn!("Graph model failed strict load: {}", strict_err);
            info!("Retrying with {} compatibility shims", shims.len());
            match GraphModel::from_artifact(&artifact, Some(shims), device) {
                Ok(model) => Ok((model, true)),
                Err(shim_err) => Err(DermaError::Model(format!(
                    "strict load failed ({}); shimmed load failed ({})",
                    strict_err, shim_err
                ))),
            }
        }
    }
}

struct BuiltLayer<B: Backend> {
    layer: GraphLayer<B>,
    output: FeatureShape,
    num_params: usize,
}

impl<B: Backend> BuiltLayer<B> {
    fn new(layer: GraphLayer<B>, output: FeatureShape) -> Self {
        Self {
            layer,
            output,
            num_params: 0,
        }
    }
}

fn build_layer<B: Backend>(
    class: &str,
    label: &str,
    config: &Map<String, Value>,
    input: FeatureShape,
    artifact: &GraphArtifact,
    device: &B::Device,
) -> LayerResult<BuiltLayer<B>> {
    if let Some(dtype) = config.get("dtype") {
        if !dtype.is_string() && !dtype.is_null() {
            return Err("dtype must be a policy name string".to_string());
        }
    }

    match class {
        "InputLayer" => {
            check_input_layer(config, input)?;
            Ok(BuiltLayer::new(GraphLayer::Identity, input))
        }
        "Dropout" => Ok(BuiltLayer::new(GraphLayer::Identity, input)),
        "Activation" => {
            let act = activation_field(config)?;
            Ok(BuiltLayer::new(GraphLayer::Activation(act), input))
        }
        "Flatten" => {
            let output = match input {
                FeatureShape::Spatial { h, w, c } => FeatureShape::Flat(h * w * c),
                flat => flat,
            };
            Ok(BuiltLayer::new(GraphLayer::Flatten, output))
        }
        "GlobalAveragePooling2D" => {
            let FeatureShape::Spatial { c, .. } = input else {
                return Err(format!("expects spatial input, got {}", input));
            };
            let pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();
            Ok(BuiltLayer::new(
                GraphLayer::GlobalAvgPool { pool },
                FeatureShape::Flat(c),
            ))
        }
        "MaxPooling2D" | "AveragePooling2D" => build_pool(class, config, input),
        "Conv2D" => build_conv(label, config, input, artifact, device),
        "BatchNormalization" => build_batch_norm(label, config, input, artifact, device),
        "Dense" => build_dense(label, config, input, artifact, device),
        other => Err(format!("unsupported layer class '{}'", other)),
    }
}

fn check_input_layer(config: &Map<String, Value>, input: FeatureShape) -> LayerResult<()> {
    let declared = match (config.get("input_shape"), config.get("batch_input_shape")) {
        (Some(Value::Array(dims)), _) => dims.clone(),
        (None, Some(Value::Array(dims))) if !dims.is_empty() => dims[1..].to_vec(),
        _ => return Err("input layer declares no input_shape".to_string()),
    };

    let FeatureShape::Spatial { h, w, c } = input else {
        return Err("input layer must come first".to_string());
    };
    let expected = [h, w, c];
    let matches = declared.len() == 3
        && declared
            .iter()
            .zip(expected)
            .all(|(d, e)| d.is_null() || d.as_u64() == Some(e as u64));
    if !matches {
        return Err(format!(
            "declared input shape {:?} is not {}x{}x{}",
            declared, h, w, c
        ));
    }
    Ok(())
}

fn build_pool<B: Backend>(
    class: &str,
    config: &Map<String, Value>,
    input: FeatureShape,
) -> LayerResult<BuiltLayer<B>> {
    let FeatureShape::Spatial { h, w, c } = input else {
        return Err(format!("expects spatial input, got {}", input));
    };
    check_channels_last(config)?;

    let pool_size = pair_field(config, "pool_size")?.unwrap_or([2, 2]);
    let strides = pair_field(config, "strides")?.unwrap_or(pool_size);
    let mode = padding_field(config)?;

    let (out_h, top, bottom) = resolve_axis(mode, h, pool_size[0], strides[0])?;
    let (out_w, left, right) = resolve_axis(mode, w, pool_size[1], strides[1])?;
    let padding = Padding2d {
        top,
        bottom,
        left,
        right,
    };
    let output = FeatureShape::Spatial {
        h: out_h,
        w: out_w,
        c,
    };

    if class == "AveragePooling2D" {
        if mode == PaddingMode::Same {
            return Err("average pooling supports valid padding only".to_string());
        }
        let pool = AvgPool2dConfig::new(pool_size)
            .with_strides(strides)
            .with_padding(PaddingConfig2d::Valid)
            .init();
        return Ok(BuiltLayer::new(GraphLayer::AvgPool { pool }, output));
    }

    let pool = MaxPool2dConfig::new(pool_size)
        .with_strides(strides)
        .with_padding(PaddingConfig2d::Valid)
        .init();
    Ok(BuiltLayer::new(GraphLayer::MaxPool { pool, padding }, output))
}

fn build_conv<B: Backend>(
    label: &str,
    config: &Map<String, Value>,
    input: FeatureShape,
    artifact: &GraphArtifact,
    device: &B::Device,
) -> LayerResult<BuiltLayer<B>> {
    let FeatureShape::Spatial { h, w, c } = input else {
        return Err(format!("expects spatial input, got {}", input));
    };
    check_channels_last(config)?;

    let filters = usize_field(config, "filters")?.ok_or("missing filters")?;
    let kernel = pair_field(config, "kernel_size")?.ok_or("missing kernel_size")?;
    let strides = pair_field(config, "strides")?.unwrap_or([1, 1]);
    if let Some(dilation) = pair_field(config, "dilation_rate")? {
        if dilation != [1, 1] {
            return Err(format!("dilation {:?} is not supported", dilation));
        }
    }
    if let Some(groups) = usize_field(config, "groups")? {
        if groups != 1 {
            return Err(format!("grouped convolution ({} groups) is not supported", groups));
        }
    }
    let mode = padding_field(config)?;
    let activation = activation_field(config)?;
    let use_bias = bool_field(config, "use_bias")?.unwrap_or(true);

    let (out_h, top, bottom) = resolve_axis(mode, h, kernel[0], strides[0])?;
    let (out_w, left, right) = resolve_axis(mode, w, kernel[1], strides[1])?;

    let kernel_values = param(artifact, label, "kernel", &[kernel[0], kernel[1], c, filters])?;
    let weight = Tensor::<B, 4>::from_data(
        TensorData::new(kernel_values, [kernel[0], kernel[1], c, filters]),
        device,
    )
    .permute([3, 2, 0, 1]);

    let mut conv = Conv2dConfig::new([c, filters], kernel)
        .with_stride(strides)
        .with_padding(PaddingConfig2d::Valid)
        .with_bias(use_bias)
        .init(device);
    conv.weight = Param::from_tensor(weight);

    let mut num_params = kernel[0] * kernel[1] * c * filters;
    if use_bias {
        let bias = param(artifact, label, "bias", &[filters])?;
        conv.bias = Some(Param::from_tensor(Tensor::<B, 1>::from_data(
            TensorData::new(bias, [filters]),
            device,
        )));
        num_params += filters;
    }

    Ok(BuiltLayer {
        layer: GraphLayer::Conv {
            conv,
            padding: Padding2d {
                top,
                bottom,
                left,
                right,
            },
            activation,
        },
        output: FeatureShape::Spatial {
            h: out_h,
            w: out_w,
            c: filters,
        },
        num_params,
    })
}

fn build_batch_norm<B: Backend>(
    label: &str,
    config: &Map<String, Value>,
    input: FeatureShape,
    artifact: &GraphArtifact,
    device: &B::Device,
) -> LayerResult<BuiltLayer<B>> {
    match config.get("axis") {
        None => {}
        Some(axis) if axis.as_i64() == Some(-1) || axis.as_i64() == Some(3) => {}
        Some(Value::Array(axes)) if axes.len() == 1 && matches!(axes[0].as_i64(), Some(-1 | 3)) => {}
        Some(axis) => return Err(format!("normalization axis {} is not supported", axis)),
    }

    let channels = input.channels();
    let epsilon = config
        .get("epsilon")
        .and_then(Value::as_f64)
        .unwrap_or(1e-3) as f32;
    let center = bool_field(config, "center")?.unwrap_or(true);
    let scale = bool_field(config, "scale")?.unwrap_or(true);

    let gamma = if scale {
        param(artifact, label, "gamma", &[channels])?
    } else {
        vec![1.0; channels]
    };
    let beta = if center {
        param(artifact, label, "beta", &[channels])?
    } else {
        vec![0.0; channels]
    };
    let mean = param(artifact, label, "moving_mean", &[channels])?;
    let variance = param(artifact, label, "moving_variance", &[channels])?;

    // Fold the running statistics into one affine transform.
    let mut scale_values = Vec::with_capacity(channels);
    let mut shift_values = Vec::with_capacity(channels);
    for i in 0..channels {
        let s = gamma[i] / (variance[i] + epsilon).sqrt();
        scale_values.push(s);
        shift_values.push(beta[i] - mean[i] * s);
    }

    let scale = Tensor::<B, 1>::from_data(TensorData::new(scale_values, [channels]), device);
    let shift = Tensor::<B, 1>::from_data(TensorData::new(shift_values, [channels]), device);

    Ok(BuiltLayer {
        layer: GraphLayer::BatchNorm { scale, shift },
        output: input,
        num_params: 4 * channels,
    })
}

fn build_dense<B: Backend>(
    label: &str,
    config: &Map<String, Value>,
    input: FeatureShape,
    artifact: &GraphArtifact,
    device: &B::Device,
) -> LayerResult<BuiltLayer<B>> {
    let FeatureShape::Flat(in_features) = input else {
        return Err(format!("expects flat input, got {}", input));
    };

    let units = usize_field(config, "units")?.ok_or("missing units")?;
    let activation = activation_field(config)?;
    let use_bias = bool_field(config, "use_bias")?.unwrap_or(true);

    let kernel = param(artifact, label, "kernel", &[in_features, units])?;
    let mut linear = LinearConfig::new(in_features, units)
        .with_bias(use_bias)
        .init(device);
    linear.weight = Param::from_tensor(Tensor::<B, 2>::from_data(
        TensorData::new(kernel, [in_features, units]),
        device,
    ));

    let mut num_params = in_features * units;
    if use_bias {
        let bias = param(artifact, label, "bias", &[units])?;
        linear.bias = Some(Param::from_tensor(Tensor::<B, 1>::from_data(
            TensorData::new(bias, [units]),
            device,
        )));
        num_params += units;
    }

    Ok(BuiltLayer {
        layer: GraphLayer::Dense { linear, activation },
        output: FeatureShape::Flat(units),
        num_params,
    })
}

/// Fetch `<layer>/<name>` and check its shape
fn param(
    artifact: &GraphArtifact,
    label: &str,
    name: &str,
    expected: &[usize],
) -> LayerResult<Vec<f32>> {
    let key = format!("{}/{}", label, name);
    let (shape, values) = artifact.tensor_f32(&key).map_err(|e| e.to_string())?;
    if shape != expected {
        return Err(format!(
            "parameter '{}' has shape {:?}, expected {:?}",
            key, shape, expected
        ));
    }
    Ok(values)
}

fn check_channels_last(config: &Map<String, Value>) -> LayerResult<()> {
    match config.get("data_format").and_then(Value::as_str) {
        None | Some("channels_last") => Ok(()),
        Some(other) => Err(format!("data_format '{}' is not supported", other)),
    }
}

fn activation_field(config: &Map<String, Value>) -> LayerResult<ActivationKind> {
    match config.get("activation") {
        None | Some(Value::Null) => Ok(ActivationKind::Linear),
        Some(Value::String(name)) => {
            ActivationKind::parse(name).ok_or_else(|| format!("unsupported activation '{}'", name))
        }
        Some(other) => Err(format!("unsupported activation {}", other)),
    }
}

fn padding_field(config: &Map<String, Value>) -> LayerResult<PaddingMode> {
    match config.get("padding").and_then(Value::as_str) {
        None | Some("valid") => Ok(PaddingMode::Valid),
        Some("same") => Ok(PaddingMode::Same),
        Some(other) => Err(format!("unsupported padding '{}'", other)),
    }
}

fn usize_field(config: &Map<String, Value>, key: &str) -> LayerResult<Option<usize>> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(|v| Some(v as usize))
            .ok_or_else(|| format!("'{}' must be a non-negative integer", key)),
    }
}

fn bool_field(config: &Map<String, Value>, key: &str) -> LayerResult<Option<bool>> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(format!("'{}' must be a boolean", key)),
    }
}

/// A size given either as one integer or as `[rows, cols]`
fn pair_field(config: &Map<String, Value>, key: &str) -> LayerResult<Option<[usize; 2]>> {
    let invalid = || format!("'{}' must be an integer or a pair of integers", key);
    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            let v = n.as_u64().ok_or_else(invalid)? as usize;
            Ok(Some([v, v]))
        }
        Some(Value::Array(items)) if items.len() == 2 => {
            let a = items[0].as_u64().ok_or_else(invalid)? as usize;
            let b = items[1].as_u64().ok_or_else(invalid)? as usize;
            Ok(Some([a, b]))
        }
        Some(_) => Err(invalid()),
    }
}
