//! Graph artifact container
//!
//! A self-describing file holding the layer description and the weights of a
//! graph model.
//!
//! ```text
//! Container := HEADER_LEN HEADER TENSOR_DATA
//!
//! HEADER_LEN := u64 (little-endian)
//!
//! HEADER := JSON {
//!   "__metadata__": { "model_config": "<layer description JSON>" },
//!   "<layer>/<param>": {
//!     "dtype": "F32",
//!     "shape": [dim1, dim2, ...],
//!     "data_offsets": [start, end]
//!   },
//!   ...
//! }
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    io::{Cursor, Read},
    path::Path,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::error::{DermaError, Result, ResultExt};

/// Reserved header key for container metadata
const METADATA_KEY: &str = "__metadata__";

/// Metadata key holding the layer description
const MODEL_CONFIG_KEY: &str = "model_config";

/// Tensor element type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TensorDtype {
    /// 32-bit float
    F32,
    /// 16-bit float
    F16,
    /// 32-bit signed integer
    I32,
    /// 8-bit unsigned integer
    U8,
}

/// Tensor entry as it appears in the header
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TensorEntry {
    dtype: TensorDtype,
    shape: Vec<usize>,
    data_offsets: [usize; 2],
}

/// Location and shape of one stored tensor
#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    pub name: String,
    pub dtype: TensorDtype,
    pub shape: Vec<usize>,
    pub data_offsets: [usize; 2],
}

impl TensorInfo {
    /// Number of elements implied by the shape; `None` if it overflows
    pub fn numel(&self) -> Option<usize> {
        self.shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    /// Bytes the tensor occupies; `None` if it overflows
    pub fn byte_len(&self) -> Option<usize> {
        let width = match self.dtype {
            TensorDtype::F32 | TensorDtype::I32 => 4,
            TensorDtype::F16 => 2,
            TensorDtype::U8 => 1,
        };
        self.numel()?.checked_mul(width)
    }
}

/// A parsed graph artifact
#[derive(Debug, Clone)]
pub struct GraphArtifact {
    /// Layer description, still as raw JSON
    pub model_config: Value,
    /// Stored tensors by `<layer>/<param>` name
    pub tensors: HashMap<String, TensorInfo>,
    data: Vec<u8>,
}

impl GraphArtifact {
    /// Read and parse a container from disk
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Parse a container from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);

        let mut len_buf = [0u8; 8];
        cursor
            .read_exact(&mut len_buf)
            .context("failed to read header length")?;
        let header_len = usize::try_from(u64::from_le_bytes(len_buf))
            .context("header length exceeds platform usize limit")?;

        let data_start = header_len
            .checked_add(8)
            .filter(|start| *start <= bytes.len())
            .ok_or_else(|| {
                DermaError::Model(format!(
                    "header length {} exceeds file size {}",
                    header_len,
                    bytes.len()
                ))
            })?;

        let header: BTreeMap<String, Value> =
            serde_json::from_slice(&bytes[8..data_start]).context("malformed container header")?;

        let data = bytes[data_start..].to_vec();
        let mut model_config = None;
        let mut tensors = HashMap::new();

        for (name, value) in header {
            if name == METADATA_KEY {
                model_config = Some(parse_model_config(&value)?);
                continue;
            }

            let entry: TensorEntry = serde_json::from_value(value)
                .with_context(|| format!("malformed entry for tensor '{}'", name))?;

            let [start, end] = entry.data_offsets;
            if start > end || end > data.len() {
                return Err(DermaError::Model(format!(
                    "tensor '{}' has offsets [{}, {}) outside of {} data bytes",
                    name,
                    start,
                    end,
                    data.len()
                )));
            }

            tensors.insert(
                name.clone(),
                TensorInfo {
                    name,
                    dtype: entry.dtype,
                    shape: entry.shape,
                    data_offsets: entry.data_offsets,
                },
            );
        }

        let model_config = model_config.context("container has no model_config metadata")?;

        Ok(Self {
            model_config,
            tensors,
            data,
        })
    }

    /// Look up a tensor and decode it as `f32` values
    pub fn tensor_f32(&self, name: &str) -> Result<(Vec<usize>, Vec<f32>)> {
        let info = self
            .tensors
            .get(name)
            .with_context(|| format!("missing tensor '{}'", name))?;

        if info.dtype != TensorDtype::F32 {
            return Err(DermaError::Model(format!(
                "tensor '{}' has dtype {:?}, only F32 is supported",
                name, info.dtype
            )));
        }

        let expected = info
            .byte_len()
            .with_context(|| format!("tensor '{}' has oversized shape {:?}", name, info.shape))?;
        let [start, end] = info.data_offsets;
        let raw = &self.data[start..end];
        if raw.len() != expected {
            return Err(DermaError::Model(format!(
                "tensor '{}' holds {} bytes, shape {:?} needs {}",
                name,
                raw.len(),
                info.shape,
                expected
            )));
        }

        let values = raw
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Ok((info.shape.clone(), values))
    }
}

/// The layer description is stored as a JSON string; plain objects are accepted too
fn parse_model_config(metadata: &Value) -> Result<Value> {
    match metadata.get(MODEL_CONFIG_KEY) {
        Some(Value::String(raw)) => serde_json::from_str(raw).context("malformed model_config"),
        Some(obj @ Value::Object(_)) => Ok(obj.clone()),
        _ => Err(DermaError::Model(
            "container has no model_config metadata".to_string(),
        )),
    }
}

/// Builds containers in memory; used to export models and to create fixtures
#[derive(Debug, Default)]
pub struct GraphArtifactWriter {
    model_config: Value,
    tensors: Vec<(String, Vec<usize>, Vec<f32>)>,
}

impl GraphArtifactWriter {
    pub fn new(model_config: Value) -> Self {
        Self {
            model_config,
            tensors: Vec::new(),
        }
    }

    /// Add an F32 tensor
    pub fn tensor(mut self, name: impl Into<String>, shape: &[usize], values: Vec<f32>) -> Self {
        self.tensors.push((name.into(), shape.to_vec(), values));
        self
    }

    /// Serialize to container bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut header = serde_json::Map::new();
        header.insert(
            METADATA_KEY.to_string(),
            serde_json::json!({ MODEL_CONFIG_KEY: serde_json::to_string(&self.model_config)? }),
        );

        let mut data = Vec::new();
        for (name, shape, values) in &self.tensors {
            let numel = shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d));
            if numel != Some(values.len()) {
                return Err(DermaError::Serialization(format!(
                    "tensor '{}' has {} values for shape {:?}",
                    name,
                    values.len(),
                    shape
                )));
            }

            let start = data.len();
            for v in values {
                data.extend_from_slice(&v.to_le_bytes());
            }
            let entry = TensorEntry {
                dtype: TensorDtype::F32,
                shape: shape.clone(),
                data_offsets: [start, data.len()],
            };
            header.insert(name.clone(), serde_json::to_value(entry)?);
        }

        let header_bytes = serde_json::to_vec(&Value::Object(header))?;
        let mut out = Vec::with_capacity(8 + header_bytes.len() + data.len());
        out.extend_from_slice(&(header_bytes.len() as u64).to_le_bytes());
        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(&data);
        Ok(out)
    }

    /// Serialize straight to a file
    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }
}
