//! ONNX Runtime (ort) backend for `.onnx` models.

use std::path::Path;
use std::sync::Mutex;

use ndarray::{ArrayD, IxDyn};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionInputValue};
use ort::tensor::TensorElementType;
use ort::value::{Tensor as OrtTensor, ValueRef, ValueType};
use tracing::debug;

use crate::error::InferenceError;
use crate::tensor::{Tensor, TensorMap, TensorSpec, TensorType};
use crate::{InferenceBackend, Result};

/// Backend using ONNX Runtime.
pub struct OrtBackend {
    session: Mutex<Session>,
    inputs: Vec<TensorSpec>,
    outputs: Vec<TensorSpec>,
}

impl OrtBackend {
    /// Load a model from a file path.
    ///
    /// `num_threads` sets the runtime's intra-op thread pool; `1` runs single-threaded.
    pub fn from_file<P: AsRef<Path>>(path: P, num_threads: usize) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading ONNX model from: {}", path.display());

        let bytes = std::fs::read(path)?;

        Self::from_bytes(&bytes, num_threads)
    }

    /// Load a model from bytes.
    pub fn from_bytes(bytes: &[u8], num_threads: usize) -> Result<Self> {
        debug!(
            "Loading ONNX model from {} bytes with {} intra-op threads",
            bytes.len(),
            num_threads
        );

        let session = Session::builder()
            .map_err(|e| InferenceError::SessionCreate(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| InferenceError::SessionCreate(e.to_string()))?
            .with_intra_threads(num_threads.max(1))
            .map_err(|e| InferenceError::SessionCreate(e.to_string()))?
            .commit_from_memory(bytes)
            .map_err(|e| InferenceError::ModelLoad(e.to_string()))?;

        let inputs = session
            .inputs()
            .iter()
            .map(|i| tensor_spec(i.name(), i.dtype()))
            .collect::<Result<Vec<_>>>()?;

        let outputs = session
            .outputs()
            .iter()
            .map(|o| tensor_spec(o.name(), o.dtype()))
            .collect::<Result<Vec<_>>>()?;

        debug!("Model inputs: {:?}", inputs);
        debug!("Model outputs: {:?}", outputs);

        Ok(Self {
            session: Mutex::new(session),
            inputs,
            outputs,
        })
    }

    fn convert_input(&self, tensor: &Tensor) -> Result<SessionInputValue<'static>> {
        let shape: Vec<i64> = tensor.shape().iter().map(|&s| s as i64).collect();
        let value = match tensor {
            Tensor::Float32(arr) => {
                OrtTensor::from_array((shape, arr.iter().cloned().collect::<Vec<_>>())).map(Into::into)
            }
            Tensor::Float64(arr) => {
                OrtTensor::from_array((shape, arr.iter().cloned().collect::<Vec<_>>())).map(Into::into)
            }
            Tensor::Int32(arr) => {
                OrtTensor::from_array((shape, arr.iter().cloned().collect::<Vec<_>>())).map(Into::into)
            }
            Tensor::Int64(arr) => {
                OrtTensor::from_array((shape, arr.iter().cloned().collect::<Vec<_>>())).map(Into::into)
            }
            Tensor::Uint8(arr) => {
                OrtTensor::from_array((shape, arr.iter().cloned().collect::<Vec<_>>())).map(Into::into)
            }
            Tensor::Int8(arr) => {
                OrtTensor::from_array((shape, arr.iter().cloned().collect::<Vec<_>>())).map(Into::into)
            }
        };
        value.map_err(|e| InferenceError::InvalidInput(e.to_string()))
    }
}

impl InferenceBackend for OrtBackend {
    fn input_specs(&self) -> &[TensorSpec] {
        &self.inputs
    }

    fn output_specs(&self) -> &[TensorSpec] {
        &self.outputs
    }

    fn run(&self, inputs: &TensorMap) -> Result<TensorMap> {
        self.validate_inputs(inputs)?;

        let ort_inputs: Vec<(&str, SessionInputValue<'static>)> = self
            .inputs
            .iter()
            .map(|spec| {
                let tensor = inputs.get(&spec.name).ok_or_else(|| {
                    InferenceError::InvalidInput(format!("missing input '{}'", spec.name))
                })?;
                Ok((spec.name.as_str(), self.convert_input(tensor)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut session = self.session.lock().map_err(|e| {
            InferenceError::InferenceFailed(format!("Failed to lock session: {}", e))
        })?;

        let outputs = session
            .run(ort_inputs)
            .map_err(|e| InferenceError::InferenceFailed(e.to_string()))?;

        let mut results = TensorMap::with_capacity(outputs.len());
        for (name, value) in outputs.iter() {
            results.insert(name, extract_output(name, &value)?);
        }

        Ok(results)
    }
}

fn tensor_spec(name: &str, value_type: &ValueType) -> Result<TensorSpec> {
    let ValueType::Tensor { ty, shape, .. } = value_type else {
        return Err(InferenceError::ModelLoad(format!(
            "'{}' is not a tensor, only tensor inputs and outputs are supported",
            name
        )));
    };

    let dtype = tensor_type(*ty).ok_or_else(|| {
        InferenceError::ModelLoad(format!("'{}' has unsupported element type {:?}", name, ty))
    })?;

    let shape = shape
        .iter()
        .map(|&d| if d < 0 { None } else { Some(d as usize) })
        .collect();

    Ok(TensorSpec::new(name, shape, dtype))
}

fn tensor_type(ty: TensorElementType) -> Option<TensorType> {
    match ty {
        TensorElementType::Float32 => Some(TensorType::Float32),
        TensorElementType::Float64 => Some(TensorType::Float64),
        TensorElementType::Int32 => Some(TensorType::Int32),
        TensorElementType::Int64 => Some(TensorType::Int64),
        TensorElementType::Uint8 => Some(TensorType::Uint8),
        TensorElementType::Int8 => Some(TensorType::Int8),
        _ => None,
    }
}

fn extract_output(name: &str, value: &ValueRef<'_>) -> Result<Tensor> {
    let ValueType::Tensor { ty, .. } = value.dtype() else {
        return Err(InferenceError::OutputExtraction(format!(
            "output '{}' is not a tensor",
            name
        )));
    };

    let tensor = match *ty {
        TensorElementType::Float32 => {
            let (shape, data) = value.try_extract_tensor::<f32>().map_err(extraction_error)?;
            Tensor::Float32(to_array(shape.iter().map(|&s| s as usize).collect(), data)?)
        }
        TensorElementType::Float64 => {
            let (shape, data) = value.try_extract_tensor::<f64>().map_err(extraction_error)?;
            Tensor::Float64(to_array(shape.iter().map(|&s| s as usize).collect(), data)?)
        }
        TensorElementType::Int32 => {
            let (shape, data) = value.try_extract_tensor::<i32>().map_err(extraction_error)?;
            Tensor::Int32(to_array(shape.iter().map(|&s| s as usize).collect(), data)?)
        }
        TensorElementType::Int64 => {
            let (shape, data) = value.try_extract_tensor::<i64>().map_err(extraction_error)?;
            Tensor::Int64(to_array(shape.iter().map(|&s| s as usize).collect(), data)?)
        }
        TensorElementType::Uint8 => {
            let (shape, data) = value.try_extract_tensor::<u8>().map_err(extraction_error)?;
            Tensor::Uint8(to_array(shape.iter().map(|&s| s as usize).collect(), data)?)
        }
        TensorElementType::Int8 => {
            let (shape, data) = value.try_extract_tensor::<i8>().map_err(extraction_error)?;
            Tensor::Int8(to_array(shape.iter().map(|&s| s as usize).collect(), data)?)
        }
        other => {
            return Err(InferenceError::OutputExtraction(format!(
                "unsupported output type {:?} for '{}'",
                other, name
            )));
        }
    };

    Ok(tensor)
}

fn extraction_error<E: std::fmt::Display>(e: E) -> InferenceError {
    InferenceError::OutputExtraction(e.to_string())
}

fn to_array<T: Clone>(shape: Vec<usize>, data: &[T]) -> Result<ArrayD<T>> {
    ArrayD::from_shape_vec(IxDyn(&shape), data.to_vec())
        .map_err(|e| InferenceError::OutputExtraction(e.to_string()))
}
