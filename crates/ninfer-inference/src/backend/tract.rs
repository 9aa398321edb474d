//! Tract backend for `.tflite` models.

use std::path::Path;

use ndarray::ArrayD;
use tract_core::internal::DimLike;
use tract_core::prelude::Tensor as TractTensor;
use tract_core::prelude::*;
use tracing::debug;

use crate::error::InferenceError;
use crate::tensor::{Tensor, TensorMap, TensorSpec, TensorType};
use crate::{InferenceBackend, Result};

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Backend using Tract to run TensorFlow Lite flatbuffers.
pub struct TractBackend {
    model: Plan,
    inputs: Vec<TensorSpec>,
    outputs: Vec<TensorSpec>,
    /// Declared input types, quantization parameters included.
    input_types: Vec<DatumType>,
}

impl TractBackend {
    /// Load a model from a file path.
    ///
    /// Tract executes the plan on the calling thread, so a `num_threads` above 1
    /// is only recorded in the logs.
    pub fn from_file<P: AsRef<Path>>(path: P, num_threads: usize) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading TFLite model with Tract from: {}", path.display());

        let bytes = std::fs::read(path)?;

        Self::from_bytes(&bytes, num_threads)
    }

    /// Load a model from bytes.
    pub fn from_bytes(bytes: &[u8], num_threads: usize) -> Result<Self> {
        debug!("Loading TFLite model with Tract from {} bytes", bytes.len());
        if num_threads > 1 {
            debug!(
                "Tract runs single-threaded, ignoring thread hint of {}",
                num_threads
            );
        }

        let model = tract_tflite::tflite()
            .model_for_read(&mut std::io::Cursor::new(bytes))
            .map_err(|e| InferenceError::ModelLoad(format!("Failed to load model: {}", e)))?;

        let input_outlets = model
            .input_outlets()
            .map_err(|e| InferenceError::ModelLoad(e.to_string()))?
            .to_vec();

        let inputs = input_outlets
            .iter()
            .map(|&outlet| outlet_spec(&model, outlet))
            .collect::<Result<Vec<_>>>()?;

        let input_types = input_outlets
            .iter()
            .map(|&outlet| {
                model
                    .outlet_fact(outlet)
                    .map(|fact| fact.datum_type)
                    .map_err(|e| InferenceError::ModelLoad(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        let outputs = model
            .output_outlets()
            .map_err(|e| InferenceError::ModelLoad(e.to_string()))?
            .iter()
            .map(|&outlet| outlet_spec(&model, outlet))
            .collect::<Result<Vec<_>>>()?;

        debug!("Model inputs: {:?}", inputs);
        debug!("Model outputs: {:?}", outputs);

        let model = model
            .into_optimized()
            .map_err(|e| InferenceError::ModelLoad(format!("Failed to optimize: {}", e)))?
            .into_runnable()
            .map_err(|e| InferenceError::SessionCreate(e.to_string()))?;

        Ok(Self {
            model,
            inputs,
            outputs,
            input_types,
        })
    }

    fn convert_input(&self, tensor: &Tensor, declared: DatumType) -> Result<TValue> {
        let shape = tensor.shape().to_vec();
        let converted = match tensor {
            Tensor::Float32(arr) => to_tract(&shape, arr.iter().cloned().collect()),
            Tensor::Float64(arr) => to_tract(&shape, arr.iter().cloned().collect()),
            Tensor::Int32(arr) => to_tract(&shape, arr.iter().cloned().collect()),
            Tensor::Int64(arr) => to_tract(&shape, arr.iter().cloned().collect()),
            Tensor::Uint8(arr) => to_tract(&shape, arr.iter().cloned().collect()),
            Tensor::Int8(arr) => to_tract(&shape, arr.iter().cloned().collect()),
        };
        let converted = converted.map_err(|e| InferenceError::InvalidInput(e.to_string()))?;
        Ok(with_quantization(converted, declared).into_tvalue())
    }
}

impl InferenceBackend for TractBackend {
    fn input_specs(&self) -> &[TensorSpec] {
        &self.inputs
    }

    fn output_specs(&self) -> &[TensorSpec] {
        &self.outputs
    }

    fn run(&self, inputs: &TensorMap) -> Result<TensorMap> {
        self.validate_inputs(inputs)?;

        // Tract takes inputs positionally, in declared order.
        let tract_inputs: TVec<TValue> = self
            .inputs
            .iter()
            .zip(&self.input_types)
            .map(|(spec, &declared)| {
                let tensor = inputs.get(&spec.name).ok_or_else(|| {
                    InferenceError::InvalidInput(format!("missing input '{}'", spec.name))
                })?;
                self.convert_input(tensor, declared)
            })
            .collect::<Result<TVec<_>>>()?;

        let outputs = self
            .model
            .run(tract_inputs)
            .map_err(|e| InferenceError::InferenceFailed(e.to_string()))?;

        let mut results = TensorMap::with_capacity(outputs.len());

        for (idx, output) in outputs.iter().enumerate() {
            let name = self
                .outputs
                .get(idx)
                .map(|spec| spec.name.clone())
                .unwrap_or_else(|| format!("output_{}", idx));

            let tensor = if let Ok(arr) = output.to_array_view::<f32>() {
                Tensor::Float32(from_view(arr.shape(), arr.iter().cloned().collect())?)
            } else if let Ok(arr) = output.to_array_view::<i64>() {
                Tensor::Int64(from_view(arr.shape(), arr.iter().cloned().collect())?)
            } else if let Ok(arr) = output.to_array_view::<i32>() {
                Tensor::Int32(from_view(arr.shape(), arr.iter().cloned().collect())?)
            } else if let Ok(arr) = output.to_array_view::<f64>() {
                Tensor::Float64(from_view(arr.shape(), arr.iter().cloned().collect())?)
            } else if let Ok(arr) = output.to_array_view::<u8>() {
                Tensor::Uint8(from_view(arr.shape(), arr.iter().cloned().collect())?)
            } else if let Ok(arr) = output.to_array_view::<i8>() {
                Tensor::Int8(from_view(arr.shape(), arr.iter().cloned().collect())?)
            } else {
                return Err(InferenceError::OutputExtraction(format!(
                    "unsupported output type {:?} for '{}'",
                    output.datum_type(),
                    name
                )));
            };

            results.insert(name, tensor);
        }

        Ok(results)
    }
}

/// Build a spec from a typed outlet, preferring the outlet label over the node name.
fn outlet_spec(model: &TypedModel, outlet: OutletId) -> Result<TensorSpec> {
    let name = model
        .outlet_label(outlet)
        .map(str::to_string)
        .unwrap_or_else(|| model.node(outlet.node).name.clone());

    let fact = model
        .outlet_fact(outlet)
        .map_err(|e| InferenceError::ModelLoad(e.to_string()))?;

    let dtype = tensor_type(fact.datum_type.unquantized()).ok_or_else(|| {
        InferenceError::ModelLoad(format!(
            "'{}' has unsupported element type {:?}",
            name, fact.datum_type
        ))
    })?;

    let shape = fact.shape.iter().map(|d| d.to_usize().ok()).collect();

    Ok(TensorSpec::new(name, shape, dtype))
}

fn tensor_type(dt: DatumType) -> Option<TensorType> {
    match dt {
        DatumType::F32 => Some(TensorType::Float32),
        DatumType::F64 => Some(TensorType::Float64),
        DatumType::I32 => Some(TensorType::Int32),
        DatumType::I64 => Some(TensorType::Int64),
        DatumType::U8 => Some(TensorType::Uint8),
        DatumType::I8 => Some(TensorType::Int8),
        _ => None,
    }
}

fn to_tract<T: Datum>(shape: &[usize], data: Vec<T>) -> TractResult<TractTensor> {
    let arr = tract_ndarray::ArrayD::from_shape_vec(tract_ndarray::IxDyn(shape), data)?;
    Ok(TractTensor::from(arr))
}

/// Attach the declared quantization parameters to raw integer data.
///
/// Quantized inputs are loaded as their storage type; the runtime only
/// accepts them once tagged with the exact quantized type of the model input.
fn with_quantization(mut tensor: TractTensor, declared: DatumType) -> TractTensor {
    if declared.is_quantized() && declared.unquantized() == tensor.datum_type() {
        // SAFETY: a quantized type shares the element layout of its storage type.
        unsafe { tensor.set_datum_type(declared) };
    }
    tensor
}

fn from_view<T: Clone>(shape: &[usize], data: Vec<T>) -> Result<ArrayD<T>> {
    ArrayD::from_shape_vec(ndarray::IxDyn(shape), data)
        .map_err(|e| InferenceError::OutputExtraction(e.to_string()))
}
