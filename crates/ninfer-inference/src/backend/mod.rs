//! Inference backend implementations.

#[cfg(feature = "onnx")]
pub mod ort;

#[cfg(feature = "tflite")]
pub mod tract;

use crate::error::InferenceError;
use crate::{Result, TensorMap, TensorSpec};

/// Trait for model inference backends.
///
/// Each implementation wraps one runtime and hides its naming and tensor
/// layout conventions behind declared specs and a named tensor map.
pub trait InferenceBackend: Send + Sync {
    /// Declared model inputs, in model order.
    fn input_specs(&self) -> &[TensorSpec];

    /// Declared model outputs, in model order.
    fn output_specs(&self) -> &[TensorSpec];

    /// Run inference to completion.
    ///
    /// # Arguments
    /// * `inputs` - Named input tensors; entries not declared by the model are ignored
    ///
    /// # Returns
    /// Named output tensors in declared output order
    fn run(&self, inputs: &TensorMap) -> Result<TensorMap>;

    /// Get the input names expected by the model.
    fn input_names(&self) -> Vec<&str> {
        self.input_specs().iter().map(|s| s.name.as_str()).collect()
    }

    /// Get the output names produced by the model.
    fn output_names(&self) -> Vec<&str> {
        self.output_specs().iter().map(|s| s.name.as_str()).collect()
    }

    /// Check that every declared input is present with a compatible shape and type.
    fn validate_inputs(&self, inputs: &TensorMap) -> Result<()> {
        validate_inputs(self.input_specs(), inputs)
    }
}

/// Check `inputs` against declared specs.
pub fn validate_inputs(specs: &[TensorSpec], inputs: &TensorMap) -> Result<()> {
    for spec in specs {
        let tensor = inputs.get(&spec.name).ok_or_else(|| {
            InferenceError::InvalidInput(format!("missing input '{}'", spec.name))
        })?;

        if tensor.dtype() != spec.dtype {
            return Err(InferenceError::InvalidInput(format!(
                "input '{}' has type {}, model expects {}",
                spec.name,
                tensor.dtype(),
                spec.dtype
            )));
        }

        if !spec.accepts(tensor) {
            return Err(InferenceError::InvalidInput(format!(
                "input '{}' has shape {:?}, model expects {}",
                spec.name,
                tensor.shape(),
                spec
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Tensor, TensorType};

    fn specs() -> Vec<TensorSpec> {
        vec![
            TensorSpec::new("image", vec![None, Some(3)], TensorType::Float32),
            TensorSpec::fixed("ids", &[2], TensorType::Int64),
        ]
    }

    #[test]
    fn test_validate_accepts_superset() {
        let mut inputs = TensorMap::new();
        inputs.insert("image", Tensor::from_f32(vec![0.0; 6], &[2, 3]).unwrap());
        inputs.insert("ids", Tensor::from_i64(vec![1, 2], &[2]).unwrap());
        inputs.insert("unused", Tensor::from_u8(vec![0], &[1]).unwrap());

        assert!(validate_inputs(&specs(), &inputs).is_ok());
    }

    #[test]
    fn test_validate_reports_missing_input() {
        let mut inputs = TensorMap::new();
        inputs.insert("image", Tensor::from_f32(vec![0.0; 3], &[1, 3]).unwrap());

        let err = validate_inputs(&specs(), &inputs).unwrap_err();
        assert!(matches!(err, InferenceError::InvalidInput(ref msg) if msg.contains("'ids'")));
    }

    #[test]
    fn test_validate_reports_type_and_shape() {
        let mut inputs = TensorMap::new();
        inputs.insert("image", Tensor::from_f32(vec![0.0; 4], &[1, 4]).unwrap());
        inputs.insert("ids", Tensor::from_i64(vec![1, 2], &[2]).unwrap());
        let err = validate_inputs(&specs(), &inputs).unwrap_err();
        assert!(err.to_string().contains("shape"));

        let mut inputs = TensorMap::new();
        inputs.insert("image", Tensor::from_u8(vec![0; 3], &[1, 3]).unwrap());
        inputs.insert("ids", Tensor::from_i64(vec![1, 2], &[2]).unwrap());
        let err = validate_inputs(&specs(), &inputs).unwrap_err();
        assert!(err.to_string().contains("uint8"));
    }
}
