//! Inference backend layer for ninfer.
//!
//! This crate provides a unified interface over two runtimes:
//! - `ort` (ONNX Runtime) for `.onnx` models
//! - `tract` for `.tflite` models
//!
//! Both report declared input/output specs and run on named tensor maps.

mod backend;
mod error;
mod tensor;

pub use backend::{validate_inputs, InferenceBackend};
pub use error::InferenceError;
pub use tensor::{Tensor, TensorMap, TensorSpec, TensorType};

#[cfg(feature = "onnx")]
pub use backend::ort::OrtBackend;

#[cfg(feature = "tflite")]
pub use backend::tract::TractBackend;

/// Result type for inference operations.
pub type Result<T> = std::result::Result<T, InferenceError>;
