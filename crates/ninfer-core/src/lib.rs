//! Core library for ninfer.
//!
//! This crate provides:
//! - Model dispatch by file format (ONNX via ort, TFLite via tract)
//! - Dataset loading from NumPy `.npy` / `.npz` files
//! - Result archives of `.npy` outputs
//! - [`InferenceService`], which runs the whole sequence

pub mod archive;
pub mod config;
pub mod dataset;
pub mod dispatch;
pub mod error;
pub mod service;

pub use config::{Compression, NinferConfig};
pub use dataset::{DatasetContainer, NumpyLoader};
pub use dispatch::{LoadedModel, ModelDispatcher, ModelFormat};
pub use error::{NinferError, Result};
pub use service::{InferenceService, ServiceState};

/// Re-export inference types.
pub use ninfer_inference::{InferenceBackend, InferenceError, Tensor, TensorMap, TensorSpec, TensorType};
