//! Error types for the ninfer-core library.

use std::path::PathBuf;

use thiserror::Error;

use crate::dispatch::ModelFormat;
use ninfer_inference::InferenceError;

/// Boxed cause carried by errors that wrap foreign failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for the ninfer library.
#[derive(Error, Debug)]
pub enum NinferError {
    /// Model file extension is not one of the recognized formats.
    #[error("unsupported model format: {} (expected .onnx or .tflite)", path.display())]
    UnsupportedFormat { path: PathBuf },

    /// Dataset contents cannot be bound to the model's declared inputs.
    #[error("dataset does not match model inputs: {0}")]
    DatasetMismatch(String),

    /// Dataset file cannot be opened or parsed.
    #[error("failed to read dataset {}: {source}", path.display())]
    DatasetRead {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    /// The runtime rejected the model file.
    #[error("failed to load {format} model: {source}")]
    BackendLoad {
        format: ModelFormat,
        #[source]
        source: InferenceError,
    },

    /// The runtime rejected the inputs or failed mid-execution.
    #[error("inference failed: {0}")]
    Inference(#[source] InferenceError),

    /// Writing output tensors or the result archive failed.
    #[error("failed to persist results to {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NinferError {
    pub(crate) fn dataset_read(path: impl Into<PathBuf>, source: impl Into<BoxError>) -> Self {
        NinferError::DatasetRead {
            path: path.into(),
            source: source.into(),
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, source: impl Into<BoxError>) -> Self {
        NinferError::Persistence {
            path: path.into(),
            source: source.into(),
        }
    }
}

/// Result type for the ninfer library.
pub type Result<T> = std::result::Result<T, NinferError>;
