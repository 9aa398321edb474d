//! Error types for the inference layer.

use thiserror::Error;

/// Errors that can occur while loading or running a model.
#[derive(Error, Debug)]
pub enum InferenceError {
    /// Failed to load the model file.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// Failed to create an inference session or runnable plan.
    #[error("failed to create session: {0}")]
    SessionCreate(String),

    /// Missing input, or input with the wrong shape or type.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Inference execution failed.
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    /// Output tensor extraction failed.
    #[error("failed to extract output: {0}")]
    OutputExtraction(String),

    /// The backend for this format was not compiled in.
    #[error("{backend} support is not enabled (rebuild with feature `{feature}`)")]
    FeatureDisabled {
        backend: &'static str,
        feature: &'static str,
    },

    /// I/O error when loading model files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
