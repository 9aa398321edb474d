//! Model format detection and backend selection.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{NinferError, Result};
use ninfer_inference::{InferenceBackend, TensorMap, TensorSpec};

/// Serialized model formats ninfer can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFormat {
    /// ONNX protobuf, run with ONNX Runtime.
    Onnx,
    /// TensorFlow Lite flatbuffer, run with Tract.
    Tflite,
}

impl ModelFormat {
    /// Resolve the format from a file extension (without the dot).
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_lowercase().as_str() {
            "onnx" => Some(ModelFormat::Onnx),
            "tflite" => Some(ModelFormat::Tflite),
            _ => None,
        }
    }

    /// Resolve the format from a model path.
    pub fn from_path(path: &Path) -> Result<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
            .ok_or_else(|| NinferError::UnsupportedFormat {
                path: path.to_path_buf(),
            })
    }

    /// Guess the format from the first bytes of a model file.
    ///
    /// TFLite flatbuffers carry the `TFL3` identifier at offset 4. ONNX models
    /// normally open with the `ir_version` field (protobuf tag `0x08`).
    pub fn sniff(header: &[u8]) -> Option<Self> {
        if header.len() >= 8 && &header[4..8] == b"TFL3" {
            Some(ModelFormat::Tflite)
        } else if header.first() == Some(&0x08) {
            Some(ModelFormat::Onnx)
        } else {
            None
        }
    }

    /// Canonical file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            ModelFormat::Onnx => "onnx",
            ModelFormat::Tflite => "tflite",
        }
    }
}

impl fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelFormat::Onnx => write!(f, "ONNX"),
            ModelFormat::Tflite => write!(f, "TFLite"),
        }
    }
}

/// A model loaded into the backend matching its format.
pub struct LoadedModel {
    path: PathBuf,
    format: ModelFormat,
    backend: Box<dyn InferenceBackend>,
}

impl LoadedModel {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ModelFormat {
        self.format
    }

    pub fn backend(&self) -> &dyn InferenceBackend {
        self.backend.as_ref()
    }

    pub fn input_specs(&self) -> &[TensorSpec] {
        self.backend.input_specs()
    }

    pub fn output_specs(&self) -> &[TensorSpec] {
        self.backend.output_specs()
    }

    /// Run the backend, wrapping runtime failures with their cause.
    pub fn run(&self, inputs: &TensorMap) -> Result<TensorMap> {
        self.backend.run(inputs).map_err(NinferError::Inference)
    }
}

impl fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModel")
            .field("path", &self.path)
            .field("format", &self.format)
            .field("inputs", &self.input_specs())
            .field("outputs", &self.output_specs())
            .finish()
    }
}

/// Selects and constructs the backend for a model file.
#[derive(Debug, Clone, Copy)]
pub struct ModelDispatcher {
    num_threads: usize,
}

impl ModelDispatcher {
    /// Create a dispatcher passing `num_threads` to every backend it builds.
    pub fn new(num_threads: usize) -> Self {
        Self { num_threads }
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Load `path` with the backend its extension selects.
    pub fn select(&self, path: impl AsRef<Path>) -> Result<LoadedModel> {
        let path = path.as_ref();
        let format = ModelFormat::from_path(path)?;

        if self.num_threads == 0 {
            return Err(NinferError::Config(
                "thread count must be at least 1".to_string(),
            ));
        }

        check_contents(path, format);

        debug!("Selected {} backend for {}", format, path.display());

        let backend = load_backend(format, path, self.num_threads)
            .map_err(|source| NinferError::BackendLoad { format, source })?;

        let inputs = backend.input_specs().len();
        if inputs > 1 {
            info!("{} has {} nodes for input layer", path.display(), inputs);
        }
        let outputs = backend.output_specs().len();
        if outputs > 1 {
            info!("{} has {} nodes for output layer", path.display(), outputs);
        }

        Ok(LoadedModel {
            path: path.to_path_buf(),
            format,
            backend,
        })
    }
}

/// Warn when the file contents look like a different format than the extension says.
fn check_contents(path: &Path, format: ModelFormat) {
    let mut header = [0u8; 8];
    let read = File::open(path).and_then(|mut f| f.read(&mut header));
    let Ok(n) = read else {
        return;
    };

    match ModelFormat::sniff(&header[..n]) {
        Some(detected) if detected != format => warn!(
            "{} has a .{} extension but its contents look like {}",
            path.display(),
            format.extension(),
            detected
        ),
        _ => {}
    }
}

fn load_backend(
    format: ModelFormat,
    path: &Path,
    num_threads: usize,
) -> ninfer_inference::Result<Box<dyn InferenceBackend>> {
    match format {
        ModelFormat::Onnx => {
            #[cfg(feature = "onnx")]
            {
                Ok(Box::new(ninfer_inference::OrtBackend::from_file(
                    path,
                    num_threads,
                )?))
            }
            #[cfg(not(feature = "onnx"))]
            {
                let _ = (path, num_threads);
                Err(ninfer_inference::InferenceError::FeatureDisabled {
                    backend: "ONNX",
                    feature: "onnx",
                })
            }
        }
        ModelFormat::Tflite => {
            #[cfg(feature = "tflite")]
            {
                Ok(Box::new(ninfer_inference::TractBackend::from_file(
                    path,
                    num_threads,
                )?))
            }
            #[cfg(not(feature = "tflite"))]
            {
                let _ = (path, num_threads);
                Err(ninfer_inference::InferenceError::FeatureDisabled {
                    backend: "TFLite",
                    feature: "tflite",
                })
            }
        }
    }
}
