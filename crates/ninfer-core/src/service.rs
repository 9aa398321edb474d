//! End-to-end inference run: dispatch, load, infer, persist.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info, info_span, Span};

use crate::archive;
use crate::config::{Compression, NinferConfig};
use crate::dataset::NumpyLoader;
use crate::dispatch::{LoadedModel, ModelDispatcher};
use crate::error::{NinferError, Result};
use ninfer_inference::TensorMap;

/// Progress of an [`InferenceService`] through its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Constructed,
    ModelLoaded,
    DataLoaded,
    Inferred,
    Persisted,
}

/// Runs one model over one dataset and archives the outputs.
///
/// Construction loads the model and the dataset and reserves a private temp
/// directory; [`run`](Self::run) infers and writes the archive into it. The
/// directory is removed when the service is dropped or [`close`](Self::close)d,
/// so copy the archive out with [`copy_archive_to`](Self::copy_archive_to) if it
/// must outlive the service.
///
/// Every service carries its own `inference_service` tracing span; logs emitted
/// while it works are recorded inside that span.
pub struct InferenceService {
    model_path: PathBuf,
    dataset_path: PathBuf,
    model: LoadedModel,
    inputs: TensorMap,
    result_dir: TempDir,
    archive_path: PathBuf,
    compression: Compression,
    state: ServiceState,
    span: Span,
}

impl InferenceService {
    /// Load `model_path` and `dataset_path` with default settings and `num_threads`.
    pub fn new(
        model_path: impl AsRef<Path>,
        dataset_path: impl AsRef<Path>,
        num_threads: usize,
    ) -> Result<Self> {
        let config = NinferConfig::default().with_num_threads(num_threads);
        Self::with_config(model_path, dataset_path, &config)
    }

    /// Load `model_path` and `dataset_path` with an explicit configuration.
    pub fn with_config(
        model_path: impl AsRef<Path>,
        dataset_path: impl AsRef<Path>,
        config: &NinferConfig,
    ) -> Result<Self> {
        let model_path = model_path.as_ref().to_path_buf();
        let dataset_path = dataset_path.as_ref().to_path_buf();
        config.validate()?;

        let span = info_span!(
            "inference_service",
            model = %model_path.display(),
            dataset = %dataset_path.display()
        );

        let (model, inputs, result_dir) = span.in_scope(|| -> Result<_> {
            debug!("state: {:?}", ServiceState::Constructed);

            let model = ModelDispatcher::new(config.runtime.num_threads).select(&model_path)?;
            debug!("state: {:?}", ServiceState::ModelLoaded);

            let inputs = NumpyLoader::new()
                .with_positional_fallback(config.dataset.positional_fallback)
                .load(&dataset_path, model.input_specs())?;
            debug!("state: {:?}", ServiceState::DataLoaded);

            let result_dir = make_temp_dir(config.output.temp_root.as_deref())?;
            debug!("Results go to {}", result_dir.path().display());

            Ok((model, inputs, result_dir))
        })?;

        let archive_path = result_dir.path().join(&config.output.archive_name);

        Ok(Self {
            model_path,
            dataset_path,
            model,
            inputs,
            result_dir,
            archive_path,
            compression: config.output.compression,
            state: ServiceState::DataLoaded,
            span,
        })
    }

    /// Run the model over the loaded inputs.
    pub fn infer(&mut self) -> Result<TensorMap> {
        let outputs = self.span.in_scope(|| self.model.run(&self.inputs))?;
        self.state = ServiceState::Inferred;
        Ok(outputs)
    }

    /// Save each output as `<name>.npy` and bundle them into the result archive.
    pub fn persist(&mut self, outputs: &TensorMap) -> Result<&Path> {
        let _entered = self.span.enter();

        let files = archive::save_tensors(self.result_dir.path(), outputs)?;
        archive::compress_files(&files, &self.archive_path, self.compression)?;
        self.state = ServiceState::Persisted;

        debug!("Archived {} outputs to {}", files.len(), self.archive_path.display());
        Ok(&self.archive_path)
    }

    /// Infer and persist, returning the archive path.
    ///
    /// Calling this again re-runs inference and overwrites the archive.
    pub fn run(&mut self) -> Result<&Path> {
        let outputs = self.infer()?;
        self.span
            .in_scope(|| info!("Inference success: {}", self.model_path.display()));
        self.persist(&outputs)
    }

    /// Copy the archive to `dest`, returning the number of bytes copied.
    pub fn copy_archive_to(&self, dest: impl AsRef<Path>) -> Result<u64> {
        if self.state != ServiceState::Persisted {
            return Err(NinferError::persistence(
                &self.archive_path,
                "no archive has been written yet",
            ));
        }
        let dest = dest.as_ref();
        std::fs::copy(&self.archive_path, dest).map_err(|e| NinferError::persistence(dest, e))
    }

    /// Remove the result directory now, reporting any I/O failure.
    pub fn close(self) -> Result<()> {
        let dir = self.result_dir.path().to_path_buf();
        self.result_dir
            .close()
            .map_err(|e| NinferError::persistence(dir, e))
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn model(&self) -> &LoadedModel {
        &self.model
    }

    pub fn inputs(&self) -> &TensorMap {
        &self.inputs
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn dataset_path(&self) -> &Path {
        &self.dataset_path
    }

    /// Temp directory holding the `.npy` files and the archive.
    pub fn result_dir(&self) -> &Path {
        self.result_dir.path()
    }

    /// Where the archive is (or will be) written.
    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }
}

fn make_temp_dir(root: Option<&Path>) -> Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("ninfer-");
    let dir = match root {
        Some(root) => builder.tempdir_in(root),
        None => builder.tempdir(),
    };
    dir.map_err(|e| NinferError::persistence(root.unwrap_or(&std::env::temp_dir()), e))
}
