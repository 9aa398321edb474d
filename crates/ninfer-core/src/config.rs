//! Configuration structures for an inference run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NinferError, Result};

/// Main configuration for ninfer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NinferConfig {
    /// Runtime configuration.
    pub runtime: RuntimeConfig,

    /// Dataset loading configuration.
    pub dataset: DatasetConfig,

    /// Result archive configuration.
    pub output: OutputConfig,
}

/// Backend runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Threads the backend may use internally (1 = single-threaded).
    pub num_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { num_threads: 1 }
    }
}

/// Dataset loading configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Bind unnamed or `arr_N` arrays to inputs by position when names don't match.
    pub positional_fallback: bool,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            positional_fallback: true,
        }
    }
}

/// Compression applied to archive entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Deflated,
    Stored,
}

/// Result archive configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// File name of the archive inside the result directory.
    pub archive_name: String,

    /// Compression method for archive entries.
    pub compression: Compression,

    /// Parent directory for per-run temp directories (system temp dir if unset).
    pub temp_root: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            archive_name: "archive.zip".to_string(),
            compression: Compression::Deflated,
            temp_root: None,
        }
    }
}

impl NinferConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| NinferError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| NinferError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check values that serde cannot constrain.
    pub fn validate(&self) -> Result<()> {
        if self.runtime.num_threads == 0 {
            return Err(NinferError::Config(
                "runtime.num_threads must be at least 1".to_string(),
            ));
        }

        let name = Path::new(&self.output.archive_name);
        if self.output.archive_name.is_empty() || name.file_name() != Some(name.as_os_str()) {
            return Err(NinferError::Config(format!(
                "output.archive_name must be a plain file name, got '{}'",
                self.output.archive_name
            )));
        }

        // Outputs are written as `<name>.npy` next to the archive.
        if self.output.archive_name.to_ascii_lowercase().ends_with(".npy") {
            return Err(NinferError::Config(format!(
                "output.archive_name '{}' would collide with an output file",
                self.output.archive_name
            )));
        }

        Ok(())
    }

    /// Copy of this configuration with a different thread count.
    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.runtime.num_threads = num_threads;
        self
    }
}
