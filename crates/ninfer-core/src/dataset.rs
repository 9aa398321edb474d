//! Loading input tensors from NumPy `.npy` / `.npz` files.

use std::io::{Cursor, Read, Seek};
use std::path::Path;

use ndarray::ArrayD;
use ndarray_npy::{NpzReader, ReadNpyError, ReadNpyExt, ReadNpzError};
use tracing::debug;

use crate::error::{NinferError, Result};
use ninfer_inference::{Tensor, TensorMap, TensorSpec, TensorType};

const NPY_MAGIC: &[u8] = b"\x93NUMPY";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";

/// Container layout of a dataset file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetContainer {
    /// A single unnamed array.
    Npy,
    /// A zip of named `.npy` arrays.
    Npz,
}

impl DatasetContainer {
    /// Detect the container from its magic bytes.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(NPY_MAGIC) {
            Some(DatasetContainer::Npy)
        } else if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(ZIP_EMPTY_MAGIC) {
            Some(DatasetContainer::Npz)
        } else {
            None
        }
    }
}

/// Loads a dataset file into tensors keyed by the model's input names.
///
/// Arrays are bound by name first. With positional fallback enabled, a lone
/// array feeds a lone input, and numpy's default `arr_0 .. arr_N` entries are
/// bound in declared input order. Arrays are read with the declared element
/// type and never converted.
#[derive(Debug, Clone)]
pub struct NumpyLoader {
    positional_fallback: bool,
}

impl Default for NumpyLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl NumpyLoader {
    /// Create a loader with positional fallback enabled.
    pub fn new() -> Self {
        Self {
            positional_fallback: true,
        }
    }

    /// Enable or disable positional fallback binding.
    pub fn with_positional_fallback(mut self, enabled: bool) -> Self {
        self.positional_fallback = enabled;
        self
    }

    /// Load `path` against the declared input specs.
    pub fn load(&self, path: impl AsRef<Path>, specs: &[TensorSpec]) -> Result<TensorMap> {
        let path = path.as_ref();
        debug!("Loading dataset from: {}", path.display());

        let bytes = std::fs::read(path).map_err(|e| NinferError::dataset_read(path, e))?;

        let tensors = match DatasetContainer::detect(&bytes) {
            Some(DatasetContainer::Npy) => self.load_npy(path, bytes, specs)?,
            Some(DatasetContainer::Npz) => self.load_npz(path, bytes, specs)?,
            None => {
                return Err(NinferError::dataset_read(
                    path,
                    "unrecognized container, expected a .npy or .npz file",
                ));
            }
        };

        debug!(
            "Loaded {} arrays: {:?}",
            tensors.len(),
            tensors.names().collect::<Vec<_>>()
        );

        Ok(tensors)
    }

    fn load_npy(&self, path: &Path, bytes: Vec<u8>, specs: &[TensorSpec]) -> Result<TensorMap> {
        let [spec] = specs else {
            return Err(NinferError::DatasetMismatch(format!(
                "dataset holds a single unnamed array but the model declares {} inputs",
                specs.len()
            )));
        };

        if !self.positional_fallback {
            return Err(NinferError::DatasetMismatch(format!(
                "dataset holds a single unnamed array and positional fallback is disabled; \
                 store it as '{}' in an .npz file",
                spec.name
            )));
        }

        let tensor = read_npy(Cursor::new(bytes), spec.dtype)
            .map_err(|e| npy_error(path, "<unnamed>", spec, e))?;

        let mut tensors = TensorMap::with_capacity(1);
        tensors.insert(spec.name.clone(), tensor);
        Ok(tensors)
    }

    fn load_npz(&self, path: &Path, bytes: Vec<u8>, specs: &[TensorSpec]) -> Result<TensorMap> {
        let mut reader =
            NpzReader::new(Cursor::new(bytes)).map_err(|e| NinferError::dataset_read(path, e))?;

        // `names()` already drops the `.npy` suffix numpy adds to every member.
        let entries = reader
            .names()
            .map_err(|e| NinferError::dataset_read(path, e))?;

        let bindings = self.bind(specs, &entries)?;

        let mut tensors = TensorMap::with_capacity(bindings.len());
        for (spec, entry) in bindings {
            let tensor = read_npz_entry(&mut reader, entry, spec.dtype).map_err(|e| match e {
                ReadNpzError::Npy(inner) => npy_error(path, entry, spec, inner),
                other => NinferError::dataset_read(path, other),
            })?;
            tensors.insert(spec.name.clone(), tensor);
        }

        Ok(tensors)
    }

    /// Pair every declared input with the archive entry that feeds it.
    fn bind<'a>(
        &self,
        specs: &'a [TensorSpec],
        entries: &'a [String],
    ) -> Result<Vec<(&'a TensorSpec, &'a str)>> {
        let by_name: Option<Vec<_>> = specs
            .iter()
            .map(|spec| {
                entries
                    .iter()
                    .find(|e| **e == spec.name)
                    .map(|e| (spec, e.as_str()))
            })
            .collect();

        if let Some(bindings) = by_name {
            if entries.len() > bindings.len() {
                debug!(
                    "Ignoring {} dataset arrays not declared as model inputs",
                    entries.len() - bindings.len()
                );
            }
            return Ok(bindings);
        }

        if self.positional_fallback && entries.len() == specs.len() {
            if let ([spec], [entry]) = (specs, entries) {
                debug!("Binding array '{}' to input '{}'", entry, spec.name);
                return Ok(vec![(spec, entry.as_str())]);
            }

            let positional: Option<Vec<_>> = (0..specs.len())
                .map(|i| {
                    let key = format!("arr_{}", i);
                    entries.iter().find(|e| **e == key).map(String::as_str)
                })
                .collect();
            if let Some(ordered) = positional {
                debug!("Binding {} positional arrays in input order", ordered.len());
                return Ok(specs.iter().zip(ordered).collect());
            }
        }

        let missing: Vec<&str> = specs
            .iter()
            .filter(|spec| !entries.contains(&spec.name))
            .map(|spec| spec.name.as_str())
            .collect();
        let available: Vec<&str> = entries.iter().map(String::as_str).collect();

        Err(NinferError::DatasetMismatch(format!(
            "model inputs {:?} not found in dataset arrays {:?}",
            missing, available
        )))
    }
}

fn npy_error(path: &Path, entry: &str, spec: &TensorSpec, err: ReadNpyError) -> NinferError {
    match err {
        ReadNpyError::WrongDescriptor(_) => NinferError::DatasetMismatch(format!(
            "array '{}' is not stored as {} as input '{}' requires",
            entry, spec.dtype, spec.name
        )),
        other => NinferError::dataset_read(path, other),
    }
}

fn read_npy<R: Read>(reader: R, dtype: TensorType) -> std::result::Result<Tensor, ReadNpyError> {
    let tensor = match dtype {
        TensorType::Float32 => Tensor::Float32(ArrayD::read_npy(reader)?),
        TensorType::Float64 => Tensor::Float64(ArrayD::read_npy(reader)?),
        TensorType::Int32 => Tensor::Int32(ArrayD::read_npy(reader)?),
        TensorType::Int64 => Tensor::Int64(ArrayD::read_npy(reader)?),
        TensorType::Uint8 => Tensor::Uint8(ArrayD::read_npy(reader)?),
        TensorType::Int8 => Tensor::Int8(ArrayD::read_npy(reader)?),
    };
    Ok(tensor)
}

fn read_npz_entry<R: Read + Seek>(
    reader: &mut NpzReader<R>,
    name: &str,
    dtype: TensorType,
) -> std::result::Result<Tensor, ReadNpzError> {
    let tensor = match dtype {
        TensorType::Float32 => Tensor::Float32(reader.by_name(name)?),
        TensorType::Float64 => Tensor::Float64(reader.by_name(name)?),
        TensorType::Int32 => Tensor::Int32(reader.by_name(name)?),
        TensorType::Int64 => Tensor::Int64(reader.by_name(name)?),
        TensorType::Uint8 => Tensor::Uint8(reader.by_name(name)?),
        TensorType::Int8 => Tensor::Int8(reader.by_name(name)?),
    };
    Ok(tensor)
}
