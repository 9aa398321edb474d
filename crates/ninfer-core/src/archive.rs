//! Persisting output tensors as `.npy` files bundled into one zip archive.

use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use ndarray_npy::{write_npy, WriteNpyError};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::Compression;
use crate::error::{NinferError, Result};
use ninfer_inference::{Tensor, TensorMap};

/// File name used for an output tensor: path separators and `:` become `_`.
pub fn entry_file_name(output_name: &str) -> String {
    let stem: String = output_name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect();
    let stem = match stem.trim_matches('.') {
        "" => "output",
        trimmed => trimmed,
    };
    format!("{}.npy", stem)
}

/// Write every tensor to `<dir>/<name>.npy`, returning the written paths in order.
///
/// Names that collide after sanitizing get a numeric suffix.
pub fn save_tensors(dir: &Path, tensors: &TensorMap) -> Result<Vec<PathBuf>> {
    let mut used = HashSet::new();
    let mut paths = Vec::with_capacity(tensors.len());

    for (name, tensor) in tensors.iter() {
        let mut file_name = entry_file_name(name);
        let mut n = 1;
        while !used.insert(file_name.clone()) {
            file_name = format!("{}_{}.npy", entry_file_name(name).trim_end_matches(".npy"), n);
            n += 1;
        }

        let path = dir.join(&file_name);
        write_tensor(&path, tensor).map_err(|e| NinferError::persistence(&path, e))?;
        debug!("Saved output '{}' {:?} to {}", name, tensor.shape(), path.display());
        paths.push(path);
    }

    Ok(paths)
}

/// Bundle `files` into a zip archive at `archive`, replacing any existing file.
pub fn compress_files(files: &[PathBuf], archive: &Path, compression: Compression) -> Result<()> {
    let method = match compression {
        Compression::Deflated => CompressionMethod::Deflated,
        Compression::Stored => CompressionMethod::Stored,
    };
    let options = SimpleFileOptions::default().compression_method(method);

    let file = File::create(archive).map_err(|e| NinferError::persistence(archive, e))?;
    let mut zip = ZipWriter::new(file);

    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| NinferError::persistence(path, "not a file path"))?;

        zip.start_file(name, options)
            .map_err(|e| NinferError::persistence(archive, e))?;
        let mut source = File::open(path).map_err(|e| NinferError::persistence(path, e))?;
        io::copy(&mut source, &mut zip).map_err(|e| NinferError::persistence(archive, e))?;
    }

    zip.finish()
        .map_err(|e| NinferError::persistence(archive, e))?;

    debug!("Wrote {} entries to {}", files.len(), archive.display());
    Ok(())
}

fn write_tensor(path: &Path, tensor: &Tensor) -> std::result::Result<(), WriteNpyError> {
    match tensor {
        Tensor::Float32(arr) => write_npy(path, arr),
        Tensor::Float64(arr) => write_npy(path, arr),
        Tensor::Int32(arr) => write_npy(path, arr),
        Tensor::Int64(arr) => write_npy(path, arr),
        Tensor::Uint8(arr) => write_npy(path, arr),
        Tensor::Int8(arr) => write_npy(path, arr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;
    use ndarray_npy::NpzReader;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_entry_file_name() {
        assert_eq!(entry_file_name("boxes"), "boxes.npy");
        assert_eq!(entry_file_name("StatefulPartitionedCall:0"), "StatefulPartitionedCall_0.npy");
        assert_eq!(entry_file_name("../etc/passwd"), "_etc_passwd.npy");
        assert_eq!(entry_file_name(""), "output.npy");
    }

    #[test]
    fn test_save_and_compress() {
        let dir = tempfile::tempdir().unwrap();

        let mut outputs = TensorMap::new();
        outputs.insert("scores", Tensor::from_f32(vec![0.25, 0.75], &[1, 2]).unwrap());
        outputs.insert("labels", Tensor::from_i64(vec![3, 7], &[2]).unwrap());
        outputs.insert("a:0", Tensor::from_u8(vec![1], &[1]).unwrap());
        outputs.insert("a/0", Tensor::from_u8(vec![2], &[1]).unwrap());

        let files = save_tensors(dir.path(), &outputs).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["scores.npy", "labels.npy", "a_0.npy", "a_0_1.npy"]);

        let archive = dir.path().join("archive.zip");
        compress_files(&files, &archive, Compression::Deflated).unwrap();

        let mut reader = NpzReader::new(File::open(&archive).unwrap()).unwrap();
        assert_eq!(reader.len(), 4);

        let scores: ArrayD<f32> = reader.by_name("scores.npy").unwrap();
        assert_eq!(scores.shape(), &[1, 2]);
        assert_eq!(scores.iter().cloned().collect::<Vec<_>>(), vec![0.25, 0.75]);

        let labels: ArrayD<i64> = reader.by_name("labels.npy").unwrap();
        assert_eq!(labels.iter().cloned().collect::<Vec<_>>(), vec![3, 7]);
    }

    #[test]
    fn test_compress_overwrites_existing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("archive.zip");
        std::fs::write(&archive, b"stale").unwrap();

        let mut outputs = TensorMap::new();
        outputs.insert("y", Tensor::from_f32(vec![1.0], &[1]).unwrap());
        let files = save_tensors(dir.path(), &outputs).unwrap();
        compress_files(&files, &archive, Compression::Stored).unwrap();

        let reader = NpzReader::new(File::open(&archive).unwrap()).unwrap();
        assert_eq!(reader.len(), 1);
    }
}
