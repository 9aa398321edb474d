//! Fixtures shared by the integration tests.
//!
//! ONNX models are tiny single-node graphs encoded by hand, so the tests need
//! no binary fixtures checked into the repository.
#![allow(dead_code)]

use std::fs::File;
use std::path::{Path, PathBuf};

use ndarray::ArrayD;
use ndarray_npy::{write_npy, NpzReader, NpzWriter};

/// ONNX `TensorProto.DataType` codes.
pub const ONNX_FLOAT: u64 = 1;
pub const ONNX_INT64: u64 = 7;

/// Minimal protobuf message writer.
#[derive(Default)]
pub struct Proto(Vec<u8>);

impl Proto {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn varint(mut self, field: u32, value: u64) -> Self {
        push_varint(&mut self.0, u64::from(field) << 3);
        push_varint(&mut self.0, value);
        self
    }

    pub fn bytes(mut self, field: u32, data: &[u8]) -> Self {
        push_varint(&mut self.0, (u64::from(field) << 3) | 2);
        push_varint(&mut self.0, data.len() as u64);
        self.0.extend_from_slice(data);
        self
    }

    pub fn string(self, field: u32, value: &str) -> Self {
        self.bytes(field, value.as_bytes())
    }

    pub fn message(self, field: u32, message: Proto) -> Self {
        self.bytes(field, &message.0)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

fn push_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// `ValueInfoProto` for a tensor; `None` dims become a symbolic `batch` dimension.
fn value_info(name: &str, elem_type: u64, dims: &[Option<usize>]) -> Proto {
    let shape = dims.iter().fold(Proto::new(), |shape, dim| {
        let dim = match dim {
            Some(d) => Proto::new().varint(1, *d as u64),
            None => Proto::new().string(2, "batch"),
        };
        shape.message(1, dim)
    });
    let tensor_type = Proto::new().varint(1, elem_type).message(2, shape);
    let type_proto = Proto::new().message(1, tensor_type);
    Proto::new().string(1, name).message(2, type_proto)
}

fn node(op_type: &str, inputs: &[&str], outputs: &[&str]) -> Proto {
    let node = inputs.iter().fold(Proto::new(), |n, i| n.string(1, i));
    let node = outputs.iter().fold(node, |n, o| n.string(2, o));
    node.string(3, &format!("{}_0", op_type.to_lowercase()))
        .string(4, op_type)
}

fn model(graph: Proto) -> Vec<u8> {
    Proto::new()
        .varint(1, 8)
        .string(2, "ninfer-tests")
        .message(7, graph)
        .message(8, Proto::new().varint(2, 13))
        .into_bytes()
}

/// `output = Identity(input)` over float32 tensors of shape `dims`.
pub fn identity_model(input: &str, output: &str, dims: &[Option<usize>]) -> Vec<u8> {
    let graph = Proto::new()
        .message(1, node("Identity", &[input], &[output]))
        .string(2, "identity")
        .message(11, value_info(input, ONNX_FLOAT, dims))
        .message(12, value_info(output, ONNX_FLOAT, dims));
    model(graph)
}

/// `sum = Add(a, b)` over float32 tensors of shape `dims`.
pub fn add_model(dims: &[Option<usize>]) -> Vec<u8> {
    let graph = Proto::new()
        .message(1, node("Add", &["a", "b"], &["sum"]))
        .string(2, "add")
        .message(11, value_info("a", ONNX_FLOAT, dims))
        .message(11, value_info("b", ONNX_FLOAT, dims))
        .message(12, value_info("sum", ONNX_FLOAT, dims));
    model(graph)
}

/// `(copy, ids) = (Identity(x), Identity(ids_in))` with a float32 and an int64 branch.
pub fn two_output_model() -> Vec<u8> {
    let graph = Proto::new()
        .message(1, node("Identity", &["x"], &["copy"]))
        .message(1, node("Identity", &["ids_in"], &["ids"]).string(3, "identity_1"))
        .string(2, "two_outputs")
        .message(11, value_info("x", ONNX_FLOAT, &[Some(2)]))
        .message(11, value_info("ids_in", ONNX_INT64, &[Some(3)]))
        .message(12, value_info("copy", ONNX_FLOAT, &[Some(2)]))
        .message(12, value_info("ids", ONNX_INT64, &[Some(3)]));
    model(graph)
}

pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Deterministic float data of the given shape.
pub fn ramp(shape: &[usize]) -> ArrayD<f32> {
    let len: usize = shape.iter().product();
    let data = (0..len).map(|i| (i % 251) as f32 * 0.5 - 17.25).collect();
    ArrayD::from_shape_vec(shape.to_vec(), data).unwrap()
}

pub fn write_npy_file<T: ndarray_npy::WritableElement>(
    dir: &Path,
    name: &str,
    array: &ArrayD<T>,
) -> PathBuf {
    let path = dir.join(name);
    write_npy(&path, array).unwrap();
    path
}

pub fn write_npz_file(dir: &Path, name: &str, arrays: &[(&str, ArrayD<f32>)]) -> PathBuf {
    let path = dir.join(name);
    let mut npz = NpzWriter::new(File::create(&path).unwrap());
    for (key, array) in arrays {
        npz.add_array(*key, array).unwrap();
    }
    npz.finish().unwrap();
    path
}

/// Read one float32 output back from a result archive.
pub fn read_archive_f32(archive: &Path, output: &str) -> ArrayD<f32> {
    let mut npz = NpzReader::new(File::open(archive).unwrap()).unwrap();
    npz.by_name(&format!("{}.npy", output)).unwrap()
}

/// Raw zip entry names of an archive, sorted.
pub fn archive_entries(archive: &Path) -> Vec<String> {
    let zip = zip::ZipArchive::new(File::open(archive).unwrap()).unwrap();
    let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
    names.sort();
    names
}
