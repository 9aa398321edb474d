//! Tensor types shared by every backend.

use std::fmt;

use ndarray::{ArrayD, IxDyn};

use crate::error::InferenceError;
use crate::Result;

/// Supported tensor element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorType {
    Float32,
    Float64,
    Int32,
    Int64,
    Uint8,
    Int8,
}

impl TensorType {
    /// Numpy-style name of the element type.
    pub fn as_str(&self) -> &'static str {
        match self {
            TensorType::Float32 => "float32",
            TensorType::Float64 => "float64",
            TensorType::Int32 => "int32",
            TensorType::Int64 => "int64",
            TensorType::Uint8 => "uint8",
            TensorType::Int8 => "int8",
        }
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dense, typed, shaped array.
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    Float32(ArrayD<f32>),
    Float64(ArrayD<f64>),
    Int32(ArrayD<i32>),
    Int64(ArrayD<i64>),
    Uint8(ArrayD<u8>),
    Int8(ArrayD<i8>),
}

impl Tensor {
    /// Get the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        match self {
            Tensor::Float32(arr) => arr.shape(),
            Tensor::Float64(arr) => arr.shape(),
            Tensor::Int32(arr) => arr.shape(),
            Tensor::Int64(arr) => arr.shape(),
            Tensor::Uint8(arr) => arr.shape(),
            Tensor::Int8(arr) => arr.shape(),
        }
    }

    /// Get the data type of the tensor.
    pub fn dtype(&self) -> TensorType {
        match self {
            Tensor::Float32(_) => TensorType::Float32,
            Tensor::Float64(_) => TensorType::Float64,
            Tensor::Int32(_) => TensorType::Int32,
            Tensor::Int64(_) => TensorType::Int64,
            Tensor::Uint8(_) => TensorType::Uint8,
            Tensor::Int8(_) => TensorType::Int8,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create a Float32 tensor from raw data and shape.
    pub fn from_f32(data: Vec<f32>, shape: &[usize]) -> Result<Self> {
        let arr = ArrayD::from_shape_vec(IxDyn(shape), data)
            .map_err(|e| InferenceError::InvalidInput(e.to_string()))?;
        Ok(Tensor::Float32(arr))
    }

    /// Create an Int64 tensor from raw data and shape.
    pub fn from_i64(data: Vec<i64>, shape: &[usize]) -> Result<Self> {
        let arr = ArrayD::from_shape_vec(IxDyn(shape), data)
            .map_err(|e| InferenceError::InvalidInput(e.to_string()))?;
        Ok(Tensor::Int64(arr))
    }

    /// Create a Uint8 tensor from raw data and shape.
    pub fn from_u8(data: Vec<u8>, shape: &[usize]) -> Result<Self> {
        let arr = ArrayD::from_shape_vec(IxDyn(shape), data)
            .map_err(|e| InferenceError::InvalidInput(e.to_string()))?;
        Ok(Tensor::Uint8(arr))
    }

    /// Try to get the inner Float32 array.
    pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
        match self {
            Tensor::Float32(arr) => Some(arr),
            _ => None,
        }
    }

    /// Try to get the inner Int64 array.
    pub fn as_i64(&self) -> Option<&ArrayD<i64>> {
        match self {
            Tensor::Int64(arr) => Some(arr),
            _ => None,
        }
    }

    /// Try to get the inner Uint8 array.
    pub fn as_u8(&self) -> Option<&ArrayD<u8>> {
        match self {
            Tensor::Uint8(arr) => Some(arr),
            _ => None,
        }
    }
}

/// Declared signature of one model input or output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSpec {
    pub name: String,
    /// `None` marks a dynamic dimension.
    pub shape: Vec<Option<usize>>,
    pub dtype: TensorType,
}

impl TensorSpec {
    pub fn new(name: impl Into<String>, shape: Vec<Option<usize>>, dtype: TensorType) -> Self {
        Self {
            name: name.into(),
            shape,
            dtype,
        }
    }

    /// Spec with every dimension fixed.
    pub fn fixed(name: impl Into<String>, shape: &[usize], dtype: TensorType) -> Self {
        Self::new(name, shape.iter().map(|&d| Some(d)).collect(), dtype)
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Whether every dimension is known.
    pub fn is_static(&self) -> bool {
        self.shape.iter().all(Option::is_some)
    }

    /// Check dtype, rank and every fixed dimension against a tensor.
    pub fn accepts(&self, tensor: &Tensor) -> bool {
        if tensor.dtype() != self.dtype || tensor.shape().len() != self.rank() {
            return false;
        }
        self.shape
            .iter()
            .zip(tensor.shape())
            .all(|(declared, &actual)| declared.is_none_or(|d| d == actual))
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self
            .shape
            .iter()
            .map(|d| d.map_or_else(|| "?".to_string(), |d| d.to_string()))
            .collect();
        write!(f, "{}: {}[{}]", self.name, self.dtype, dims.join(", "))
    }
}

/// Insertion-ordered mapping from tensor name to tensor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TensorMap {
    entries: Vec<(String, Tensor)>,
}

impl TensorMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Insert a tensor, replacing an existing entry with the same name in place.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, tensor)),
            None => {
                self.entries.push((name, tensor));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), t))
    }
}

impl FromIterator<(String, Tensor)> for TensorMap {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        let mut map = TensorMap::new();
        for (name, tensor) in iter {
            map.insert(name, tensor);
        }
        map
    }
}

impl IntoIterator for TensorMap {
    type Item = (String, Tensor);
    type IntoIter = std::vec::IntoIter<(String, Tensor)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
