//! Host-side tensors staged for collectives.
//!
//! A [`Tensor`] is a flat, typed byte buffer; elements are stored
//! little-endian so backends can hand the bytes to a transport unchanged.
//! [`Staged`] is what a collective actually consumes: one tensor, or one
//! tensor per peer.

mod reduce;

pub use reduce::reduce_into;

use crate::error::{BenchError, Result};
use crate::types::{DataType, ReduceOp};
use half::{bf16, f16};
use rand::Rng;

/// A flat buffer of `numel` elements of one [`DataType`].
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    dtype: DataType,
    data: Vec<u8>,
}

impl Tensor {
    /// Zero-initialized tensor.
    pub fn zeros(numel: usize, dtype: DataType) -> Self {
        Self {
            dtype,
            data: vec![0u8; numel * dtype.size_in_bytes()],
        }
    }

    /// Tensor with every element set to `value` (cast to `dtype`).
    pub fn full(numel: usize, dtype: DataType, value: f64) -> Self {
        let mut t = Self::zeros(numel, dtype);
        t.fill(value);
        t
    }

    /// Build a tensor from `f64` values, casting each to `dtype`.
    pub fn from_values(values: &[f64], dtype: DataType) -> Self {
        let mut t = Self::zeros(values.len(), dtype);
        for (i, &v) in values.iter().enumerate() {
            t.set(i, v);
        }
        t
    }

    /// Random tensor. Floats are uniform in `[0, 1)` divided by `scale`
    /// (when non-zero), integers uniform in `[0, 10)`, bools a fair coin.
    pub fn random<R: Rng + ?Sized>(rng: &mut R, numel: usize, dtype: DataType, scale: f64) -> Self {
        let mut t = Self::zeros(numel, dtype);
        for i in 0..numel {
            let v = match dtype {
                DataType::Bool => f64::from(u8::from(rng.random_bool(0.5))),
                d if d.is_float() => {
                    let x: f64 = rng.random();
                    if scale != 0.0 { x / scale } else { x }
                }
                _ => f64::from(rng.random_range(0u8..10)),
            };
            t.set(i, v);
        }
        t
    }

    /// Wrap raw little-endian bytes.
    pub fn from_bytes(data: Vec<u8>, dtype: DataType) -> Result<Self> {
        let elem = dtype.size_in_bytes();
        if data.len() % elem != 0 {
            return Err(BenchError::BufferSizeMismatch {
                expected: data.len().div_ceil(elem) * elem,
                actual: data.len(),
            });
        }
        Ok(Self { dtype, data })
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    /// Number of elements.
    pub fn numel(&self) -> usize {
        self.data.len() / self.dtype.size_in_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Element `i` widened to `f64`.
    ///
    /// # Panics
    /// Panics if `i >= numel()`.
    pub fn get(&self, i: usize) -> f64 {
        let size = self.dtype.size_in_bytes();
        decode(self.dtype, &self.data[i * size..(i + 1) * size])
    }

    /// Store `value` at element `i`, cast to the tensor's dtype.
    ///
    /// # Panics
    /// Panics if `i >= numel()`.
    pub fn set(&mut self, i: usize, value: f64) {
        let size = self.dtype.size_in_bytes();
        encode(self.dtype, value, &mut self.data[i * size..(i + 1) * size]);
    }

    pub fn fill(&mut self, value: f64) {
        let size = self.dtype.size_in_bytes();
        let mut elem = [0u8; 8];
        encode(self.dtype, value, &mut elem[..size]);
        for chunk in self.data.chunks_exact_mut(size) {
            chunk.copy_from_slice(&elem[..size]);
        }
    }

    /// All elements widened to `f64`.
    pub fn to_values(&self) -> Vec<f64> {
        (0..self.numel()).map(|i| self.get(i)).collect()
    }

    /// Copy of `len` elements starting at element `start`.
    pub fn slice(&self, start: usize, len: usize) -> Result<Tensor> {
        if start + len > self.numel() {
            return Err(BenchError::BufferSizeMismatch {
                expected: start + len,
                actual: self.numel(),
            });
        }
        let size = self.dtype.size_in_bytes();
        Ok(Tensor {
            dtype: self.dtype,
            data: self.data[start * size..(start + len) * size].to_vec(),
        })
    }

    /// Concatenate tensors of one dtype into a flat tensor.
    pub fn concat(parts: &[Tensor], dtype: DataType) -> Result<Tensor> {
        let mut data = Vec::with_capacity(parts.iter().map(Tensor::size_in_bytes).sum());
        for part in parts {
            if part.dtype != dtype {
                return Err(BenchError::UnsupportedDType {
                    dtype: part.dtype,
                    op: "concat",
                });
            }
            data.extend_from_slice(&part.data);
        }
        Ok(Tensor { dtype, data })
    }

    /// Overwrite this tensor's contents with `src`, which must match in
    /// dtype and length.
    pub fn copy_from(&mut self, src: &Tensor) -> Result<()> {
        self.check_compatible(src)?;
        self.data.copy_from_slice(&src.data);
        Ok(())
    }

    /// `self[i] = op(self[i], other[i])` for every element.
    pub fn reduce_with(&mut self, other: &Tensor, op: ReduceOp) -> Result<()> {
        self.check_compatible(other)?;
        let count = self.numel();
        reduce_into(&mut self.data, &other.data, count, self.dtype, op)
    }

    fn check_compatible(&self, other: &Tensor) -> Result<()> {
        if self.dtype != other.dtype {
            return Err(BenchError::UnsupportedDType {
                dtype: other.dtype,
                op: "copy",
            });
        }
        if self.data.len() != other.data.len() {
            return Err(BenchError::BufferSizeMismatch {
                expected: self.numel(),
                actual: other.numel(),
            });
        }
        Ok(())
    }
}

/// Buffers handed to a collective: a single tensor or one tensor per peer.
#[derive(Debug, Clone, PartialEq)]
pub enum Staged {
    Single(Tensor),
    List(Vec<Tensor>),
}

impl Default for Staged {
    fn default() -> Self {
        Staged::List(Vec::new())
    }
}

impl Staged {
    /// Total element count across all tensors.
    pub fn numel(&self) -> usize {
        match self {
            Staged::Single(t) => t.numel(),
            Staged::List(ts) => ts.iter().map(Tensor::numel).sum(),
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Staged::List(_))
    }

    /// True when no tensor is staged at all.
    pub fn is_unstaged(&self) -> bool {
        matches!(self, Staged::List(ts) if ts.is_empty())
    }

    pub fn tensors(&self) -> &[Tensor] {
        match self {
            Staged::Single(t) => std::slice::from_ref(t),
            Staged::List(ts) => ts,
        }
    }

    pub fn tensors_mut(&mut self) -> &mut [Tensor] {
        match self {
            Staged::Single(t) => std::slice::from_mut(t),
            Staged::List(ts) => ts,
        }
    }

    /// The single tensor, or an error naming `operation` if this is a list.
    pub fn single(&self, operation: &'static str) -> Result<&Tensor> {
        match self {
            Staged::Single(t) => Ok(t),
            Staged::List(_) => Err(BenchError::config(format!(
                "{operation} expects a single staged tensor, got a list"
            ))),
        }
    }

    /// Tensor `idx` of a list, or an error naming `operation`.
    pub fn part(&self, idx: usize, operation: &'static str) -> Result<&Tensor> {
        match self {
            Staged::List(ts) => ts.get(idx).ok_or(BenchError::BufferSizeMismatch {
                expected: idx + 1,
                actual: ts.len(),
            }),
            Staged::Single(_) => Err(BenchError::config(format!(
                "{operation} expects a staged tensor list, got a single tensor"
            ))),
        }
    }

    /// The last element of the last tensor, read back to force completion of
    /// any lazily evaluated buffer.
    pub fn flush(&self) -> Option<f64> {
        self.tensors()
            .iter()
            .rev()
            .find(|t| !t.is_empty())
            .map(|t| t.get(t.numel() - 1))
    }
}

fn decode(dtype: DataType, bytes: &[u8]) -> f64 {
    match dtype {
        DataType::F32 => f32::from_le_bytes(le(bytes)) as f64,
        DataType::F64 => f64::from_le_bytes(le(bytes)),
        DataType::F16 => f16::from_le_bytes(le(bytes)).to_f64(),
        DataType::BF16 => bf16::from_le_bytes(le(bytes)).to_f64(),
        DataType::I32 => i32::from_le_bytes(le(bytes)) as f64,
        DataType::I64 => i64::from_le_bytes(le(bytes)) as f64,
        DataType::U8 => bytes[0] as f64,
        DataType::Bool => {
            if bytes[0] != 0 {
                1.0
            } else {
                0.0
            }
        }
    }
}

fn encode(dtype: DataType, value: f64, out: &mut [u8]) {
    match dtype {
        DataType::F32 => out.copy_from_slice(&(value as f32).to_le_bytes()),
        DataType::F64 => out.copy_from_slice(&value.to_le_bytes()),
        DataType::F16 => out.copy_from_slice(&f16::from_f64(value).to_le_bytes()),
        DataType::BF16 => out.copy_from_slice(&bf16::from_f64(value).to_le_bytes()),
        DataType::I32 => out.copy_from_slice(&(value as i32).to_le_bytes()),
        DataType::I64 => out.copy_from_slice(&(value as i64).to_le_bytes()),
        DataType::U8 => out[0] = value as u8,
        DataType::Bool => out[0] = u8::from(value != 0.0),
    }
}

/// Copy a byte slice into a fixed-size array. Callers always slice exactly
/// `N` bytes, so the zero fallback is unreachable.
fn le<const N: usize>(bytes: &[u8]) -> [u8; N] {
    bytes.try_into().unwrap_or([0u8; N])
}

/// Round `value` through `dtype`, giving the value a tensor of that dtype
/// would actually hold.
pub fn cast(value: f64, dtype: DataType) -> f64 {
    let mut buf = [0u8; 8];
    let size = dtype.size_in_bytes();
    encode(dtype, value, &mut buf[..size]);
    decode(dtype, &buf[..size])
}
