//! Element-wise reduction over little-endian byte buffers.

use crate::error::{BenchError, Result};
use crate::types::{DataType, ReduceOp};
use half::{bf16, f16};

/// Types that support the four reduction operations.
trait Reducible: Copy + 'static {
    fn reduce(a: Self, b: Self, op: ReduceOp) -> Self;
}

macro_rules! impl_reducible {
    (int: $($ty:ty),*) => {
        $(
            impl Reducible for $ty {
                #[inline]
                fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::Sum => a.wrapping_add(b),
                        ReduceOp::Prod => a.wrapping_mul(b),
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                    }
                }
            }
        )*
    };
    (float: $($ty:ty),*) => {
        $(
            impl Reducible for $ty {
                #[inline]
                fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::Sum => a + b,
                        ReduceOp::Prod => a * b,
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                    }
                }
            }
        )*
    };
    (half: $($ty:ty),*) => {
        $(
            impl Reducible for $ty {
                #[inline]
                fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
                    let (x, y) = (a.to_f32(), b.to_f32());
                    let r = match op {
                        ReduceOp::Sum => x + y,
                        ReduceOp::Prod => x * y,
                        ReduceOp::Min => x.min(y),
                        ReduceOp::Max => x.max(y),
                    };
                    <$ty>::from_f32(r)
                }
            }
        )*
    };
}

impl_reducible!(int: i32, i64, u8);
impl_reducible!(float: f32, f64);
impl_reducible!(half: f16, bf16);

/// Boolean stored as one byte. Sum and max are logical or; prod and min
/// are logical and, so a sum over `true` inputs stays `true`.
#[derive(Clone, Copy)]
struct Flag(u8);

impl Reducible for Flag {
    #[inline]
    fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
        let (x, y) = (a.0 != 0, b.0 != 0);
        let r = match op {
            ReduceOp::Sum | ReduceOp::Max => x || y,
            ReduceOp::Prod | ReduceOp::Min => x && y,
        };
        Flag(u8::from(r))
    }
}

/// Read/write one element from a little-endian byte slice.
trait LeBytes: Sized {
    const SIZE: usize;
    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(self, bytes: &mut [u8]);
}

macro_rules! impl_le_bytes {
    ($($ty:ty),*) => {
        $(
            impl LeBytes for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();
                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    Self::from_le_bytes(raw)
                }
                #[inline]
                fn write_le(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_le_bytes!(i32, i64, u8, f32, f64, f16, bf16);

impl LeBytes for Flag {
    const SIZE: usize = 1;
    #[inline]
    fn read_le(bytes: &[u8]) -> Self {
        Flag(bytes[0])
    }
    #[inline]
    fn write_le(self, bytes: &mut [u8]) {
        bytes[0] = self.0;
    }
}

/// `dst[i] = op(dst[i], src[i])` for `count` elements of `dtype`.
///
/// Both slices must hold at least `count * dtype.size_in_bytes()` bytes.
pub fn reduce_into(
    dst: &mut [u8],
    src: &[u8],
    count: usize,
    dtype: DataType,
    op: ReduceOp,
) -> Result<()> {
    let needed = count * dtype.size_in_bytes();
    if dst.len() < needed || src.len() < needed {
        return Err(BenchError::BufferSizeMismatch {
            expected: needed,
            actual: dst.len().min(src.len()),
        });
    }
    match dtype {
        DataType::F32 => reduce_typed::<f32>(dst, src, count, op),
        DataType::F64 => reduce_typed::<f64>(dst, src, count, op),
        DataType::F16 => reduce_typed::<f16>(dst, src, count, op),
        DataType::BF16 => reduce_typed::<bf16>(dst, src, count, op),
        DataType::I32 => reduce_typed::<i32>(dst, src, count, op),
        DataType::I64 => reduce_typed::<i64>(dst, src, count, op),
        DataType::U8 => reduce_typed::<u8>(dst, src, count, op),
        DataType::Bool => reduce_typed::<Flag>(dst, src, count, op),
    }
    Ok(())
}

fn reduce_typed<T: Reducible + LeBytes>(dst: &mut [u8], src: &[u8], count: usize, op: ReduceOp) {
    let t_size = T::SIZE;
    for i in 0..count {
        let off = i * t_size;
        let a = T::read_le(&dst[off..off + t_size]);
        let b = T::read_le(&src[off..off + t_size]);
        T::reduce(a, b, op).write_le(&mut dst[off..off + t_size]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_f32(v: &[f32]) -> Vec<u8> {
        v.iter().flat_map(|x| x.to_le_bytes()).collect()
    }

    #[test]
    fn test_reduce_sum_f32() {
        let mut dst = bytes_f32(&[1.0, 2.0, 3.0, 4.0]);
        let src = bytes_f32(&[10.0, 20.0, 30.0, 40.0]);
        reduce_into(&mut dst, &src, 4, DataType::F32, ReduceOp::Sum).unwrap();
        assert_eq!(dst, bytes_f32(&[11.0, 22.0, 33.0, 44.0]));
    }

    #[test]
    fn test_reduce_min_max_i64() {
        let a: Vec<u8> = [5i64, -3].iter().flat_map(|x| x.to_le_bytes()).collect();
        let b: Vec<u8> = [2i64, 7].iter().flat_map(|x| x.to_le_bytes()).collect();

        let mut min = a.clone();
        reduce_into(&mut min, &b, 2, DataType::I64, ReduceOp::Min).unwrap();
        let mut max = a;
        reduce_into(&mut max, &b, 2, DataType::I64, ReduceOp::Max).unwrap();

        let read = |v: &[u8]| -> Vec<i64> {
            v.chunks_exact(8)
                .map(|c| i64::from_le_bytes(c.try_into().unwrap()))
                .collect()
        };
        assert_eq!(read(&min), vec![2, -3]);
        assert_eq!(read(&max), vec![5, 7]);
    }

    #[test]
    fn test_reduce_u8_wraps() {
        let mut dst = vec![250u8];
        reduce_into(&mut dst, &[10u8], 1, DataType::U8, ReduceOp::Sum).unwrap();
        assert_eq!(dst, vec![4u8]);
    }

    #[test]
    fn test_reduce_f16_sum() {
        let mut dst: Vec<u8> = f16::from_f32(1.5).to_le_bytes().to_vec();
        let src = f16::from_f32(2.0).to_le_bytes();
        reduce_into(&mut dst, &src, 1, DataType::F16, ReduceOp::Sum).unwrap();
        assert_eq!(f16::from_le_bytes([dst[0], dst[1]]).to_f32(), 3.5);
    }

    #[test]
    fn test_bool_sum_is_logical_or() {
        let mut dst = vec![1u8, 0, 0];
        reduce_into(&mut dst, &[1u8, 1, 0], 3, DataType::Bool, ReduceOp::Sum).unwrap();
        assert_eq!(dst, vec![1, 1, 0]);

        let mut dst = vec![1u8, 0];
        reduce_into(&mut dst, &[1u8, 1], 2, DataType::Bool, ReduceOp::Prod).unwrap();
        assert_eq!(dst, vec![1, 0]);
    }

    #[test]
    fn test_reduce_short_buffer() {
        let mut dst = vec![0u8; 4];
        let src = vec![0u8; 8];
        let err = reduce_into(&mut dst, &src, 2, DataType::F32, ReduceOp::Sum).unwrap_err();
        assert!(matches!(err, BenchError::BufferSizeMismatch { .. }));
    }
}
