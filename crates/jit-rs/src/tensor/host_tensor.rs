//! Host-backed tensor used for constants, attribute payloads and traced values.

use super::dtype::ScalarType;
use anyhow::{bail, ensure, Result};
use half::f16;
use std::fmt;
use std::sync::Arc;

/// Scalar types that can be packed into a [`Tensor`].
pub trait Element: Copy {
    const SCALAR_TYPE: ScalarType;

    fn write_le(self, out: &mut Vec<u8>);
}

macro_rules! impl_element {
    ($ty:ty, $scalar:expr) => {
        impl Element for $ty {
            const SCALAR_TYPE: ScalarType = $scalar;

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
        }
    };
}

impl_element!(f64, ScalarType::Double);
impl_element!(f32, ScalarType::Float);
impl_element!(f16, ScalarType::Half);
impl_element!(u8, ScalarType::Byte);
impl_element!(i8, ScalarType::Char);
impl_element!(i16, ScalarType::Short);
impl_element!(i32, ScalarType::Int);
impl_element!(i64, ScalarType::Long);

/// Row-major strides for `sizes`.
pub fn contiguous_strides(sizes: &[i64]) -> Vec<i64> {
    let mut strides = vec![1i64; sizes.len()];
    for axis in (0..sizes.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * sizes[axis + 1].max(1);
    }
    strides
}

/// Dense tensor with shared byte storage.
///
/// Clones share storage, so [`Tensor::storage_key`] identifies the underlying
/// buffer across clones the way a data pointer would.
#[derive(Clone)]
pub struct Tensor {
    scalar_type: ScalarType,
    sizes: Vec<i64>,
    strides: Vec<i64>,
    data: Arc<[u8]>,
}

impl Tensor {
    /// Packs `values` into a contiguous tensor of the given sizes.
    pub fn from_slice<T: Element>(sizes: &[i64], values: &[T]) -> Result<Self> {
        let numel = numel(sizes)?;
        ensure!(
            values.len() == numel,
            "tensor data length ({}) does not match sizes {:?}",
            values.len(),
            sizes
        );
        let mut bytes = Vec::with_capacity(numel * T::SCALAR_TYPE.size_in_bytes());
        for value in values {
            value.write_le(&mut bytes);
        }
        Ok(Tensor {
            scalar_type: T::SCALAR_TYPE,
            sizes: sizes.to_vec(),
            strides: contiguous_strides(sizes),
            data: bytes.into(),
        })
    }

    /// Wraps raw little-endian bytes laid out contiguously.
    pub fn from_bytes(scalar_type: ScalarType, sizes: &[i64], bytes: Vec<u8>) -> Result<Self> {
        let expected = numel(sizes)? * scalar_type.size_in_bytes();
        if bytes.len() != expected {
            bail!(
                "byte length {} does not match {} tensor of sizes {:?} ({} bytes expected)",
                bytes.len(),
                scalar_type.name(),
                sizes,
                expected
            );
        }
        Ok(Tensor {
            scalar_type,
            sizes: sizes.to_vec(),
            strides: contiguous_strides(sizes),
            data: bytes.into(),
        })
    }

    /// Zero-dimensional tensor holding `value` converted to `scalar_type`.
    pub fn scalar(value: f64, scalar_type: ScalarType) -> Self {
        let mut bytes = Vec::with_capacity(scalar_type.size_in_bytes());
        match scalar_type {
            ScalarType::Double => value.write_le(&mut bytes),
            ScalarType::Float => (value as f32).write_le(&mut bytes),
            ScalarType::Half => f16::from_f64(value).write_le(&mut bytes),
            ScalarType::Byte => (value as u8).write_le(&mut bytes),
            ScalarType::Char => (value as i8).write_le(&mut bytes),
            ScalarType::Short => (value as i16).write_le(&mut bytes),
            ScalarType::Int => (value as i32).write_le(&mut bytes),
            ScalarType::Long => (value as i64).write_le(&mut bytes),
        }
        Tensor {
            scalar_type,
            sizes: Vec::new(),
            strides: Vec::new(),
            data: bytes.into(),
        }
    }

    /// Zero-filled contiguous tensor.
    pub fn zeros(scalar_type: ScalarType, sizes: &[i64]) -> Result<Self> {
        let len = numel(sizes)? * scalar_type.size_in_bytes();
        Self::from_bytes(scalar_type, sizes, vec![0u8; len])
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.scalar_type
    }

    pub fn sizes(&self) -> &[i64] {
        &self.sizes
    }

    pub fn strides(&self) -> &[i64] {
        &self.strides
    }

    pub fn dim(&self) -> usize {
        self.sizes.len()
    }

    pub fn numel(&self) -> usize {
        self.sizes.iter().map(|&s| s.max(0) as usize).product()
    }

    pub fn is_contiguous(&self) -> bool {
        self.strides == contiguous_strides(&self.sizes)
    }

    /// Reinterprets the storage with new strides without copying.
    ///
    /// Every element addressed by the new layout must lie inside the storage.
    pub fn as_strided(&self, sizes: &[i64], strides: &[i64]) -> Result<Self> {
        ensure!(
            sizes.len() == strides.len(),
            "sizes {:?} and strides {:?} have different ranks",
            sizes,
            strides
        );
        let elem = self.scalar_type.size_in_bytes();
        let storage_elems = self.data.len() / elem;
        if sizes.iter().all(|&s| s > 0) {
            let max_offset: i64 = sizes.iter().zip(strides).map(|(s, st)| (s - 1) * st).sum();
            ensure!(
                strides.iter().all(|&s| s >= 0) && (max_offset as usize) < storage_elems.max(1),
                "strided view {:?}/{:?} exceeds storage of {} elements",
                sizes,
                strides,
                storage_elems
            );
        }
        Ok(Tensor {
            scalar_type: self.scalar_type,
            sizes: sizes.to_vec(),
            strides: strides.to_vec(),
            data: Arc::clone(&self.data),
        })
    }

    /// Returns a tensor with the same values laid out in row-major order.
    ///
    /// Already contiguous tensors share storage with `self`.
    pub fn contiguous(&self) -> Tensor {
        if self.is_contiguous() {
            return self.clone();
        }
        let elem = self.scalar_type.size_in_bytes();
        let mut out = Vec::with_capacity(self.numel() * elem);
        self.for_each_offset(|offset| {
            let start = offset * elem;
            out.extend_from_slice(&self.data[start..start + elem]);
        });
        Tensor {
            scalar_type: self.scalar_type,
            sizes: self.sizes.clone(),
            strides: contiguous_strides(&self.sizes),
            data: out.into(),
        }
    }

    /// Raw little-endian bytes of the contiguous layout.
    pub fn raw_bytes(&self) -> Vec<u8> {
        if self.is_contiguous() {
            let len = self.numel() * self.scalar_type.size_in_bytes();
            return self.data[..len].to_vec();
        }
        self.contiguous().data.to_vec()
    }

    /// Identity of the underlying storage, stable across clones and views.
    pub fn storage_key(&self) -> usize {
        Arc::as_ptr(&self.data) as *const u8 as usize
    }

    /// Converts every element (in row-major order) to `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        let elem = self.scalar_type.size_in_bytes();
        let mut values = Vec::with_capacity(self.numel());
        self.for_each_offset(|offset| {
            let bytes = &self.data[offset * elem..(offset + 1) * elem];
            values.push(decode_f64(self.scalar_type, bytes));
        });
        values
    }

    /// Converts every element to `i64`, truncating floating point values.
    pub fn to_i64_vec(&self) -> Vec<i64> {
        self.to_f64_vec().into_iter().map(|v| v as i64).collect()
    }

    fn for_each_offset(&self, mut visit: impl FnMut(usize)) {
        if self.numel() == 0 {
            return;
        }
        let rank = self.sizes.len();
        let mut index = vec![0i64; rank];
        loop {
            let offset: i64 = index.iter().zip(&self.strides).map(|(i, s)| i * s).sum();
            visit(offset as usize);
            let mut axis = rank;
            loop {
                if axis == 0 {
                    return;
                }
                axis -= 1;
                index[axis] += 1;
                if index[axis] < self.sizes[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }
    }
}

fn numel(sizes: &[i64]) -> Result<usize> {
    let mut total = 1usize;
    for &size in sizes {
        ensure!(size >= 0, "negative size in {:?}", sizes);
        total *= size as usize;
    }
    Ok(total)
}

fn decode_f64(scalar_type: ScalarType, bytes: &[u8]) -> f64 {
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    match scalar_type {
        ScalarType::Double => f64::from_le_bytes(buf),
        ScalarType::Float => f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
        ScalarType::Half => f16::from_le_bytes([buf[0], buf[1]]).to_f64(),
        ScalarType::Byte => buf[0] as f64,
        ScalarType::Char => buf[0] as i8 as f64,
        ScalarType::Short => i16::from_le_bytes([buf[0], buf[1]]) as f64,
        ScalarType::Int => i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
        ScalarType::Long => i64::from_le_bytes(buf) as f64,
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.scalar_type == other.scalar_type
            && self.sizes == other.sizes
            && self.raw_bytes() == other.raw_bytes()
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("scalar_type", &self.scalar_type)
            .field("sizes", &self.sizes)
            .field("strides", &self.strides)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sizes.is_empty() {
            let value = self.to_f64_vec().first().copied().unwrap_or_default();
            return write!(f, "{value}");
        }
        write!(f, "<Tensor>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_gathers_transposed_view() {
        let base = Tensor::from_slice(&[2, 3], &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0])
            .expect("tensor");
        let transposed = base.as_strided(&[3, 2], &[1, 3]).expect("view");
        assert!(!transposed.is_contiguous());
        let dense = transposed.contiguous();
        assert!(dense.is_contiguous());
        assert_eq!(dense.to_f64_vec(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert_eq!(transposed.storage_key(), base.storage_key());
    }

    #[test]
    fn scalar_converts_to_requested_kind() {
        let t = Tensor::scalar(3.0, ScalarType::Long);
        assert_eq!(t.dim(), 0);
        assert_eq!(t.raw_bytes(), 3i64.to_le_bytes().to_vec());
        assert_eq!(Tensor::scalar(0.5, ScalarType::Half).to_f64_vec(), vec![0.5]);
    }

    #[test]
    fn equality_compares_values_not_layout() {
        let a = Tensor::from_slice(&[2, 2], &[1i32, 2, 3, 4]).expect("a");
        let b = Tensor::from_slice(&[2, 2], &[1i32, 3, 2, 4])
            .expect("b")
            .as_strided(&[2, 2], &[1, 2])
            .expect("view");
        assert_eq!(a, b);
        assert_ne!(a, Tensor::from_slice(&[4], &[1i32, 2, 3, 4]).expect("flat"));
    }
}
