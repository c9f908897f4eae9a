//! Thin adapter over `ort` tensor values.
//!
//! Creation goes through `ndarray` because `Tensor::from_array((shape, data))`
//! rejects dimensions smaller than 1, and the empty KV cache needs a
//! `[1, heads, 0, head_dim]` tensor on the first generation step. The adapter
//! owns its buffers: each `own_*` call moves the data into the returned value,
//! so there is no lifetime to get wrong on the caller side.

use half::f16;
use ndarray::{ArrayD, IxDyn};
use ort::value::{DynValue, Value};

use crate::error::TtsError;

fn ix_dims(shape: &[i64]) -> Vec<usize> {
    shape.iter().map(|&d| d.max(0) as usize).collect()
}

/// Number of elements a shape describes; 0 for an empty shape or any
/// zero-size dimension.
pub fn element_count(shape: &[i64]) -> usize {
    if shape.is_empty() {
        return 0;
    }
    shape.iter().map(|&d| d.max(0) as usize).product()
}

macro_rules! own_impl {
    ($name:ident, $ty:ty) => {
        pub fn $name(shape: &[i64], data: Vec<$ty>) -> Result<DynValue, TtsError> {
            let array = ArrayD::<$ty>::from_shape_vec(IxDyn(&ix_dims(shape)), data)
                .map_err(|e| TtsError::Tensor(format!("shape {:?}: {}", shape, e)))?;
            let value = Value::from_array(array)
                .map_err(|e| TtsError::Tensor(format!("shape {:?}: {}", shape, e)))?;
            Ok(value.into_dyn())
        }
    };
}

own_impl!(own_f32, f32);
own_impl!(own_f16, f16);
own_impl!(own_i32, i32);
own_impl!(own_i64, i64);

/// Build an f16 tensor from f32 data, converting with IEEE-754
/// round-to-nearest-even.
pub fn own_f16_from_f32(shape: &[i64], data: &[f32]) -> Result<DynValue, TtsError> {
    own_f16(shape, data.iter().copied().map(f16::from_f32).collect())
}

/// Shape of a float or integer tensor value.
pub fn shape_of(value: &DynValue) -> Result<Vec<i64>, TtsError> {
    if let Ok((shape, _)) = value.try_extract_tensor::<f32>() {
        return Ok(shape.to_vec());
    }
    if let Ok((shape, _)) = value.try_extract_tensor::<f16>() {
        return Ok(shape.to_vec());
    }
    if let Ok((shape, _)) = value.try_extract_tensor::<i64>() {
        return Ok(shape.to_vec());
    }
    Err(TtsError::Tensor("unsupported tensor dtype".into()))
}

/// Copy a full tensor out as f32, accepting f32 or f16 storage.
pub fn extract_f32(value: &DynValue) -> Result<(Vec<i64>, Vec<f32>), TtsError> {
    if let Ok((shape, data)) = value.try_extract_tensor::<f32>() {
        return Ok((shape.to_vec(), data.to_vec()));
    }
    if let Ok((shape, data)) = value.try_extract_tensor::<f16>() {
        let data = data.iter().map(|v| v.to_f32()).collect();
        return Ok((shape.to_vec(), data));
    }
    Err(TtsError::Tensor("expected an f32 or f16 tensor".into()))
}

/// Copy only `[offset, offset + count)` out of a tensor as f32.
///
/// Reading the last position of a `[1, seq, vocab]` logits tensor this way
/// avoids copying the whole tensor once per generation step. Out-of-range
/// requests are clamped to the available elements.
pub fn extract_f32_slice(
    value: &DynValue,
    offset: usize,
    count: usize,
) -> Result<Vec<f32>, TtsError> {
    if let Ok((_, data)) = value.try_extract_tensor::<f32>() {
        let count = clamp_count(data.len(), offset, count);
        return Ok(data[offset..offset + count].to_vec());
    }
    if let Ok((_, data)) = value.try_extract_tensor::<f16>() {
        let count = clamp_count(data.len(), offset, count);
        return Ok(data[offset..offset + count].iter().map(|v| v.to_f32()).collect());
    }
    Err(TtsError::Tensor("expected an f32 or f16 tensor".into()))
}

/// Copy a full int64 tensor out.
pub fn extract_i64(value: &DynValue) -> Result<(Vec<i64>, Vec<i64>), TtsError> {
    let (shape, data) = value
        .try_extract_tensor::<i64>()
        .map_err(|e| TtsError::Tensor(format!("expected an i64 tensor: {}", e)))?;
    Ok((shape.to_vec(), data.to_vec()))
}

fn clamp_count(total: usize, offset: usize, count: usize) -> usize {
    if offset >= total {
        return 0;
    }
    count.min(total - offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_count_handles_zero_dims() {
        assert_eq!(element_count(&[]), 0);
        assert_eq!(element_count(&[1, 16, 0, 64]), 0);
        assert_eq!(element_count(&[2, 3, 4]), 24);
    }

    #[test]
    fn f16_conversion_is_round_to_nearest_even() {
        // Exactly representable values survive the round trip.
        for v in [0.0f32, -0.0, 1.0, -2.5, 0.5, 65504.0] {
            assert_eq!(f16::from_f32(v).to_f32(), v);
        }
        // 1.0 + 2^-11 is exactly halfway between two f16 values; RNE picks
        // the even mantissa, which is 1.0.
        let halfway = 1.0f32 + f32::powi(2.0, -11);
        assert_eq!(f16::from_f32(halfway).to_f32(), 1.0);
        assert!(f16::from_f32(1e6).to_f32().is_infinite());
    }

    #[test]
    fn slice_extraction_matches_full_extraction_f32() {
        let data: Vec<f32> = (0..24).map(|i| i as f32 * 0.25).collect();
        let value = own_f32(&[2, 3, 4], data).unwrap();

        let (_, full) = extract_f32(&value).unwrap();
        let slice = extract_f32_slice(&value, 8, 4).unwrap();
        assert_eq!(slice, full[8..12]);

        // Out-of-range requests clamp instead of panicking.
        assert_eq!(extract_f32_slice(&value, 22, 10).unwrap(), full[22..24]);
        assert!(extract_f32_slice(&value, 100, 4).unwrap().is_empty());
    }

    #[test]
    fn slice_extraction_matches_full_extraction_f16() {
        let data: Vec<f32> = (0..12).map(|i| i as f32 - 6.0).collect();
        let value = own_f16_from_f32(&[1, 3, 4], &data).unwrap();

        let (shape, full) = extract_f32(&value).unwrap();
        assert_eq!(shape, vec![1, 3, 4]);
        let slice = extract_f32_slice(&value, 4, 4).unwrap();
        assert_eq!(slice, full[4..8]);
    }

    #[test]
    fn zero_dim_tensor_round_trips() {
        let value = own_f32(&[1, 16, 0, 64], Vec::new()).unwrap();
        let (shape, data) = extract_f32(&value).unwrap();
        assert_eq!(shape, vec![1, 16, 0, 64]);
        assert!(data.is_empty());
    }

    #[test]
    fn i64_round_trip() {
        let value = own_i64(&[1, 5], vec![6561, 1, 2, 3, 6562]).unwrap();
        let (shape, data) = extract_i64(&value).unwrap();
        assert_eq!(shape, vec![1, 5]);
        assert_eq!(data, vec![6561, 1, 2, 3, 6562]);
    }
}
