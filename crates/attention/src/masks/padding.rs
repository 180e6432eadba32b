//! Builders for padding masks used to drop padded keys.

use candle_core::{Device, Result, Tensor};

use super::{MASK_DTYPE, MASK_FILL};

/// Construct a `(batch, 1, q_len, k_len)` mask from per-batch valid key lengths.
///
/// Lengths larger than `k_len` are clamped.
pub fn padding_mask_from_lengths(
    device: &Device,
    key_lengths: &[usize],
    q_len: usize,
    k_len: usize,
) -> Result<Tensor> {
    let batch = key_lengths.len();
    let mut data = Vec::with_capacity(batch * q_len * k_len);
    for &valid in key_lengths {
        let valid = valid.min(k_len);
        for _ in 0..q_len {
            data.extend((0..k_len).map(|k| if k < valid { 0.0 } else { MASK_FILL }));
        }
    }
    Tensor::from_vec(data, (batch, 1, q_len, k_len), device)
}

/// Construct a padding mask from boolean indicators, `true` marking padding.
///
/// Every inner slice is one batch element and all of them must share a length.
pub fn padding_mask_from_booleans(device: &Device, padding: &[Vec<bool>], q_len: usize) -> Result<Tensor> {
    let Some(first) = padding.first() else {
        return Tensor::zeros((0, 1, q_len, 0), MASK_DTYPE, device);
    };
    let k_len = first.len();
    if let Some(bad) = padding.iter().find(|row| row.len() != k_len) {
        candle_core::bail!(
            "all boolean padding rows must share k_len {k_len}, found {}",
            bad.len()
        );
    }

    let mut data = Vec::with_capacity(padding.len() * q_len * k_len);
    for row in padding {
        for _ in 0..q_len {
            data.extend(row.iter().map(|&pad| if pad { MASK_FILL } else { 0.0 }));
        }
    }
    Tensor::from_vec(data, (padding.len(), 1, q_len, k_len), device)
}
