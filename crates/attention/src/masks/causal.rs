//! Builders for causal attention masks.

use candle_core::{Device, Result, Tensor};

use super::MASK_FILL;

/// Construct a `(batch, 1, q_len, k_len)` causal mask.
///
/// When `k_len > q_len`, queries are aligned with the most recent `q_len`
/// keys, so every query also sees the extended prefix.
pub fn build_causal_mask(device: &Device, batch: usize, q_len: usize, k_len: usize) -> Result<Tensor> {
    let offset = k_len.saturating_sub(q_len);
    let row_major = (0..q_len)
        .flat_map(|q| (0..k_len).map(move |k| if k > q + offset { MASK_FILL } else { 0.0 }))
        .collect::<Vec<f32>>();
    let data = row_major.repeat(batch);
    Tensor::from_vec(data, (batch, 1, q_len, k_len), device)
}
