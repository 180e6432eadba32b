//! Transformer encoder and encoder-decoder layers on Candle.
//!
//! This crate re-exports the workspace members under one roof:
//!
//! * [`layers`]: projections, activations, LayerNorm, feed-forward blocks,
//!   residual/dropout sites and the per-call [`ForwardContext`].
//! * [`attention`]: the [`Attention`] trait, the reference multi-head kernel
//!   and mask builders.
//! * [`embedding`]: the [`PositionBias`] trait and relative position bias.
//! * [`transformer`]: configuration, encoder/decoder layers and stacks.

pub use attention::{self, Attention, MultiHeadedAttention};
pub use embedding::{self, PositionBias, RelativePositionEmbedding};
pub use layers::{self, ForwardContext, Mode, PrecisionPolicy};
pub use transformer::{
    self, ConfigError, LayerConfig, LayerNormPositioning, StackConfig, TransformerDecoder,
    TransformerDecoderLayer, TransformerEncoder, TransformerLayer,
};

use candle_core::{Device, Result};

/// Picks the best available device: Metal (with the `metal` feature), then
/// CUDA, then CPU. Setting `CANDLE_FORCE_CPU` skips accelerators.
pub fn select_device() -> Result<Device> {
    if std::env::var_os("CANDLE_FORCE_CPU").is_some() {
        log::info!("CANDLE_FORCE_CPU set, using CPU backend");
        return Ok(Device::Cpu);
    }
    #[cfg(feature = "metal")]
    {
        match Device::new_metal(0) {
            Ok(device) if metal_preflight(&device).is_ok() => {
                log::info!("metal device selected: {device:?}");
                return Ok(device);
            }
            Ok(_) => log::warn!("metal device detected but preflight failed, falling back"),
            Err(err) => log::debug!("metal unavailable: {err}"),
        }
    }
    match Device::cuda_if_available(0) {
        Ok(device) if device.is_cuda() => {
            log::info!("cuda device selected: {device:?}");
            Ok(device)
        }
        _ => {
            log::info!("using CPU backend");
            Ok(Device::Cpu)
        }
    }
}

/// Runs the kernels a layer forward relies on: batched matmul and the
/// bucket lookup of the relative position bias.
#[cfg(feature = "metal")]
fn metal_preflight(device: &Device) -> Result<()> {
    use candle_core::Tensor;

    let x = Tensor::randn(0f32, 1.0, (2, 4, 16, 8), device)?;
    let _ = x.matmul(&x.transpose(2, 3)?.contiguous()?)?;

    let ids = Tensor::from_vec((0..16u32).collect::<Vec<_>>(), 16, device)?;
    let table = Tensor::randn(0f32, 1.0, (32, 4), device)?;
    let _ = table.index_select(&ids, 0)?;
    Ok(())
}
