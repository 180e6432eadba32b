//! Builders for the sub-layers a [`ResolvedLayerConfig`] describes.

use std::sync::Arc;

use attention::{Attention, MultiHeadedAttention};
use candle_core::{DType, Device, Result};
use embedding::{PositionBias, RelativePositionEmbedding};
use layers::{
    linear::LinearInit,
    mlp::{self, FeedForwardLayer},
    norm::{LayerNorm, NormalizationLayer},
};

use crate::config::ResolvedLayerConfig;

/// Normal initialisation with std 0.02, as BERT-family checkpoints use.
pub(crate) const PARAMETER_INIT: LinearInit = LinearInit::Normal { std: 0.02 };

pub(crate) fn build_attention(
    config: &ResolvedLayerConfig,
    device: &Device,
    dtype: DType,
) -> Result<Arc<dyn Attention>> {
    let attention =
        MultiHeadedAttention::new(config.attention_config(), &PARAMETER_INIT, device, dtype)?;
    Ok(Arc::new(attention))
}

pub(crate) fn build_feed_forward(
    config: &ResolvedLayerConfig,
    device: &Device,
    dtype: DType,
) -> Result<Arc<dyn FeedForwardLayer>> {
    mlp::build_feed_forward(
        config.feed_forward,
        config.feed_forward_config(),
        &PARAMETER_INIT,
        device,
        dtype,
    )
}

pub(crate) fn build_norm(
    config: &ResolvedLayerConfig,
    device: &Device,
    dtype: DType,
) -> Result<Arc<dyn NormalizationLayer>> {
    Ok(Arc::new(LayerNorm::initialised(config.norm_config(), dtype, device)?))
}

pub(crate) fn build_position_bias(
    config: &ResolvedLayerConfig,
    device: &Device,
    dtype: DType,
) -> Result<Option<Arc<dyn PositionBias>>> {
    config
        .relative_position
        .clone()
        .map(|relative| -> Result<Arc<dyn PositionBias>> {
            Ok(Arc::new(RelativePositionEmbedding::initialised(
                relative, device, dtype,
            )?))
        })
        .transpose()
}
