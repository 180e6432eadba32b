//! Stacks of identical encoder or decoder layers.
//!
//! Pre-norm layers leave their output un-normalised, so a pre-norm stack ends
//! with one extra LayerNorm. Post-norm stacks return the last layer's output
//! as is.

use std::{fmt, sync::Arc};

use candle_core::{DType, Device, Result, Tensor};
use layers::{norm::NormalizationLayer, ForwardContext};

use crate::{
    components,
    config::{LayerNormPositioning, ResolvedLayerConfig, ResolvedStackConfig},
    decoder::TransformerDecoderLayer,
    encoder::TransformerLayer,
};

fn final_norm(
    layer: &ResolvedLayerConfig,
    device: &Device,
    dtype: DType,
) -> Result<Option<Arc<dyn NormalizationLayer>>> {
    match layer.layernorm_positioning {
        LayerNormPositioning::Pre => Ok(Some(components::build_norm(layer, device, dtype)?)),
        LayerNormPositioning::Post => Ok(None),
    }
}

fn apply_final_norm(
    norm: Option<&Arc<dyn NormalizationLayer>>,
    hidden: Tensor,
    ctx: &ForwardContext,
) -> Result<Tensor> {
    match norm {
        Some(norm) => norm.forward(&hidden, &ctx.policy),
        None => Ok(hidden),
    }
}

pub struct TransformerEncoder {
    layers: Vec<TransformerLayer>,
    final_norm: Option<Arc<dyn NormalizationLayer>>,
}

impl fmt::Debug for TransformerEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformerEncoder")
            .field("layers", &self.layers)
            .field("final_norm", &self.final_norm.is_some())
            .finish()
    }
}

impl TransformerEncoder {
    /// Layer `i` seeds its dropout from `config.layer.seed + i`.
    pub fn new(config: &ResolvedStackConfig, device: &Device, dtype: DType) -> Result<Self> {
        let layers = (0..config.layers_num)
            .map(|index| {
                let layer = config.layer.with_seed(config.layer.seed.wrapping_add(index as u64));
                TransformerLayer::new(&layer, device, dtype)
            })
            .collect::<Result<Vec<_>>>()?;
        let final_norm = final_norm(&config.layer, device, dtype)?;
        log::debug!(
            "encoder stack: layers={} final_norm={}",
            layers.len(),
            final_norm.is_some()
        );
        Ok(Self::from_layers(layers, final_norm))
    }

    pub fn from_layers(
        layers: Vec<TransformerLayer>,
        final_norm: Option<Arc<dyn NormalizationLayer>>,
    ) -> Self {
        Self { layers, final_norm }
    }

    pub fn layers(&self) -> &[TransformerLayer] {
        &self.layers
    }

    pub fn has_final_norm(&self) -> bool {
        self.final_norm.is_some()
    }

    pub fn forward(&self, hidden: &Tensor, mask: &Tensor, ctx: &ForwardContext) -> Result<Tensor> {
        let mut hidden = hidden.clone();
        for layer in &self.layers {
            hidden = layer.forward(&hidden, mask, ctx)?;
        }
        apply_final_norm(self.final_norm.as_ref(), hidden, ctx)
    }
}

pub struct TransformerDecoder {
    layers: Vec<TransformerDecoderLayer>,
    final_norm: Option<Arc<dyn NormalizationLayer>>,
}

impl fmt::Debug for TransformerDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformerDecoder")
            .field("layers", &self.layers)
            .field("final_norm", &self.final_norm.is_some())
            .finish()
    }
}

impl TransformerDecoder {
    pub fn new(config: &ResolvedStackConfig, device: &Device, dtype: DType) -> Result<Self> {
        let layers = (0..config.layers_num)
            .map(|index| {
                let layer = config.layer.with_seed(config.layer.seed.wrapping_add(index as u64));
                TransformerDecoderLayer::new(&layer, device, dtype)
            })
            .collect::<Result<Vec<_>>>()?;
        let final_norm = final_norm(&config.layer, device, dtype)?;
        log::debug!(
            "decoder stack: layers={} final_norm={}",
            layers.len(),
            final_norm.is_some()
        );
        Ok(Self::from_layers(layers, final_norm))
    }

    pub fn from_layers(
        layers: Vec<TransformerDecoderLayer>,
        final_norm: Option<Arc<dyn NormalizationLayer>>,
    ) -> Self {
        Self { layers, final_norm }
    }

    pub fn layers(&self) -> &[TransformerDecoderLayer] {
        &self.layers
    }

    pub fn has_final_norm(&self) -> bool {
        self.final_norm.is_some()
    }

    /// Every layer attends to the same `encoder_hidden`.
    pub fn forward(
        &self,
        hidden: &Tensor,
        encoder_hidden: &Tensor,
        mask_decoder: &Tensor,
        mask_encoder: &Tensor,
        ctx: &ForwardContext,
    ) -> Result<Tensor> {
        let mut hidden = hidden.clone();
        for layer in &self.layers {
            hidden = layer.forward(&hidden, encoder_hidden, mask_decoder, mask_encoder, ctx)?;
        }
        apply_final_norm(self.final_norm.as_ref(), hidden, ctx)
    }
}
