//! Encoder layer: self-attention followed by a position-wise feed-forward block.

use std::{fmt, sync::Arc};

use attention::Attention;
use candle_core::{DType, Device, Result, Tensor};
use embedding::PositionBias;
use layers::{
    mlp::FeedForwardLayer, norm::NormalizationLayer, residual::Residual, ForwardContext,
};

use crate::{
    components,
    config::{LayerNormPositioning, ResolvedLayerConfig},
};

/// Keeps encoder dropout streams apart from decoder ones built with the same seed.
const DROPOUT_SEED_SALT: u64 = 0x9E37_79B9_7F4A_7C15;

/// Seeds of the two residual dropout sites of a layer seeded with `seed`.
pub(crate) fn dropout_seeds(seed: u64) -> [u64; 2] {
    let base = seed.wrapping_mul(2).wrapping_add(DROPOUT_SEED_SALT);
    [base, base.wrapping_add(1)]
}

/// Sub-layers of a [`TransformerLayer`], for assembling one from custom kernels.
pub struct EncoderParts {
    pub self_attn: Arc<dyn Attention>,
    pub feed_forward: Arc<dyn FeedForwardLayer>,
    pub layer_norm_1: Arc<dyn NormalizationLayer>,
    pub layer_norm_2: Arc<dyn NormalizationLayer>,
    pub relative_pos_emb: Option<Arc<dyn PositionBias>>,
}

impl EncoderParts {
    /// Freshly initialised sub-layers as described by `config`.
    pub fn build(config: &ResolvedLayerConfig, device: &Device, dtype: DType) -> Result<Self> {
        Ok(Self {
            self_attn: components::build_attention(config, device, dtype)?,
            feed_forward: components::build_feed_forward(config, device, dtype)?,
            layer_norm_1: components::build_norm(config, device, dtype)?,
            layer_norm_2: components::build_norm(config, device, dtype)?,
            relative_pos_emb: components::build_position_bias(config, device, dtype)?,
        })
    }
}

/// Transformer encoder layer.
///
/// Post-norm:
/// ```text
/// inter  = LN1(dropout(attn(x, x, x, mask, bias)) + x)
/// output = LN2(dropout(ff(inter)) + inter)
/// ```
///
/// Pre-norm:
/// ```text
/// x'     = x + dropout(attn(LN1(x), LN1(x), LN1(x), mask))
/// output = x' + dropout(ff(LN2(x')))
/// ```
///
/// In the pre-norm layout the relative position bias is still computed but
/// self-attention runs without it, so checkpoints trained that way keep
/// their behaviour.
pub struct TransformerLayer {
    positioning: LayerNormPositioning,
    self_attn: Arc<dyn Attention>,
    dropout_1: Residual,
    layer_norm_1: Arc<dyn NormalizationLayer>,
    feed_forward: Arc<dyn FeedForwardLayer>,
    dropout_2: Residual,
    layer_norm_2: Arc<dyn NormalizationLayer>,
    relative_pos_emb: Option<Arc<dyn PositionBias>>,
}

impl fmt::Debug for TransformerLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformerLayer")
            .field("positioning", &self.positioning)
            .field("dropout", &self.dropout_1.dropout())
            .field("position_bias", &self.has_position_bias())
            .finish()
    }
}

impl TransformerLayer {
    pub fn new(config: &ResolvedLayerConfig, device: &Device, dtype: DType) -> Result<Self> {
        let layer = Self::from_parts(config, EncoderParts::build(config, device, dtype)?);
        log::debug!(
            "encoder layer: positioning={} feed_forward={:?} act={} heads={}x{} bias={} relative_position={}",
            config.layernorm_positioning,
            config.feed_forward,
            config.hidden_act,
            config.heads_num,
            config.attention_head_size,
            config.has_bias,
            layer.has_position_bias()
        );
        Ok(layer)
    }

    /// Wires existing sub-layers; only positioning, dropout and seed are read from `config`.
    pub fn from_parts(config: &ResolvedLayerConfig, parts: EncoderParts) -> Self {
        let [seed_1, seed_2] = dropout_seeds(config.seed);
        Self {
            positioning: config.layernorm_positioning,
            self_attn: parts.self_attn,
            dropout_1: Residual::new(config.dropout, seed_1),
            layer_norm_1: parts.layer_norm_1,
            feed_forward: parts.feed_forward,
            dropout_2: Residual::new(config.dropout, seed_2),
            layer_norm_2: parts.layer_norm_2,
            relative_pos_emb: parts.relative_pos_emb,
        }
    }

    pub fn positioning(&self) -> LayerNormPositioning {
        self.positioning
    }

    pub fn has_position_bias(&self) -> bool {
        self.relative_pos_emb.is_some()
    }

    /// `hidden` is `(batch, seq_len, hidden_size)`, `mask` is `(batch, 1, seq_len, seq_len)`.
    pub fn forward(&self, hidden: &Tensor, mask: &Tensor, ctx: &ForwardContext) -> Result<Tensor> {
        log::trace!("encoder layer forward hidden={:?}", hidden.dims());
        let position_bias = match &self.relative_pos_emb {
            Some(relative_pos_emb) => Some(relative_pos_emb.bias(hidden, hidden)?),
            None => None,
        };
        match self.positioning {
            LayerNormPositioning::Post => {
                self.forward_post_norm(hidden, mask, position_bias.as_ref(), ctx)
            }
            LayerNormPositioning::Pre => self.forward_pre_norm(hidden, mask, ctx),
        }
    }

    fn forward_post_norm(
        &self,
        hidden: &Tensor,
        mask: &Tensor,
        position_bias: Option<&Tensor>,
        ctx: &ForwardContext,
    ) -> Result<Tensor> {
        let attn_out = self
            .self_attn
            .attend(hidden, hidden, hidden, mask, position_bias, ctx)?;
        let inter = self
            .dropout_1
            .connect_and_norm(&attn_out, hidden, self.layer_norm_1.as_ref(), ctx)?;
        let ff_out = self.feed_forward.forward(&inter, &ctx.policy)?;
        self.dropout_2
            .connect_and_norm(&ff_out, &inter, self.layer_norm_2.as_ref(), ctx)
    }

    fn forward_pre_norm(&self, hidden: &Tensor, mask: &Tensor, ctx: &ForwardContext) -> Result<Tensor> {
        let normed = self.layer_norm_1.forward(hidden, &ctx.policy)?;
        let attn_out = self
            .self_attn
            .attend(&normed, &normed, &normed, mask, None, ctx)?;
        let hidden = self.dropout_1.connect(&attn_out, hidden, ctx)?;
        let normed = self.layer_norm_2.forward(&hidden, &ctx.policy)?;
        let ff_out = self.feed_forward.forward(&normed, &ctx.policy)?;
        self.dropout_2.connect(&ff_out, &hidden, ctx)
    }
}
