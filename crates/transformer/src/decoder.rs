//! Decoder layer: masked self-attention, cross-attention over the encoder
//! output, then a position-wise feed-forward block.

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

const DROPOUT_SEED_SALT: u64 = 0xC2B2_AE3D_27D4_EB4F;

/// Seeds of the three residual dropout sites of a layer seeded with `seed`.
pub(crate) fn dropout_seeds(seed: u64) -> [u64; 3] {
    let base = seed.wrapping_mul(3).wrapping_add(DROPOUT_SEED_SALT);
    [base, base.wrapping_add(1), base.wrapping_add(2)]
}

/// Sub-layers of a [`TransformerDecoderLayer`].
pub struct DecoderParts {
    pub self_attn: Arc<dyn Attention>,
    pub context_attn: Arc<dyn Attention>,
    pub feed_forward: Arc<dyn FeedForwardLayer>,
    pub layer_norm_1: Arc<dyn NormalizationLayer>,
    pub layer_norm_2: Arc<dyn NormalizationLayer>,
    pub layer_norm_3: Arc<dyn NormalizationLayer>,
    pub relative_pos_emb: Option<Arc<dyn PositionBias>>,
}

impl DecoderParts {
    pub fn build(config: &ResolvedLayerConfig, device: &Device, dtype: DType) -> Result<Self> {
        Ok(Self {
            self_attn: components::build_attention(config, device, dtype)?,
            context_attn: components::build_attention(config, device, dtype)?,
            feed_forward: components::build_feed_forward(config, device, dtype)?,
            layer_norm_1: components::build_norm(config, device, dtype)?,
            layer_norm_2: components::build_norm(config, device, dtype)?,
            layer_norm_3: components::build_norm(config, device, dtype)?,
            relative_pos_emb: components::build_position_bias(config, device, dtype)?,
        })
    }
}

/// Transformer decoder layer.
///
/// Post-norm:
/// ```text
/// q_norm   = LN1(dropout(self_attn(x, x, x, mask_decoder, self_bias)) + x)
/// mid_norm = LN2(dropout(context_attn(enc, enc, q_norm, mask_encoder, context_bias)) + q_norm)
/// output   = LN3(dropout(ff(mid_norm)) + mid_norm)
/// ```
///
/// Pre-norm:
/// ```text
/// q      = x + dropout(self_attn(LN1(x), LN1(x), LN1(x), mask_decoder))
/// mid    = q + dropout(context_attn(enc, enc, LN2(q), mask_encoder))
/// output = mid + dropout(ff(LN3(mid)))
/// ```
///
/// As in [`TransformerLayer`](crate::TransformerLayer), the pre-norm layout
/// computes both position biases but passes neither to attention.
pub struct TransformerDecoderLayer {
    positioning: LayerNormPositioning,
    self_attn: Arc<dyn Attention>,
    dropout_1: Residual,
    layer_norm_1: Arc<dyn NormalizationLayer>,
    context_attn: Arc<dyn Attention>,
    dropout_2: Residual,
    layer_norm_2: Arc<dyn NormalizationLayer>,
    feed_forward: Arc<dyn FeedForwardLayer>,
    dropout_3: Residual,
    layer_norm_3: Arc<dyn NormalizationLayer>,
    relative_pos_emb: Option<Arc<dyn PositionBias>>,
}

impl fmt::Debug for TransformerDecoderLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformerDecoderLayer")
            .field("positioning", &self.positioning)
            .field("dropout", &self.dropout_1.dropout())
            .field("position_bias", &self.has_position_bias())
            .finish()
    }
}

impl TransformerDecoderLayer {
    pub fn new(config: &ResolvedLayerConfig, device: &Device, dtype: DType) -> Result<Self> {
        let layer = Self::from_parts(config, DecoderParts::build(config, device, dtype)?);
        log::debug!(
            "decoder layer: positioning={} feed_forward={:?} act={} heads={}x{} bias={} relative_position={}",
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
    pub fn from_parts(config: &ResolvedLayerConfig, parts: DecoderParts) -> Self {
        let seeds = dropout_seeds(config.seed);
        let residual = |site: usize| Residual::new(config.dropout, seeds[site]);
        Self {
            positioning: config.layernorm_positioning,
            self_attn: parts.self_attn,
            dropout_1: residual(0),
            layer_norm_1: parts.layer_norm_1,
            context_attn: parts.context_attn,
            dropout_2: residual(1),
            layer_norm_2: parts.layer_norm_2,
            feed_forward: parts.feed_forward,
            dropout_3: residual(2),
            layer_norm_3: parts.layer_norm_3,
            relative_pos_emb: parts.relative_pos_emb,
        }
    }

    pub fn positioning(&self) -> LayerNormPositioning {
        self.positioning
    }

    pub fn has_position_bias(&self) -> bool {
        self.relative_pos_emb.is_some()
    }

    /// `hidden` is the target sequence `(batch, T, hidden_size)` and
    /// `encoder_hidden` the source memory `(batch, T', hidden_size)`.
    /// `mask_decoder` is `(batch, 1, T, T)`, `mask_encoder` is `(batch, 1, T, T')`.
    pub fn forward(
        &self,
        hidden: &Tensor,
        encoder_hidden: &Tensor,
        mask_decoder: &Tensor,
        mask_encoder: &Tensor,
        ctx: &ForwardContext,
    ) -> Result<Tensor> {
        log::trace!(
            "decoder layer forward hidden={:?} encoder_hidden={:?}",
            hidden.dims(),
            encoder_hidden.dims()
        );
        let (self_bias, context_bias) = match &self.relative_pos_emb {
            Some(relative_pos_emb) => (
                Some(relative_pos_emb.bias(hidden, hidden)?),
                Some(relative_pos_emb.bias(hidden, encoder_hidden)?),
            ),
            None => (None, None),
        };
        match self.positioning {
            LayerNormPositioning::Post => self.forward_post_norm(
                hidden,
                encoder_hidden,
                mask_decoder,
                mask_encoder,
                self_bias.as_ref(),
                context_bias.as_ref(),
                ctx,
            ),
            LayerNormPositioning::Pre => {
                self.forward_pre_norm(hidden, encoder_hidden, mask_decoder, mask_encoder, ctx)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn forward_post_norm(
        &self,
        hidden: &Tensor,
        encoder_hidden: &Tensor,
        mask_decoder: &Tensor,
        mask_encoder: &Tensor,
        self_bias: Option<&Tensor>,
        context_bias: Option<&Tensor>,
        ctx: &ForwardContext,
    ) -> Result<Tensor> {
        let query = self
            .self_attn
            .attend(hidden, hidden, hidden, mask_decoder, self_bias, ctx)?;
        let query_norm = self
            .dropout_1
            .connect_and_norm(&query, hidden, self.layer_norm_1.as_ref(), ctx)?;
        let mid = self.context_attn.attend(
            encoder_hidden,
            encoder_hidden,
            &query_norm,
            mask_encoder,
            context_bias,
            ctx,
        )?;
        let mid_norm = self
            .dropout_2
            .connect_and_norm(&mid, &query_norm, self.layer_norm_2.as_ref(), ctx)?;
        let ff_out = self.feed_forward.forward(&mid_norm, &ctx.policy)?;
        self.dropout_3
            .connect_and_norm(&ff_out, &mid_norm, self.layer_norm_3.as_ref(), ctx)
    }

    fn forward_pre_norm(
        &self,
        hidden: &Tensor,
        encoder_hidden: &Tensor,
        mask_decoder: &Tensor,
        mask_encoder: &Tensor,
        ctx: &ForwardContext,
    ) -> Result<Tensor> {
        let hidden_norm = self.layer_norm_1.forward(hidden, &ctx.policy)?;
        let query = self
            .self_attn
            .attend(&hidden_norm, &hidden_norm, &hidden_norm, mask_decoder, None, ctx)?;
        let query = self.dropout_1.connect(&query, hidden, ctx)?;
        let query_norm = self.layer_norm_2.forward(&query, &ctx.policy)?;
        let mid = self.context_attn.attend(
            encoder_hidden,
            encoder_hidden,
            &query_norm,
            mask_encoder,
            None,
            ctx,
        )?;
        let mid = self.dropout_2.connect(&mid, &query, ctx)?;
        let mid_norm = self.layer_norm_3.forward(&mid, &ctx.policy)?;
        let ff_out = self.feed_forward.forward(&mid_norm, &ctx.policy)?;
        self.dropout_3.connect(&ff_out, &mid, ctx)
    }
}
