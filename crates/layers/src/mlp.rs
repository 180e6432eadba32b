//! Position-wise feed-forward blocks built on top of projections and activations.
//!
//! Both variants map `(batch, seq, hidden)` to the same layout through an
//! intermediate width of `config.feedforward_size`:
//!
//! * [`PositionwiseFeedForward`]: `linear_2(act(linear_1(x)))`
//! * [`GatedFeedForward`]: `linear_2(act(linear_gate(x)) * linear_1(x))`

use std::{fmt, sync::Arc};

use candle_core::{DType, Device, Result, Tensor};
use serde::{Deserialize, Serialize};

use crate::{
    activations::{self, Activation, ActivationKind},
    checks,
    context::PrecisionPolicy,
    linear::{Linear, LinearConfig, LinearInit},
};

/// Which feed-forward variant a layer uses.
///
/// Only `"gated"` selects the gated variant; any other name, including
/// unrecognised ones, falls back to the plain two-projection stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FeedForwardKind {
    #[default]
    Dense,
    Gated,
}

impl From<&str> for FeedForwardKind {
    fn from(name: &str) -> Self {
        match name {
            "gated" => FeedForwardKind::Gated,
            _ => FeedForwardKind::Dense,
        }
    }
}

impl From<String> for FeedForwardKind {
    fn from(name: String) -> Self {
        FeedForwardKind::from(name.as_str())
    }
}

impl From<FeedForwardKind> for String {
    fn from(kind: FeedForwardKind) -> Self {
        match kind {
            FeedForwardKind::Dense => "dense".to_string(),
            FeedForwardKind::Gated => "gated".to_string(),
        }
    }
}

/// Configuration shared by transformer feed-forward networks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedForwardConfig {
    pub hidden_size: usize,
    /// Width of the activation space.
    pub feedforward_size: usize,
    pub activation: ActivationKind,
    /// Whether the projections carry bias vectors.
    pub has_bias: bool,
}

impl FeedForwardConfig {
    pub fn new(hidden_size: usize, feedforward_size: usize, activation: ActivationKind) -> Self {
        Self {
            hidden_size,
            feedforward_size,
            activation,
            has_bias: true,
        }
    }

    fn up(&self) -> LinearConfig {
        LinearConfig::new(self.hidden_size, self.feedforward_size).with_bias(self.has_bias)
    }

    fn down(&self) -> LinearConfig {
        LinearConfig::new(self.feedforward_size, self.hidden_size).with_bias(self.has_bias)
    }
}

/// Shared interface for feed-forward stacks.
pub trait FeedForwardLayer: Send + Sync {
    /// Performs the forward pass through the MLP.
    fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor>;
}

/// Two projections with an activation in between.
#[derive(Clone)]
pub struct PositionwiseFeedForward {
    config: FeedForwardConfig,
    linear_1: Linear,
    linear_2: Linear,
    activation: Arc<dyn Activation>,
}

impl fmt::Debug for PositionwiseFeedForward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PositionwiseFeedForward")
            .field("config", &self.config)
            .finish()
    }
}

impl PositionwiseFeedForward {
    pub fn new(config: FeedForwardConfig, linear_1: Linear, linear_2: Linear) -> Result<Self> {
        expect_projection("feed_forward.linear_1", &linear_1, &config.up())?;
        expect_projection("feed_forward.linear_2", &linear_2, &config.down())?;
        let activation = activations::builtin(config.activation);
        Ok(Self {
            config,
            linear_1,
            linear_2,
            activation,
        })
    }

    pub fn with_init(
        config: FeedForwardConfig,
        init: &LinearInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let linear_1 = Linear::with_init(config.up(), init, device, dtype)?;
        let linear_2 = Linear::with_init(config.down(), init, device, dtype)?;
        Self::new(config, linear_1, linear_2)
    }

    pub fn config(&self) -> &FeedForwardConfig {
        &self.config
    }
}

impl FeedForwardLayer for PositionwiseFeedForward {
    fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("feed_forward.input", hidden, self.config.hidden_size)?;
        let inter = self.linear_1.forward(hidden, policy)?;
        let inter = self.activation.forward(&inter, policy)?;
        self.linear_2.forward(&inter, policy)
    }
}

/// Gated variant: the activated gate branch scales a second up-projection.
#[derive(Clone)]
pub struct GatedFeedForward {
    config: FeedForwardConfig,
    linear_gate: Linear,
    linear_1: Linear,
    linear_2: Linear,
    activation: Arc<dyn Activation>,
}

impl fmt::Debug for GatedFeedForward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatedFeedForward")
            .field("config", &self.config)
            .finish()
    }
}

impl GatedFeedForward {
    pub fn new(
        config: FeedForwardConfig,
        linear_gate: Linear,
        linear_1: Linear,
        linear_2: Linear,
    ) -> Result<Self> {
        expect_projection("feed_forward.linear_gate", &linear_gate, &config.up())?;
        expect_projection("feed_forward.linear_1", &linear_1, &config.up())?;
        expect_projection("feed_forward.linear_2", &linear_2, &config.down())?;
        let activation = activations::builtin(config.activation);
        Ok(Self {
            config,
            linear_gate,
            linear_1,
            linear_2,
            activation,
        })
    }

    pub fn with_init(
        config: FeedForwardConfig,
        init: &LinearInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let linear_gate = Linear::with_init(config.up(), init, device, dtype)?;
        let linear_1 = Linear::with_init(config.up(), init, device, dtype)?;
        let linear_2 = Linear::with_init(config.down(), init, device, dtype)?;
        Self::new(config, linear_gate, linear_1, linear_2)
    }

    pub fn config(&self) -> &FeedForwardConfig {
        &self.config
    }
}

impl FeedForwardLayer for GatedFeedForward {
    fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("feed_forward.input", hidden, self.config.hidden_size)?;
        let gate = self.linear_gate.forward(hidden, policy)?;
        let gate = self.activation.forward(&gate, policy)?;
        let inter = self.linear_1.forward(hidden, policy)?;
        let inter = policy.cast_to_storage(
            &policy
                .cast_for_matmul(&gate)?
                .mul(&policy.cast_for_matmul(&inter)?)?,
        )?;
        self.linear_2.forward(&inter, policy)
    }
}

/// Builds the feed-forward variant selected by `kind` with fresh parameters.
pub fn build_feed_forward(
    kind: FeedForwardKind,
    config: FeedForwardConfig,
    init: &LinearInit,
    device: &Device,
    dtype: DType,
) -> Result<Arc<dyn FeedForwardLayer>> {
    log::debug!(
        "feed_forward: kind={} {}->{} act={} bias={}",
        String::from(kind),
        config.hidden_size,
        config.feedforward_size,
        config.activation,
        config.has_bias
    );
    let layer: Arc<dyn FeedForwardLayer> = match kind {
        FeedForwardKind::Gated => Arc::new(GatedFeedForward::with_init(config, init, device, dtype)?),
        FeedForwardKind::Dense => {
            Arc::new(PositionwiseFeedForward::with_init(config, init, device, dtype)?)
        }
    };
    Ok(layer)
}

fn expect_projection(label: &str, linear: &Linear, expected: &LinearConfig) -> Result<()> {
    if linear.config() == expected {
        Ok(())
    } else {
        candle_core::bail!(
            "{label}: expected {:?}, got {:?}",
            expected,
            linear.config()
        )
    }
}
