//! Dropout and residual connections around transformer sub-layers.
//!
//! Every sub-block of an encoder or decoder layer ends the same way: its
//! output goes through dropout and is added to a residual stream, optionally
//! followed by a normalisation. [`Residual`] owns the dropout state of one such
//! site and exposes that step with the branch, the residual and the norm passed
//! explicitly, so layer code only decides *which* tensors take part.
//!
//! Dropout masks come from a seeded generator so training runs are
//! reproducible. In [`Mode::Eval`](crate::context::Mode::Eval) dropout is the
//! identity.

use std::{fmt, sync::Mutex};

use candle_core::{Error, Result, Tensor};

use crate::{checks, context::ForwardContext, norm::NormalizationLayer};

/// Dropout policy of a single dropout site.
pub enum DropoutMode {
    /// Dropout never fires (probability outside `(0, 1)`).
    Disabled,
    /// Dropout samples masks with the supplied probability and RNG.
    Enabled { probability: f32, rng: Mutex<Lcg64> },
}

impl fmt::Debug for DropoutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropoutMode::Disabled => f.write_str("Disabled"),
            DropoutMode::Enabled { probability, .. } => f
                .debug_struct("Enabled")
                .field("probability", probability)
                .finish(),
        }
    }
}

impl DropoutMode {
    /// `0.0` (or any value outside `(0, 1)`) disables dropout.
    pub fn from_probability(probability: f32, seed: u64) -> Self {
        if probability > 0.0 && probability < 1.0 {
            DropoutMode::Enabled {
                probability,
                rng: Mutex::new(Lcg64::new(seed)),
            }
        } else {
            DropoutMode::Disabled
        }
    }

    pub fn probability(&self) -> f32 {
        match self {
            DropoutMode::Disabled => 0.0,
            DropoutMode::Enabled { probability, .. } => *probability,
        }
    }

    /// Applies inverted dropout: kept values are scaled by `1 / (1 - p)`.
    pub fn apply(&self, tensor: &Tensor, ctx: &ForwardContext) -> Result<Tensor> {
        let (probability, rng) = match self {
            DropoutMode::Enabled { probability, rng } if ctx.is_training() => (*probability, rng),
            _ => return Ok(tensor.clone()),
        };
        let keep_prob = 1.0 - probability;
        let total = tensor.elem_count();
        let mask_data = {
            let mut rng = rng
                .lock()
                .map_err(|_| Error::Msg("dropout RNG mutex poisoned".into()))?;
            (0..total)
                .map(|_| {
                    if rng.next_f32() < keep_prob {
                        1.0f32 / keep_prob
                    } else {
                        0.0f32
                    }
                })
                .collect::<Vec<_>>()
        };
        let policy = &ctx.policy;
        let mask = Tensor::from_vec(mask_data, tensor.dims(), tensor.device())?
            .to_dtype(policy.compute())?;
        let dropped = policy.cast_for_matmul(tensor)?.mul(&mask)?;
        policy.cast_to_storage(&dropped)
    }
}

/// Dropout followed by a residual add, optionally normalised.
#[derive(Debug)]
pub struct Residual {
    dropout: DropoutMode,
}

impl Residual {
    /// Creates a residual site whose dropout RNG is seeded with `seed`.
    pub fn new(dropout_p: f32, seed: u64) -> Self {
        Self {
            dropout: DropoutMode::from_probability(dropout_p, seed),
        }
    }

    pub fn dropout(&self) -> &DropoutMode {
        &self.dropout
    }

    /// `dropout(branch) + residual`
    pub fn connect(&self, branch: &Tensor, residual: &Tensor, ctx: &ForwardContext) -> Result<Tensor> {
        checks::expect_shape("residual.branch", branch, residual.dims())?;
        let branch = self.dropout.apply(branch, ctx)?;
        let policy = &ctx.policy;
        let summed = policy
            .cast_for_matmul(&branch)?
            .add(&policy.cast_for_matmul(residual)?)?;
        policy.cast_to_storage(&summed)
    }

    /// `norm(dropout(branch) + residual)`
    pub fn connect_and_norm(
        &self,
        branch: &Tensor,
        residual: &Tensor,
        norm: &dyn NormalizationLayer,
        ctx: &ForwardContext,
    ) -> Result<Tensor> {
        let summed = self.connect(branch, residual, ctx)?;
        norm.forward(&summed, &ctx.policy)
    }
}

/// Simple 64-bit linear congruential generator for deterministic dropout masks.
#[derive(Debug, Clone)]
pub struct Lcg64 {
    state: u64,
}

impl Lcg64 {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // Knuth's MMIX constants.
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state
    }

    fn next_f32(&mut self) -> f32 {
        const SCALE: f64 = 1.0 / ((1u64 << 53) as f64);
        let bits = self.next_u64() >> 11;
        (bits as f64 * SCALE) as f32
    }
}
