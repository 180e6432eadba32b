//! Learned relative position bias with log-spaced distance buckets.
//!
//! The signed distance `key_pos - query_pos` is mapped to one of
//! `num_buckets` buckets: short distances get a bucket each, longer ones
//! share logarithmically wider buckets up to `max_distance`, and everything
//! beyond lands in the last bucket. Each bucket owns one learned scalar per
//! head.
//!
//! A unidirectional embedding folds every key after the query into bucket 0.
//! A bidirectional one spends half of the buckets on each direction.

use candle_core::{DType, Device, Result, Tensor};
use layers::checks;

use super::PositionBias;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelativePositionConfig {
    pub heads_num: usize,
    pub num_buckets: usize,
    /// Distance from which all positions share the last bucket.
    pub max_distance: usize,
    pub bidirectional: bool,
}

impl RelativePositionConfig {
    /// 32 buckets up to a distance of 128, unidirectional.
    pub fn new(heads_num: usize) -> Self {
        Self {
            heads_num,
            num_buckets: 32,
            max_distance: 128,
            bidirectional: false,
        }
    }

    pub fn with_buckets(mut self, num_buckets: usize, max_distance: usize) -> Self {
        self.num_buckets = num_buckets;
        self.max_distance = max_distance;
        self
    }

    pub fn with_bidirectional(mut self, bidirectional: bool) -> Self {
        self.bidirectional = bidirectional;
        self
    }

    fn validate(&self) -> Result<()> {
        let directional_buckets = if self.bidirectional {
            self.num_buckets / 2
        } else {
            self.num_buckets
        };
        let max_exact = directional_buckets / 2;
        if self.heads_num == 0 {
            candle_core::bail!("relative position: heads_num must be positive");
        }
        if max_exact == 0 {
            candle_core::bail!(
                "relative position: {} buckets are too few (bidirectional={})",
                self.num_buckets,
                self.bidirectional
            );
        }
        if self.max_distance <= max_exact {
            candle_core::bail!(
                "relative position: max_distance {} must exceed the exact range {}",
                self.max_distance,
                max_exact
            );
        }
        Ok(())
    }
}

/// Maps a signed distance `key_pos - query_pos` to its bucket index.
///
/// Meaningful bucketing needs at least two buckets per direction; with fewer,
/// every distance of a direction lands in that direction's first bucket.
pub fn relative_position_bucket(
    relative_position: i64,
    bidirectional: bool,
    num_buckets: usize,
    max_distance: usize,
) -> usize {
    let mut num_buckets = num_buckets;
    let mut bucket = 0;
    let distance = if bidirectional {
        num_buckets /= 2;
        if relative_position > 0 {
            bucket += num_buckets;
        }
        relative_position.unsigned_abs() as usize
    } else {
        (-relative_position.min(0)) as usize
    };

    let max_exact = num_buckets / 2;
    if max_exact == 0 {
        return bucket;
    }
    if distance < max_exact {
        return bucket + distance;
    }
    let log_ratio = (distance as f64 / max_exact as f64).ln()
        / (max_distance as f64 / max_exact as f64).ln();
    let large = max_exact + (log_ratio * (num_buckets - max_exact) as f64) as usize;
    bucket + large.min(num_buckets - 1)
}

/// Bucketed relative position bias backed by a `(num_buckets, heads)` table.
#[derive(Debug, Clone)]
pub struct RelativePositionEmbedding {
    config: RelativePositionConfig,
    table: Tensor,
}

impl RelativePositionEmbedding {
    pub fn new(config: RelativePositionConfig, table: Tensor) -> Result<Self> {
        config.validate()?;
        checks::expect_shape(
            "relative_position.table",
            &table,
            &[config.num_buckets, config.heads_num],
        )?;
        checks::expect_dtype_in("relative_position.table", &table, checks::PARAMETER_DTYPES)?;
        Ok(Self { config, table })
    }

    /// Table drawn from `N(0, 0.02)`.
    pub fn initialised(config: RelativePositionConfig, device: &Device, dtype: DType) -> Result<Self> {
        let table = Tensor::randn(0f32, 0.02, (config.num_buckets, config.heads_num), device)?
            .to_dtype(dtype)?;
        Self::new(config, table)
    }

    pub fn config(&self) -> &RelativePositionConfig {
        &self.config
    }

    pub fn table(&self) -> &Tensor {
        &self.table
    }

    /// Bucket index for every `(query, key)` pair, row-major.
    pub fn buckets(&self, q_len: usize, k_len: usize) -> Vec<u32> {
        let config = &self.config;
        (0..q_len)
            .flat_map(|q| {
                (0..k_len).map(move |k| {
                    relative_position_bucket(
                        k as i64 - q as i64,
                        config.bidirectional,
                        config.num_buckets,
                        config.max_distance,
                    ) as u32
                })
            })
            .collect()
    }

    /// Bias of shape `(1, heads, q_len, k_len)` in the table's dtype.
    pub fn compute(&self, q_len: usize, k_len: usize) -> Result<Tensor> {
        let ids = Tensor::from_vec(self.buckets(q_len, k_len), q_len * k_len, self.table.device())?;
        self.table
            .index_select(&ids, 0)?
            .reshape((q_len, k_len, self.config.heads_num))?
            .permute((2, 0, 1))?
            .unsqueeze(0)?
            .contiguous()
    }
}

impl PositionBias for RelativePositionEmbedding {
    fn bias(&self, query_hidden: &Tensor, key_hidden: &Tensor) -> Result<Tensor> {
        checks::expect_rank("relative_position.query", query_hidden, 3)?;
        checks::expect_rank("relative_position.key", key_hidden, 3)?;
        let q_len = query_hidden.dim(1)?;
        let k_len = key_hidden.dim(1)?;
        log::trace!("relative position bias q_len={q_len} k_len={k_len}");
        self.compute(q_len, k_len)
    }
}
