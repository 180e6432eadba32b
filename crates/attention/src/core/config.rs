//! Configuration shared by attention implementations.

/// Shape and regularisation knobs of a multi-head attention block.
#[derive(Debug, Clone, PartialEq)]
pub struct AttentionConfig {
    pub hidden_size: usize,
    pub heads_num: usize,
    /// Width of a single head. Need not divide `hidden_size`.
    pub head_size: usize,
    /// Probability for dropout applied to attention weights during training.
    pub dropout_p: f32,
    /// Whether the four projections carry bias vectors.
    pub has_bias: bool,
}

impl AttentionConfig {
    /// Heads of width `hidden_size / heads_num`, no dropout, with bias.
    pub fn new(hidden_size: usize, heads_num: usize) -> Self {
        Self {
            hidden_size,
            heads_num,
            head_size: if heads_num == 0 { 0 } else { hidden_size / heads_num },
            dropout_p: 0.0,
            has_bias: true,
        }
    }

    pub fn with_head_size(mut self, head_size: usize) -> Self {
        self.head_size = head_size;
        self
    }

    pub fn with_dropout(mut self, dropout_p: f32) -> Self {
        self.dropout_p = dropout_p;
        self
    }

    pub fn with_bias(mut self, has_bias: bool) -> Self {
        self.has_bias = has_bias;
        self
    }

    /// Concatenated width of all heads.
    pub fn inner_size(&self) -> usize {
        self.heads_num * self.head_size
    }
}
