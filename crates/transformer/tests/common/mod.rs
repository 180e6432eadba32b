//! Instrumented sub-layers shared by the layer tests.
//!
//! Every stub appends its tag to a shared [`EventLog`] when called, so tests
//! can assert on the exact call sequence of a forward pass.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use attention::Attention;
use candle_core::{DType, Device, Result, Tensor};
use embedding::PositionBias;
use layers::{
    mlp::FeedForwardLayer, norm::NormalizationLayer, ForwardContext, PrecisionPolicy,
};
use transformer::{
    DecoderParts, EncoderParts, LayerConfig, LayerNormPositioning, ResolvedLayerConfig,
};

pub const HIDDEN: usize = 8;
pub const HEADS: usize = 2;

#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: &str) {
        self.0.lock().unwrap().push(event.to_string());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Arguments of one `attend` call.
#[derive(Clone)]
pub struct AttendCall {
    pub key: Tensor,
    pub value: Tensor,
    pub query: Tensor,
    pub mask: Tensor,
    pub position_bias: Option<Tensor>,
}

/// Returns the query unchanged.
pub struct RecordingAttention {
    tag: &'static str,
    log: EventLog,
    calls: Mutex<Vec<AttendCall>>,
}

impl RecordingAttention {
    pub fn new(tag: &'static str, log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            tag,
            log: log.clone(),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<AttendCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl Attention for RecordingAttention {
    fn attend(
        &self,
        key: &Tensor,
        value: &Tensor,
        query: &Tensor,
        mask: &Tensor,
        position_bias: Option<&Tensor>,
        _ctx: &ForwardContext,
    ) -> Result<Tensor> {
        self.log.push(self.tag);
        self.calls.lock().unwrap().push(AttendCall {
            key: key.clone(),
            value: value.clone(),
            query: query.clone(),
            mask: mask.clone(),
            position_bias: position_bias.cloned(),
        });
        Ok(query.clone())
    }
}

/// Multiplies its input by a constant and remembers every input.
pub struct ScalingNorm {
    tag: &'static str,
    scale: f64,
    log: EventLog,
    inputs: Mutex<Vec<Tensor>>,
}

impl ScalingNorm {
    pub fn new(tag: &'static str, scale: f64, log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            tag,
            scale,
            log: log.clone(),
            inputs: Mutex::new(Vec::new()),
        })
    }

    pub fn inputs(&self) -> Vec<Tensor> {
        self.inputs.lock().unwrap().clone()
    }
}

impl NormalizationLayer for ScalingNorm {
    fn forward(&self, hidden: &Tensor, _policy: &PrecisionPolicy) -> Result<Tensor> {
        self.log.push(self.tag);
        self.inputs.lock().unwrap().push(hidden.clone());
        hidden.affine(self.scale, 0.0)
    }
}

pub struct IdentityFeedForward {
    log: EventLog,
}

impl IdentityFeedForward {
    pub fn new(log: &EventLog) -> Arc<Self> {
        Arc::new(Self { log: log.clone() })
    }
}

impl FeedForwardLayer for IdentityFeedForward {
    fn forward(&self, hidden: &Tensor, _policy: &PrecisionPolicy) -> Result<Tensor> {
        self.log.push("feed_forward");
        Ok(hidden.clone())
    }
}

/// Zero bias of the documented shape; records `(q_len, k_len)` per call.
pub struct CountingBias {
    log: EventLog,
    calls: Mutex<Vec<(usize, usize)>>,
}

impl CountingBias {
    pub fn new(log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            log: log.clone(),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<(usize, usize)> {
        self.calls.lock().unwrap().clone()
    }
}

impl PositionBias for CountingBias {
    fn bias(&self, query_hidden: &Tensor, key_hidden: &Tensor) -> Result<Tensor> {
        self.log.push("position_bias");
        let q_len = query_hidden.dim(1)?;
        let k_len = key_hidden.dim(1)?;
        self.calls.lock().unwrap().push((q_len, k_len));
        Tensor::zeros((1, HEADS, q_len, k_len), DType::F32, query_hidden.device())
    }
}

pub struct EncoderStubs {
    pub log: EventLog,
    pub self_attn: Arc<RecordingAttention>,
    pub layer_norm_1: Arc<ScalingNorm>,
    pub layer_norm_2: Arc<ScalingNorm>,
    pub bias: Option<Arc<CountingBias>>,
}

impl EncoderStubs {
    pub fn new(norm_scale: f64, with_bias: bool) -> Self {
        let log = EventLog::default();
        Self {
            self_attn: RecordingAttention::new("self_attn", &log),
            layer_norm_1: ScalingNorm::new("layer_norm_1", norm_scale, &log),
            layer_norm_2: ScalingNorm::new("layer_norm_2", norm_scale, &log),
            bias: with_bias.then(|| CountingBias::new(&log)),
            log,
        }
    }

    pub fn parts(&self) -> EncoderParts {
        EncoderParts {
            self_attn: self.self_attn.clone(),
            feed_forward: IdentityFeedForward::new(&self.log),
            layer_norm_1: self.layer_norm_1.clone(),
            layer_norm_2: self.layer_norm_2.clone(),
            relative_pos_emb: self
                .bias
                .clone()
                .map(|bias| bias as Arc<dyn PositionBias>),
        }
    }
}

pub struct DecoderStubs {
    pub log: EventLog,
    pub self_attn: Arc<RecordingAttention>,
    pub context_attn: Arc<RecordingAttention>,
    pub layer_norm_1: Arc<ScalingNorm>,
    pub layer_norm_2: Arc<ScalingNorm>,
    pub layer_norm_3: Arc<ScalingNorm>,
    pub bias: Option<Arc<CountingBias>>,
}

impl DecoderStubs {
    pub fn new(norm_scale: f64, with_bias: bool) -> Self {
        let log = EventLog::default();
        Self {
            self_attn: RecordingAttention::new("self_attn", &log),
            context_attn: RecordingAttention::new("context_attn", &log),
            layer_norm_1: ScalingNorm::new("layer_norm_1", norm_scale, &log),
            layer_norm_2: ScalingNorm::new("layer_norm_2", norm_scale, &log),
            layer_norm_3: ScalingNorm::new("layer_norm_3", norm_scale, &log),
            bias: with_bias.then(|| CountingBias::new(&log)),
            log,
        }
    }

    pub fn parts(&self) -> DecoderParts {
        DecoderParts {
            self_attn: self.self_attn.clone(),
            context_attn: self.context_attn.clone(),
            feed_forward: IdentityFeedForward::new(&self.log),
            layer_norm_1: self.layer_norm_1.clone(),
            layer_norm_2: self.layer_norm_2.clone(),
            layer_norm_3: self.layer_norm_3.clone(),
            relative_pos_emb: self
                .bias
                .clone()
                .map(|bias| bias as Arc<dyn PositionBias>),
        }
    }
}

/// Small layer config; dropout stays at its default so eval mode matters.
pub fn layer_config(positioning: LayerNormPositioning) -> ResolvedLayerConfig {
    let mut config = LayerConfig::new(HIDDEN, HEADS, 4 * HIDDEN);
    config.layernorm_positioning = positioning;
    config.resolve().expect("valid test config")
}

pub fn ramp(dims: (usize, usize, usize)) -> Result<Tensor> {
    let total = dims.0 * dims.1 * dims.2;
    let data = (0..total).map(|i| i as f32 * 0.1 - 1.0).collect::<Vec<_>>();
    Tensor::from_vec(data, dims, &Device::Cpu)
}

pub fn open_mask(batch: usize, q_len: usize, k_len: usize) -> Result<Tensor> {
    Tensor::zeros((batch, 1, q_len, k_len), DType::F32, &Device::Cpu)
}

pub fn max_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
    a.to_dtype(DType::F32)?
        .sub(&b.to_dtype(DType::F32)?)?
        .abs()?
        .max_all()?
        .to_vec0::<f32>()
}

pub fn assert_close(actual: &Tensor, expected: &Tensor) -> Result<()> {
    assert_eq!(actual.dims(), expected.dims());
    let diff = max_diff(actual, expected)?;
    assert!(diff < 1e-5, "max diff {diff}");
    Ok(())
}
