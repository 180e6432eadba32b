use candle_core::{DType, Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use layers::ForwardContext;
use transformer::{LayerConfig, LayerNormPositioning, TransformerDecoderLayer, TransformerLayer};

const HIDDEN: usize = 256;
const HEADS: usize = 4;
const BATCH: usize = 4;

fn config(positioning: LayerNormPositioning, relative: bool) -> LayerConfig {
    let mut config = LayerConfig::new(HIDDEN, HEADS, 4 * HIDDEN);
    config.layernorm_positioning = positioning;
    config.relative_position_embedding = relative;
    config
}

fn bench_encoder(c: &mut Criterion) {
    let device = Device::Cpu;
    let ctx = ForwardContext::eval(DType::F32);
    let mut group = c.benchmark_group("encoder_layer");
    for &seq in &[32usize, 128] {
        let hidden = Tensor::randn(0f32, 1.0, (BATCH, seq, HIDDEN), &device).expect("hidden");
        let mask = Tensor::zeros((BATCH, 1, seq, seq), DType::F32, &device).expect("mask");
        group.throughput(Throughput::Elements((BATCH * seq) as u64));

        for (label, positioning, relative) in [
            ("post", LayerNormPositioning::Post, false),
            ("pre", LayerNormPositioning::Pre, false),
            ("post_relative", LayerNormPositioning::Post, true),
        ] {
            let resolved = config(positioning, relative).resolve().expect("config");
            let layer = TransformerLayer::new(&resolved, &device, DType::F32).expect("layer");
            group.bench_with_input(BenchmarkId::new(label, seq), &layer, |b, layer| {
                b.iter(|| {
                    let out = layer.forward(black_box(&hidden), &mask, &ctx).expect("forward");
                    black_box(out);
                });
            });
        }
    }
    group.finish();
}

fn bench_decoder(c: &mut Criterion) {
    let device = Device::Cpu;
    let ctx = ForwardContext::eval(DType::F32);
    let (target, source) = (32usize, 64usize);
    let hidden = Tensor::randn(0f32, 1.0, (BATCH, target, HIDDEN), &device).expect("hidden");
    let memory = Tensor::randn(0f32, 1.0, (BATCH, source, HIDDEN), &device).expect("memory");
    let mask_decoder =
        attention::masks::build_causal_mask(&device, BATCH, target, target).expect("mask");
    let mask_encoder =
        Tensor::zeros((BATCH, 1, target, source), DType::F32, &device).expect("mask");

    let mut group = c.benchmark_group("decoder_layer");
    group.throughput(Throughput::Elements((BATCH * target) as u64));
    for (label, positioning) in [("post", LayerNormPositioning::Post), ("pre", LayerNormPositioning::Pre)] {
        let resolved = config(positioning, true).resolve().expect("config");
        let layer = TransformerDecoderLayer::new(&resolved, &device, DType::F32).expect("layer");
        group.bench_function(BenchmarkId::new(label, target), |b| {
            b.iter(|| {
                let out = layer
                    .forward(black_box(&hidden), &memory, &mask_decoder, &mask_encoder, &ctx)
                    .expect("forward");
                black_box(out);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encoder, bench_decoder);
criterion_main!(benches);
