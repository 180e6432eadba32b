use std::{fs, path::PathBuf};

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use layers::{activations::ActivationKind, mlp::FeedForwardKind, ForwardContext};
use tempfile::TempDir;
use transformer::{
    ConfigError, LayerConfig, LayerNormPositioning, StackConfig, TransformerDecoder,
    TransformerEncoder,
};

fn write(dir: &TempDir, name: &str, contents: &str) -> Result<PathBuf> {
    let path = dir.path().join(name);
    fs::write(&path, contents)?;
    Ok(path)
}

#[test]
fn json_config_fills_defaults() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write(
        &dir,
        "layer.json",
        r#"{ "hidden_size": 768, "heads_num": 12, "feedforward_size": 3072 }"#,
    )?;
    let config = LayerConfig::from_path(&path)?;
    assert_eq!(config, LayerConfig::new(768, 12, 3072));
    assert_eq!(config.dropout, 0.1);
    assert_eq!(config.hidden_act, ActivationKind::Gelu);
    assert_eq!(config.feed_forward, FeedForwardKind::Dense);
    assert_eq!(config.layernorm_positioning, LayerNormPositioning::Post);
    assert_eq!(config.resolve()?.attention_head_size, 64);
    Ok(())
}

#[test]
fn toml_config_reads_every_field() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write(
        &dir,
        "layer.toml",
        r#"
hidden_size = 512
heads_num = 8
attention_head_size = 32
feedforward_size = 2048
dropout = 0.0
hidden_act = "silu"
feed_forward = "gated"
layernorm_positioning = "pre"
remove_transformer_bias = true
relative_position_embedding = true
relative_attention_buckets_num = 16
relative_attention_max_distance = 64
layernorm_eps = 1e-5
seed = 7
"#,
    )?;
    let resolved = LayerConfig::from_path(&path)?.resolve()?;
    assert_eq!(resolved.attention_head_size, 32);
    assert_eq!(resolved.hidden_act, ActivationKind::Silu);
    assert_eq!(resolved.feed_forward, FeedForwardKind::Gated);
    assert_eq!(resolved.layernorm_positioning, LayerNormPositioning::Pre);
    assert!(!resolved.has_bias);
    assert_eq!(resolved.relative_position.as_ref().map(|r| r.num_buckets), Some(16));
    assert_eq!(resolved.layernorm_eps, 1e-5);
    assert_eq!(resolved.seed, 7);
    Ok(())
}

#[test]
fn unknown_feed_forward_and_positioning_fall_back() -> Result<()> {
    let config: LayerConfig = serde_json::from_str(
        r#"{ "hidden_size": 8, "heads_num": 2, "feedforward_size": 16,
             "feed_forward": "mixture", "layernorm_positioning": "middle" }"#,
    )?;
    assert_eq!(config.feed_forward, FeedForwardKind::Dense);
    assert_eq!(config.layernorm_positioning, LayerNormPositioning::Pre);
    Ok(())
}

#[test]
fn unknown_activation_is_a_parse_error() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write(
        &dir,
        "layer.json",
        r#"{ "hidden_size": 8, "heads_num": 2, "feedforward_size": 16, "hidden_act": "swish" }"#,
    )?;
    let err = LayerConfig::from_path(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Json(_)));
    assert!(err.to_string().contains("unknown activation 'swish'"), "{err}");
    Ok(())
}

#[test]
fn invalid_values_are_reported_together() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write(
        &dir,
        "layer.toml",
        "hidden_size = 8\nheads_num = 16\nfeedforward_size = 0\ndropout = 1.0\n",
    )?;
    match LayerConfig::from_path(&path) {
        Err(ConfigError::Validation(errors)) => {
            assert_eq!(errors.len(), 3, "{errors:?}");
            assert!(errors.iter().any(|e| e.contains("attention_head_size")));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn unsupported_extension_and_missing_file_are_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write(&dir, "layer.yaml", "hidden_size: 8")?;
    assert!(matches!(LayerConfig::from_path(&path), Err(ConfigError::Format(ext)) if ext == "yaml"));
    assert!(matches!(
        LayerConfig::from_path(dir.path().join("absent.json")),
        Err(ConfigError::Io(_))
    ));
    Ok(())
}

#[test]
fn serialised_config_loads_back() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = LayerConfig::new(16, 4, 64);
    config.feed_forward = FeedForwardKind::Gated;
    config.layernorm_positioning = LayerNormPositioning::Pre;
    let path = write(&dir, "layer.toml", &toml::to_string(&config)?)?;
    assert_eq!(LayerConfig::from_path(&path)?, config);
    Ok(())
}

#[test]
fn stack_config_builds_encoder_and_decoder() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write(
        &dir,
        "stack.toml",
        r#"
layers_num = 3

[layer]
hidden_size = 8
heads_num = 2
feedforward_size = 16
layernorm_positioning = "pre"
"#,
    )?;
    let stack = StackConfig::from_path(&path)?.resolve()?;
    let device = Device::Cpu;
    let ctx = ForwardContext::eval(DType::F32);

    let encoder = TransformerEncoder::new(&stack, &device, DType::F32)?;
    assert_eq!(encoder.layers().len(), 3);
    assert!(encoder.has_final_norm());
    let source = Tensor::randn(0f32, 1.0, (2, 5, 8), &device)?;
    let memory = encoder.forward(&source, &Tensor::zeros((2, 1, 5, 5), DType::F32, &device)?, &ctx)?;
    assert_eq!(memory.dims(), &[2, 5, 8]);

    let decoder = TransformerDecoder::new(&stack, &device, DType::F32)?;
    assert_eq!(decoder.layers().len(), 3);
    let target = Tensor::randn(0f32, 1.0, (2, 4, 8), &device)?;
    let output = decoder.forward(
        &target,
        &memory,
        &attention::masks::build_causal_mask(&device, 2, 4, 4)?,
        &attention::masks::padding_mask_from_lengths(&device, &[5, 3], 4, 5)?,
        &ctx,
    )?;
    assert_eq!(output.dims(), &[2, 4, 8]);
    Ok(())
}

#[test]
fn post_norm_stack_has_no_final_norm() -> Result<()> {
    let stack = StackConfig::new(2, LayerConfig::new(8, 2, 16)).resolve()?;
    let encoder = TransformerEncoder::new(&stack, &Device::Cpu, DType::F32)?;
    assert!(!encoder.has_final_norm());
    assert!(encoder
        .layers()
        .iter()
        .all(|layer| layer.positioning() == LayerNormPositioning::Post));
    Ok(())
}
