//! Layer and stack configuration.
//!
//! [`LayerConfig`] is the serialisable description read from JSON or TOML;
//! [`LayerConfig::resolve`] validates it and fills in derived values, giving
//! the immutable [`ResolvedLayerConfig`] that layers are built from.

use std::{fmt, fs, path::Path};

use attention::AttentionConfig;
use embedding::RelativePositionConfig;
use layers::{
    activations::ActivationKind,
    mlp::{FeedForwardConfig, FeedForwardKind},
    norm::NormConfig,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported configuration extension '{0}'")]
    Format(String),
    #[error("invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),
}

/// Where layer normalisation sits relative to each residual connection.
///
/// `"post"` normalises after the residual add; any other name selects the
/// pre-norm layout, which normalises the sub-layer input instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LayerNormPositioning {
    #[default]
    Post,
    Pre,
}

impl From<&str> for LayerNormPositioning {
    fn from(name: &str) -> Self {
        match name {
            "post" => LayerNormPositioning::Post,
            _ => LayerNormPositioning::Pre,
        }
    }
}

impl From<String> for LayerNormPositioning {
    fn from(name: String) -> Self {
        LayerNormPositioning::from(name.as_str())
    }
}

impl From<LayerNormPositioning> for String {
    fn from(positioning: LayerNormPositioning) -> Self {
        positioning.to_string()
    }
}

impl fmt::Display for LayerNormPositioning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LayerNormPositioning::Post => "post",
            LayerNormPositioning::Pre => "pre",
        })
    }
}

fn default_dropout() -> f32 {
    0.1
}

fn default_hidden_act() -> ActivationKind {
    ActivationKind::Gelu
}

fn default_buckets_num() -> usize {
    32
}

fn default_max_distance() -> usize {
    128
}

fn default_layernorm_eps() -> f64 {
    1e-6
}

/// Hyperparameters of one encoder or decoder layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub hidden_size: usize,
    pub heads_num: usize,
    /// Defaults to `hidden_size / heads_num` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attention_head_size: Option<usize>,
    pub feedforward_size: usize,
    #[serde(default = "default_dropout")]
    pub dropout: f32,
    #[serde(default = "default_hidden_act")]
    pub hidden_act: ActivationKind,
    #[serde(default)]
    pub feed_forward: FeedForwardKind,
    #[serde(default)]
    pub layernorm_positioning: LayerNormPositioning,
    #[serde(default)]
    pub remove_transformer_bias: bool,
    #[serde(default)]
    pub relative_position_embedding: bool,
    #[serde(default = "default_buckets_num")]
    pub relative_attention_buckets_num: usize,
    #[serde(default = "default_max_distance")]
    pub relative_attention_max_distance: usize,
    #[serde(default = "default_layernorm_eps")]
    pub layernorm_eps: f64,
    /// Base seed of the residual dropout generators.
    #[serde(default)]
    pub seed: u64,
}

impl LayerConfig {
    /// Required sizes with every optional field at its default.
    pub fn new(hidden_size: usize, heads_num: usize, feedforward_size: usize) -> Self {
        Self {
            hidden_size,
            heads_num,
            attention_head_size: None,
            feedforward_size,
            dropout: default_dropout(),
            hidden_act: default_hidden_act(),
            feed_forward: FeedForwardKind::default(),
            layernorm_positioning: LayerNormPositioning::default(),
            remove_transformer_bias: false,
            relative_position_embedding: false,
            relative_attention_buckets_num: default_buckets_num(),
            relative_attention_max_distance: default_max_distance(),
            layernorm_eps: default_layernorm_eps(),
            seed: 0,
        }
    }

    /// Loads a config from `.json` or `.toml`; files without an extension are read as TOML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: LayerConfig = load_file(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    fn head_size(&self) -> usize {
        self.attention_head_size
            .unwrap_or_else(|| self.hidden_size.checked_div(self.heads_num).unwrap_or(0))
    }

    fn collect_errors(&self, prefix: &str, errors: &mut Vec<String>) {
        if self.hidden_size == 0 {
            errors.push(format!("{prefix}hidden_size must be greater than 0"));
        }
        if self.heads_num == 0 {
            errors.push(format!("{prefix}heads_num must be greater than 0"));
        }
        if self.feedforward_size == 0 {
            errors.push(format!("{prefix}feedforward_size must be greater than 0"));
        }
        if self.heads_num > 0 && self.head_size() == 0 {
            errors.push(format!(
                "{prefix}attention_head_size resolves to 0 (hidden_size {} / heads_num {})",
                self.hidden_size, self.heads_num
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            errors.push(format!("{prefix}dropout must be in [0, 1)"));
        }
        if self.layernorm_eps <= 0.0 {
            errors.push(format!("{prefix}layernorm_eps must be greater than 0"));
        }
        if self.relative_position_embedding {
            let max_exact = self.relative_attention_buckets_num / 2;
            if max_exact == 0 {
                errors.push(format!(
                    "{prefix}relative_attention_buckets_num must be at least 2"
                ));
            } else if self.relative_attention_max_distance <= max_exact {
                errors.push(format!(
                    "{prefix}relative_attention_max_distance must exceed relative_attention_buckets_num / 2"
                ));
            }
        }
    }

    /// Checks every field and reports all problems together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        self.collect_errors("", &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    pub fn resolve(&self) -> Result<ResolvedLayerConfig, ConfigError> {
        self.validate()?;
        let relative_position = self.relative_position_embedding.then(|| {
            RelativePositionConfig::new(self.heads_num).with_buckets(
                self.relative_attention_buckets_num,
                self.relative_attention_max_distance,
            )
        });
        Ok(ResolvedLayerConfig {
            hidden_size: self.hidden_size,
            heads_num: self.heads_num,
            attention_head_size: self.head_size(),
            feedforward_size: self.feedforward_size,
            dropout: self.dropout,
            hidden_act: self.hidden_act,
            feed_forward: self.feed_forward,
            layernorm_positioning: self.layernorm_positioning,
            has_bias: !self.remove_transformer_bias,
            relative_position,
            layernorm_eps: self.layernorm_eps,
            seed: self.seed,
        })
    }
}

/// Validated layer hyperparameters with every derived value filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLayerConfig {
    pub hidden_size: usize,
    pub heads_num: usize,
    pub attention_head_size: usize,
    pub feedforward_size: usize,
    pub dropout: f32,
    pub hidden_act: ActivationKind,
    pub feed_forward: FeedForwardKind,
    pub layernorm_positioning: LayerNormPositioning,
    /// Shared by every projection and normalisation in the layer.
    pub has_bias: bool,
    /// Present when relative position bias is enabled. Always unidirectional.
    pub relative_position: Option<RelativePositionConfig>,
    pub layernorm_eps: f64,
    pub seed: u64,
}

impl ResolvedLayerConfig {
    pub fn attention_config(&self) -> AttentionConfig {
        AttentionConfig::new(self.hidden_size, self.heads_num)
            .with_head_size(self.attention_head_size)
            .with_dropout(self.dropout)
            .with_bias(self.has_bias)
    }

    pub fn feed_forward_config(&self) -> FeedForwardConfig {
        let mut config =
            FeedForwardConfig::new(self.hidden_size, self.feedforward_size, self.hidden_act);
        config.has_bias = self.has_bias;
        config
    }

    pub fn norm_config(&self) -> NormConfig {
        NormConfig {
            hidden_size: self.hidden_size,
            epsilon: self.layernorm_eps,
            has_bias: self.has_bias,
        }
    }

    /// Same layer with a different dropout base seed.
    pub fn with_seed(&self, seed: u64) -> Self {
        Self {
            seed,
            ..self.clone()
        }
    }
}

/// A stack of identical layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    pub layers_num: usize,
    pub layer: LayerConfig,
}

impl StackConfig {
    pub fn new(layers_num: usize, layer: LayerConfig) -> Self {
        Self { layers_num, layer }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: StackConfig = load_file(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        if self.layers_num == 0 {
            errors.push("layers_num must be greater than 0".to_string());
        }
        self.layer.collect_errors("layer.", &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    pub fn resolve(&self) -> Result<ResolvedStackConfig, ConfigError> {
        self.validate()?;
        Ok(ResolvedStackConfig {
            layers_num: self.layers_num,
            layer: self.layer.resolve()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStackConfig {
    pub layers_num: usize,
    pub layer: ResolvedLayerConfig,
}

fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = fs::read_to_string(path)?;
    let config = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&contents)?,
        Some("toml") | Some("tml") | None => toml::from_str(&contents)?,
        Some(other) => return Err(ConfigError::Format(other.to_string())),
    };
    log::debug!("loaded config from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positioning_names_map_to_post_or_pre() {
        assert_eq!(LayerNormPositioning::from("post"), LayerNormPositioning::Post);
        assert_eq!(LayerNormPositioning::from("pre"), LayerNormPositioning::Pre);
        assert_eq!(LayerNormPositioning::from("sandwich"), LayerNormPositioning::Pre);
        assert_eq!(String::from(LayerNormPositioning::Pre), "pre");
    }

    #[test]
    fn resolve_derives_head_size_and_bias() {
        let mut config = LayerConfig::new(768, 12, 3072);
        config.remove_transformer_bias = true;
        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.attention_head_size, 64);
        assert!(!resolved.has_bias);
        assert!(resolved.relative_position.is_none());
        assert!(!resolved.norm_config().has_bias);
        assert!(!resolved.feed_forward_config().has_bias);
        assert!(!resolved.attention_config().has_bias);
    }

    #[test]
    fn explicit_head_size_wins() {
        let mut config = LayerConfig::new(8, 2, 16);
        config.attention_head_size = Some(3);
        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.attention_head_size, 3);
        assert_eq!(resolved.attention_config().inner_size(), 6);
    }

    #[test]
    fn relative_position_settings_are_carried() {
        let mut config = LayerConfig::new(8, 2, 16);
        config.relative_position_embedding = true;
        config.relative_attention_buckets_num = 16;
        config.relative_attention_max_distance = 64;
        let relative = config.resolve().unwrap().relative_position.unwrap();
        assert_eq!(relative.heads_num, 2);
        assert_eq!(relative.num_buckets, 16);
        assert_eq!(relative.max_distance, 64);
        assert!(!relative.bidirectional);
    }

    #[test]
    fn validation_collects_every_problem() {
        let mut config = LayerConfig::new(0, 0, 0);
        config.dropout = 1.5;
        match config.validate() {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 4, "{errors:?}"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn stack_errors_are_prefixed() {
        let stack = StackConfig::new(0, LayerConfig::new(8, 0, 16));
        let message = stack.validate().unwrap_err().to_string();
        assert!(message.contains("layers_num"));
        assert!(message.contains("layer.heads_num"));
    }
}
