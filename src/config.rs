use crate::error::{Result, SemIdError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How a codebook layer lets gradients reach the encoder through the
/// discrete codeword selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardMode {
    /// Identity gradient: `x + sg(q - x)`.
    Ste,
    /// Rotation trick: the gradient is carried by the rotation that maps the
    /// input direction onto the codeword direction, rescaled by `|q| / |x|`.
    RotationTrick,
    /// Straight-through Gumbel softmax over negative distances.
    GumbelSoftmax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMode {
    L2,
    Cosine,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RqVaeConfig {
    pub input_dim: usize,
    pub embed_dim: usize,
    pub hidden_dims: Vec<usize>,
    pub codebook_size: usize,
    pub n_layers: usize,
    pub commitment_weight: f64,
    /// Multiplier on the codebook loss in the total loss.
    pub codebook_loss_weight: f64,
    /// Width of the trailing categorical block scored with cross-entropy.
    pub n_cat_features: usize,
    pub codebook_kmeans_init: bool,
    pub codebook_normalize: bool,
    pub codebook_sim_vq: bool,
    pub forward_mode: ForwardMode,
    pub distance: DistanceMode,
    pub kmeans_iters: usize,
    pub seed: u64,
}

impl Default for RqVaeConfig {
    fn default() -> Self {
        Self {
            input_dim: 768,
            embed_dim: 32,
            hidden_dims: vec![512, 256, 128],
            codebook_size: 256,
            n_layers: 3,
            commitment_weight: 0.25,
            codebook_loss_weight: 3.0,
            n_cat_features: 18,
            codebook_kmeans_init: true,
            codebook_normalize: false,
            codebook_sim_vq: false,
            forward_mode: ForwardMode::RotationTrick,
            distance: DistanceMode::L2,
            kmeans_iters: 100,
            seed: 42,
        }
    }
}

impl RqVaeConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let config: Self = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_dim == 0 || self.embed_dim == 0 {
            return Err(SemIdError::Config("input_dim and embed_dim must be positive".into()));
        }
        if self.hidden_dims.contains(&0) {
            return Err(SemIdError::Config("hidden_dims must be positive".into()));
        }
        if self.codebook_size < 2 {
            return Err(SemIdError::Config(format!(
                "codebook_size must be at least 2, got {}",
                self.codebook_size
            )));
        }
        if self.codebook_size > u32::MAX as usize {
            return Err(SemIdError::Config("codebook_size does not fit in u32".into()));
        }
        if self.n_layers == 0 {
            return Err(SemIdError::Config("n_layers must be positive".into()));
        }
        if self.n_cat_features > self.input_dim {
            return Err(SemIdError::Config(format!(
                "n_cat_features ({}) exceeds input_dim ({})",
                self.n_cat_features, self.input_dim
            )));
        }
        if self.commitment_weight < 0.0 || self.codebook_loss_weight < 0.0 {
            return Err(SemIdError::Config("loss weights must be non-negative".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    /// Items per quantizer pass while building the corpus table.
    pub batch_size: usize,
    /// Feature rows longer than this are truncated.
    pub max_feature_dim: usize,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            batch_size: 512,
            max_feature_dim: 768,
        }
    }
}

impl TokenizerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.max_feature_dim == 0 {
            return Err(SemIdError::Config("batch_size and max_feature_dim must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemperatureConfig {
    pub t0: f64,
    pub min_t: f64,
    pub anneal_rate: f64,
    pub step_size: usize,
}

impl Default for TemperatureConfig {
    fn default() -> Self {
        Self {
            t0: 2.0,
            min_t: 0.1,
            anneal_rate: 0.00003,
            step_size: 3000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub batch_size: usize,
    /// Number of corpus rows fed to the one-off k-means initialization.
    pub kmeans_init_samples: usize,
    pub temperature: TemperatureConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.0001,
            weight_decay: 0.01,
            batch_size: 64,
            kmeans_init_samples: 20000,
            temperature: TemperatureConfig::default(),
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(SemIdError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(SemIdError::Config(format!(
                "weight_decay must be non-negative, got {}",
                self.weight_decay
            )));
        }
        if self.batch_size == 0 {
            return Err(SemIdError::Config("batch_size must be positive".into()));
        }
        let t = &self.temperature;
        if !(t.t0 > 0.0 && t.min_t > 0.0 && t.anneal_rate >= 0.0) || t.step_size == 0 {
            return Err(SemIdError::Config(
                "temperature needs t0 > 0, min_t > 0, anneal_rate >= 0 and step_size > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Everything a run needs, as stored in a JSON config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub rqvae: RqVaeConfig,
    pub tokenizer: TokenizerConfig,
    pub train: TrainConfig,
}

impl EngineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let config: Self = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        config.rqvae.validate()?;
        config.tokenizer.validate()?;
        config.train.validate()?;
        Ok(config)
    }
}
