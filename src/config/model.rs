//! Model configuration

use super::features::FeatureSpec;
use crate::error::{FeatureflowError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Activation function for fully connected layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// Rectified Linear Unit
    #[default]
    Relu,
    /// Sigmoid
    Sigmoid,
    /// Hyperbolic tangent
    Tanh,
    /// Identity
    Linear,
}

/// Strategy for merging encoded inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombinerType {
    /// Concatenate encoder outputs and pass them through fully connected layers
    #[default]
    Concat,
}

/// Combiner section of the configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinerConfig {
    #[serde(rename = "type")]
    pub combiner_type: CombinerType,

    /// Width of each fully connected layer
    #[serde(default = "default_fc_size")]
    pub fc_size: usize,

    /// Number of fully connected layers after concatenation
    #[serde(default = "default_num_fc_layers")]
    pub num_fc_layers: usize,

    #[serde(default)]
    pub activation: Activation,
}

fn default_fc_size() -> usize {
    256
}

fn default_num_fc_layers() -> usize {
    1
}

impl Default for CombinerConfig {
    fn default() -> Self {
        Self {
            combiner_type: CombinerType::Concat,
            fc_size: default_fc_size(),
            num_fc_layers: default_num_fc_layers(),
            activation: Activation::Relu,
        }
    }
}

impl CombinerConfig {
    pub fn concat(fc_size: usize) -> Self {
        Self {
            fc_size,
            ..Default::default()
        }
    }

    pub fn with_num_fc_layers(mut self, n: usize) -> Self {
        self.num_fc_layers = n;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }
}

/// Training hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingParams {
    pub epochs: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    #[serde(default = "default_momentum")]
    pub momentum: f64,

    /// L2 penalty applied to weights
    #[serde(default)]
    pub regularization_lambda: f64,

    /// Epochs without validation improvement before stopping; None disables
    #[serde(default = "default_early_stop")]
    pub early_stop: Option<usize>,

    #[serde(default = "default_random_seed")]
    pub random_seed: u64,
}

fn default_batch_size() -> usize {
    128
}

fn default_learning_rate() -> f64 {
    0.001
}

fn default_momentum() -> f64 {
    0.9
}

fn default_early_stop() -> Option<usize> {
    Some(5)
}

fn default_random_seed() -> u64 {
    42
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: default_batch_size(),
            learning_rate: default_learning_rate(),
            momentum: default_momentum(),
            regularization_lambda: 0.0,
            early_stop: default_early_stop(),
            random_seed: default_random_seed(),
        }
    }
}

impl TrainingParams {
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_early_stop(mut self, patience: Option<usize>) -> Self {
        self.early_stop = patience;
        self
    }

    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }
}

/// Dataset preprocessing section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingParams {
    /// Fractions of rows assigned to training, validation and test splits
    #[serde(default = "default_split_probabilities")]
    pub split_probabilities: [f64; 3],
}

fn default_split_probabilities() -> [f64; 3] {
    [0.7, 0.1, 0.2]
}

impl Default for PreprocessingParams {
    fn default() -> Self {
        Self {
            split_probabilities: default_split_probabilities(),
        }
    }
}

/// Which execution backend to run on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    #[default]
    Local,
    #[serde(alias = "ray", alias = "dask")]
    Distributed,
}

/// Backend section of the configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(rename = "type", default)]
    pub backend_type: BackendType,

    /// Workers to reserve; None means all available cores
    #[serde(default)]
    pub num_workers: Option<usize>,

    /// Upper bound on workers a distributed backend will hand out
    #[serde(default)]
    pub max_workers: Option<usize>,
}

impl BackendConfig {
    pub fn local() -> Self {
        Self::default()
    }

    pub fn distributed(num_workers: usize) -> Self {
        Self {
            backend_type: BackendType::Distributed,
            num_workers: Some(num_workers),
            max_workers: None,
        }
    }
}

/// Declarative model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub input_features: Vec<FeatureSpec>,
    pub output_features: Vec<FeatureSpec>,
    pub combiner: CombinerConfig,
    pub training: TrainingParams,
    #[serde(default)]
    pub preprocessing: PreprocessingParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendConfig>,
}

impl ModelConfig {
    /// Create a configuration with default combiner and training sections
    pub fn new(input_features: Vec<FeatureSpec>, output_features: Vec<FeatureSpec>) -> Self {
        Self {
            input_features,
            output_features,
            combiner: CombinerConfig::default(),
            training: TrainingParams::default(),
            preprocessing: PreprocessingParams::default(),
            backend: None,
        }
    }

    pub fn with_combiner(mut self, combiner: CombinerConfig) -> Self {
        self.combiner = combiner;
        self
    }

    pub fn with_training(mut self, training: TrainingParams) -> Self {
        self.training = training;
        self
    }

    pub fn with_split_probabilities(mut self, probabilities: [f64; 3]) -> Self {
        self.preprocessing.split_probabilities = probabilities;
        self
    }

    pub fn with_backend(mut self, backend: BackendConfig) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Parse a JSON document and validate it
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| FeatureflowError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// All declared features, inputs first
    pub fn all_features(&self) -> impl Iterator<Item = &FeatureSpec> {
        self.input_features.iter().chain(self.output_features.iter())
    }

    /// Check structural invariants
    pub fn validate(&self) -> Result<()> {
        if self.input_features.is_empty() {
            return Err(FeatureflowError::InvalidConfig(
                "at least one input feature is required".to_string(),
            ));
        }
        if self.output_features.is_empty() {
            return Err(FeatureflowError::InvalidConfig(
                "at least one output feature is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for feature in self.all_features() {
            if feature.name().is_empty() {
                return Err(FeatureflowError::InvalidConfig(
                    "feature names must not be empty".to_string(),
                ));
            }
            if !seen.insert(feature.name()) {
                return Err(FeatureflowError::InvalidConfig(format!(
                    "duplicate feature name '{}'",
                    feature.name()
                )));
            }
        }

        if self.training.epochs == 0 {
            return Err(FeatureflowError::InvalidConfig(
                "training.epochs must be > 0".to_string(),
            ));
        }
        if self.training.batch_size == 0 {
            return Err(FeatureflowError::InvalidConfig(
                "training.batch_size must be > 0".to_string(),
            ));
        }
        if !(self.training.learning_rate > 0.0) {
            return Err(FeatureflowError::InvalidConfig(format!(
                "training.learning_rate must be positive, got {}",
                self.training.learning_rate
            )));
        }
        if self.combiner.num_fc_layers > 0 && self.combiner.fc_size == 0 {
            return Err(FeatureflowError::InvalidConfig(
                "combiner.fc_size must be > 0".to_string(),
            ));
        }

        let probs = self.preprocessing.split_probabilities;
        if probs.iter().any(|p| *p < 0.0) || (probs.iter().sum::<f64>() - 1.0).abs() > 1e-6 {
            return Err(FeatureflowError::InvalidConfig(format!(
                "preprocessing.split_probabilities must be non-negative and sum to 1, got {probs:?}"
            )));
        }
        if probs[0] <= 0.0 {
            return Err(FeatureflowError::InvalidConfig(
                "the training split must receive a positive share of rows".to_string(),
            ));
        }

        Ok(())
    }

    /// Check that every declared feature has an encoder or decoder
    pub fn validate_for_training(&self) -> Result<()> {
        self.validate()?;
        for feature in &self.input_features {
            if !feature.feature_type().has_input_encoder() {
                return Err(unsupported(feature, "an input"));
            }
        }
        for feature in &self.output_features {
            if !feature.feature_type().has_output_decoder() {
                return Err(unsupported(feature, "an output"));
            }
        }
        Ok(())
    }
}

fn unsupported(feature: &FeatureSpec, role: &str) -> FeatureflowError {
    FeatureflowError::UnsupportedFeature {
        name: feature.name().to_string(),
        feature_type: feature.feature_type().to_string(),
        role: role.to_string(),
    }
}
