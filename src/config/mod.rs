//! Declarative configuration: features, combiner, training and backend sections

mod features;
mod model;

pub use features::{
    FeatureOptions, FeatureSpec, FeatureType, Normalization, Reduction, DEFAULT_MAX_SEQUENCE_LENGTH,
    DEFAULT_VOCAB_SIZE,
};
pub use model::{
    Activation, BackendConfig, BackendType, CombinerConfig, CombinerType, ModelConfig,
    PreprocessingParams, TrainingParams,
};
