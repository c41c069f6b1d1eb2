//! featureflow - declarative tabular model training
//!
//! A model is described by a [`ModelConfig`](config::ModelConfig): typed input
//! features, output features, a concat combiner and training hyperparameters.
//! Training and prediction run through a pluggable [`Backend`](backend::Backend):
//!
//! - [`LocalBackend`](backend::LocalBackend) runs on the calling thread
//! - [`DistributedBackend`](backend::DistributedBackend) reserves a pool of
//!   workers per [`ExecutionContext`](backend::ExecutionContext) and spreads
//!   partition loading, feature encoding, gradient computation and prediction
//!   across it
//!
//! # Modules
//!
//! - [`config`] - feature specs and model configuration
//! - [`data`] - dataset handles, file formats, partitions, splits, synthetic data
//! - [`preprocessing`] - per-feature encoders fitted on the training split
//! - [`model`] - the combiner network, training loop and saved models
//! - [`backend`] - the backend contract and its implementations
//! - [`cli`] - command-line interface
//!
//! # Example
//!
//! ```no_run
//! use featureflow::prelude::*;
//!
//! # fn main() -> featureflow::error::Result<()> {
//! let config = ModelConfig::from_file("model.json")?;
//! let dataset = DatasetHandle::from_path("data.parquet")?;
//! let backend = DistributedBackend::new();
//!
//! let predictions = with_execution_context(&backend, &ResourceHints::workers(4), |ctx| {
//!     let trained = backend.train(ctx, &config, &dataset, &TrainOptions::default())?;
//!     backend.predict(ctx, &trained.model, &dataset)
//! })?;
//! println!("{}", predictions.frame());
//! # Ok(())
//! # }
//! ```

pub mod error;

pub mod config;
pub mod data;
pub mod preprocessing;
pub mod model;
pub mod backend;

pub mod cli;
pub mod utils;

pub use error::{FeatureflowError, Result};

/// Prelude for common imports
pub mod prelude {
    pub use crate::backend::{
        create_backend, with_execution_context, Backend, DistributedBackend, ExecutionContext,
        LocalBackend, Predictions, ResourceHints, TrainOptions, TrainingResult,
    };
    pub use crate::config::{
        BackendConfig, CombinerConfig, FeatureSpec, FeatureType, ModelConfig, TrainingParams,
    };
    pub use crate::data::{DatasetHandle, PartitionedDataset, SyntheticDataGenerator};
    pub use crate::error::{FeatureflowError, Result};
    pub use crate::model::TrainedModel;
}
