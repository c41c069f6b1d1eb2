//! The combiner network, its training loop and trained model artifacts

pub mod metrics;
pub mod network;
pub mod trained;
pub mod trainer;

pub use metrics::{OutputMetrics, SplitMetrics};
pub use network::{CombinerNetwork, DenseLayer, Gradients, OutputHead};
pub use trained::TrainedModel;
pub use trainer::{EncodedSplit, EpochStats, Trainer, TrainingStatistics};
