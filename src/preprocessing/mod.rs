//! Feature preprocessing
//!
//! Encoders are fitted on the training split only and then applied unchanged
//! to validation, test and prediction data.

pub mod cells;
pub mod encoders;
pub mod h3;
pub mod pipeline;
pub mod targets;
pub mod tokenizer;

pub use encoders::{FittedInput, InputEncoder};
pub use h3::H3Components;
pub use pipeline::FeaturePipeline;
pub use targets::{FittedOutput, HeadKind, OutputEncoder};
pub use tokenizer::{Tokenizer, Vocabulary, UNKNOWN_TOKEN};
