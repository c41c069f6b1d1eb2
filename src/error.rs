//! Error types for featureflow

use thiserror::Error;

/// Result type alias for featureflow operations
pub type Result<T> = std::result::Result<T, FeatureflowError>;

/// Main error type for featureflow
#[derive(Error, Debug)]
pub enum FeatureflowError {
    /// The executor could not be started, or the context is no longer live
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// The dataset does not carry the columns the configuration declares
    #[error("Schema mismatch: missing columns {missing:?}, incompatible columns {incompatible:?}")]
    SchemaMismatch {
        missing: Vec<String>,
        incompatible: Vec<String>,
    },

    /// Training started but could not complete
    #[error("Training failed: {cause}")]
    TrainingFailed {
        #[source]
        cause: Box<FeatureflowError>,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Feature '{name}' of type {feature_type} is not supported as {role}")]
    UnsupportedFeature {
        name: String,
        feature_type: String,
        role: String,
    },

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Preprocessing error: {0}")]
    PreprocessingError(String),

    #[error("Computation error: {0}")]
    ComputationError(String),

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },
}

impl FeatureflowError {
    /// Wrap an error raised while a training run was in progress
    pub fn training_failed(cause: FeatureflowError) -> Self {
        match cause {
            already @ FeatureflowError::TrainingFailed { .. } => already,
            cause => FeatureflowError::TrainingFailed {
                cause: Box::new(cause),
            },
        }
    }

    /// Shorthand for a schema mismatch caused only by absent columns
    pub fn missing_columns(missing: Vec<String>) -> Self {
        FeatureflowError::SchemaMismatch {
            missing,
            incompatible: Vec::new(),
        }
    }
}

impl From<polars::error::PolarsError> for FeatureflowError {
    fn from(err: polars::error::PolarsError) -> Self {
        FeatureflowError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for FeatureflowError {
    fn from(err: serde_json::Error) -> Self {
        FeatureflowError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for FeatureflowError {
    fn from(err: ndarray::ShapeError) -> Self {
        FeatureflowError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}
