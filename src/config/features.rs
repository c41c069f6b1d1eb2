//! Feature declarations

use serde::{Deserialize, Serialize};
use std::fmt;

/// Type of a declared input or output column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureType {
    /// Whitespace separated token sequence
    Sequence,
    /// Real valued scalar
    #[serde(alias = "numeric", alias = "number")]
    Numerical,
    /// Unordered set of tokens
    Set,
    /// Free text
    Text,
    /// Boolean
    Binary,
    /// Multiset of tokens
    Bag,
    /// Fixed size vector of floats
    Vector,
    /// H3 geospatial cell index
    H3,
    /// Calendar date or timestamp
    Date,
    /// One label out of a vocabulary
    Category,
    /// Path to an audio file
    Audio,
    /// Path to an image file
    Image,
    /// Variable length series of floats
    Timeseries,
}

impl FeatureType {
    pub const ALL: [FeatureType; 13] = [
        FeatureType::Sequence,
        FeatureType::Numerical,
        FeatureType::Set,
        FeatureType::Text,
        FeatureType::Binary,
        FeatureType::Bag,
        FeatureType::Vector,
        FeatureType::H3,
        FeatureType::Date,
        FeatureType::Category,
        FeatureType::Audio,
        FeatureType::Image,
        FeatureType::Timeseries,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureType::Sequence => "sequence",
            FeatureType::Numerical => "numerical",
            FeatureType::Set => "set",
            FeatureType::Text => "text",
            FeatureType::Binary => "binary",
            FeatureType::Bag => "bag",
            FeatureType::Vector => "vector",
            FeatureType::H3 => "h3",
            FeatureType::Date => "date",
            FeatureType::Category => "category",
            FeatureType::Audio => "audio",
            FeatureType::Image => "image",
            FeatureType::Timeseries => "timeseries",
        }
    }

    /// Whether the tabular encoders can turn this type into model inputs
    pub fn has_input_encoder(&self) -> bool {
        !matches!(self, FeatureType::Audio | FeatureType::Image)
    }

    /// Whether an output head exists for this type
    pub fn has_output_decoder(&self) -> bool {
        matches!(
            self,
            FeatureType::Category | FeatureType::Binary | FeatureType::Numerical
        )
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalization applied to numerical features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    /// (x - mean) / std
    Zscore,
    /// (x - min) / (max - min)
    Minmax,
    #[default]
    None,
}

/// Reduction over a token axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    #[default]
    Sum,
    Mean,
    Max,
}

/// Type specific options; every field is optional and unknown keys are ignored
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalization: Option<Normalization>,

    /// Cap on the learned vocabulary, or the label count for generated data
    #[serde(default, alias = "most_common", skip_serializing_if = "Option::is_none")]
    pub vocab_size: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce_output: Option<Reduction>,

    /// Reduction applied by an output head to its input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce_input: Option<Reduction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_size: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sequence_length: Option<usize>,

    /// Value substituted for missing cells
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_value: Option<String>,

    /// chrono format string for date features
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_format: Option<String>,

    /// Weight of this output's loss in the combined objective
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss_weight: Option<f64>,
}

/// One declared input or output column. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    name: String,
    #[serde(rename = "type")]
    feature_type: FeatureType,
    #[serde(flatten)]
    options: FeatureOptions,
}

pub const DEFAULT_VOCAB_SIZE: usize = 10_000;
pub const DEFAULT_MAX_SEQUENCE_LENGTH: usize = 256;

impl FeatureSpec {
    pub fn new(name: impl Into<String>, feature_type: FeatureType) -> Self {
        Self {
            name: name.into(),
            feature_type,
            options: FeatureOptions::default(),
        }
    }

    pub fn sequence(name: impl Into<String>) -> Self {
        Self::new(name, FeatureType::Sequence)
    }

    pub fn numerical(name: impl Into<String>) -> Self {
        Self::new(name, FeatureType::Numerical)
    }

    pub fn set(name: impl Into<String>) -> Self {
        Self::new(name, FeatureType::Set)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FeatureType::Text)
    }

    pub fn binary(name: impl Into<String>) -> Self {
        Self::new(name, FeatureType::Binary)
    }

    pub fn bag(name: impl Into<String>) -> Self {
        Self::new(name, FeatureType::Bag)
    }

    pub fn vector(name: impl Into<String>) -> Self {
        Self::new(name, FeatureType::Vector)
    }

    pub fn h3(name: impl Into<String>) -> Self {
        Self::new(name, FeatureType::H3)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FeatureType::Date)
    }

    pub fn category(name: impl Into<String>) -> Self {
        Self::new(name, FeatureType::Category)
    }

    pub fn timeseries(name: impl Into<String>) -> Self {
        Self::new(name, FeatureType::Timeseries)
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.options.normalization = Some(normalization);
        self
    }

    pub fn with_vocab_size(mut self, size: usize) -> Self {
        self.options.vocab_size = Some(size);
        self
    }

    pub fn with_reduce_output(mut self, reduction: Reduction) -> Self {
        self.options.reduce_output = Some(reduction);
        self
    }

    pub fn with_reduce_input(mut self, reduction: Reduction) -> Self {
        self.options.reduce_input = Some(reduction);
        self
    }

    pub fn with_vector_size(mut self, size: usize) -> Self {
        self.options.vector_size = Some(size);
        self
    }

    pub fn with_max_sequence_length(mut self, len: usize) -> Self {
        self.options.max_sequence_length = Some(len);
        self
    }

    pub fn with_missing_value(mut self, value: impl Into<String>) -> Self {
        self.options.missing_value = Some(value.into());
        self
    }

    pub fn with_date_format(mut self, format: impl Into<String>) -> Self {
        self.options.date_format = Some(format.into());
        self
    }

    pub fn with_loss_weight(mut self, weight: f64) -> Self {
        self.options.loss_weight = Some(weight);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn feature_type(&self) -> FeatureType {
        self.feature_type
    }

    pub fn options(&self) -> &FeatureOptions {
        &self.options
    }

    pub fn normalization(&self) -> Normalization {
        self.options.normalization.unwrap_or_default()
    }

    pub fn vocab_size(&self) -> usize {
        self.options.vocab_size.unwrap_or(DEFAULT_VOCAB_SIZE)
    }

    pub fn reduce_output(&self) -> Reduction {
        self.options.reduce_output.unwrap_or_default()
    }

    pub fn reduce_input(&self) -> Reduction {
        self.options.reduce_input.unwrap_or_default()
    }

    pub fn max_sequence_length(&self) -> usize {
        self.options
            .max_sequence_length
            .unwrap_or(DEFAULT_MAX_SEQUENCE_LENGTH)
    }

    pub fn loss_weight(&self) -> f64 {
        self.options.loss_weight.unwrap_or(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_type_names_round_trip_through_serde() {
        for ft in FeatureType::ALL {
            let json = serde_json::to_string(&ft).unwrap();
            assert_eq!(json, format!("\"{}\"", ft.as_str()));
        }
        let parsed: FeatureType = serde_json::from_str("\"numeric\"").unwrap();
        assert_eq!(parsed, FeatureType::Numerical);
    }

    #[test]
    fn test_feature_spec_flattened_options() {
        let spec: FeatureSpec = serde_json::from_str(
            r#"{"name": "age", "type": "numerical", "normalization": "zscore", "encoder": "dense"}"#,
        )
        .unwrap();
        assert_eq!(spec.name(), "age");
        assert_eq!(spec.feature_type(), FeatureType::Numerical);
        assert_eq!(spec.normalization(), Normalization::Zscore);
    }

    #[test]
    fn test_most_common_alias() {
        let spec: FeatureSpec =
            serde_json::from_str(r#"{"name": "tags", "type": "set", "most_common": 50}"#).unwrap();
        assert_eq!(spec.vocab_size(), 50);
    }

    #[test]
    fn test_builder_defaults() {
        let spec = FeatureSpec::sequence("tokens").with_reduce_output(Reduction::Mean);
        assert_eq!(spec.reduce_output(), Reduction::Mean);
        assert_eq!(spec.reduce_input(), Reduction::Sum);
        assert_eq!(spec.vocab_size(), DEFAULT_VOCAB_SIZE);
        assert_eq!(spec.loss_weight(), 1.0);
    }

    #[test]
    fn test_encoder_support() {
        assert!(!FeatureType::Image.has_input_encoder());
        assert!(FeatureType::H3.has_input_encoder());
        assert!(FeatureType::Category.has_output_decoder());
        assert!(!FeatureType::Text.has_output_decoder());
    }
}
