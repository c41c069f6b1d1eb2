//! Random datasets shaped like a feature list
//!
//! Used by tests, benchmarks and the `synthesize` command to produce data for
//! any configuration without a real dataset at hand.

use crate::config::{FeatureSpec, FeatureType};
use crate::error::{FeatureflowError, Result};
use crate::preprocessing::h3::{H3Components, NUM_BASE_CELLS, UNUSED_DIGIT};
use chrono::{Duration, NaiveDate};
use polars::prelude::*;
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use tracing::debug;

/// Labels per generated vocabulary unless the feature sets `vocab_size`
pub const DEFAULT_SYNTHETIC_VOCAB: usize = 10;
/// Tokens per generated sequence unless the feature sets `max_sequence_length`
pub const DEFAULT_SYNTHETIC_LENGTH: usize = 10;
const DEFAULT_VECTOR_SIZE: usize = 10;
const MAX_H3_RESOLUTION: u8 = 10;

/// Seeded generator of synthetic frames
#[derive(Debug, Clone)]
pub struct SyntheticDataGenerator {
    rng: Xoshiro256PlusPlus,
}

impl SyntheticDataGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
        }
    }

    /// One column per feature, `n_rows` rows
    pub fn generate<'a>(
        &mut self,
        features: impl IntoIterator<Item = &'a FeatureSpec>,
        n_rows: usize,
    ) -> Result<DataFrame> {
        let mut columns = Vec::new();
        for spec in features {
            columns.push(self.column(spec, n_rows)?);
        }
        debug!(rows = n_rows, columns = columns.len(), "generated synthetic data");
        Ok(DataFrame::new(columns)?)
    }

    fn column(&mut self, spec: &FeatureSpec, n: usize) -> Result<Column> {
        let name: PlSmallStr = spec.name().into();
        let options = spec.options();
        let vocab_size = options.vocab_size.unwrap_or(DEFAULT_SYNTHETIC_VOCAB).max(1);
        let max_len = options
            .max_sequence_length
            .unwrap_or(DEFAULT_SYNTHETIC_LENGTH)
            .max(1);

        let column = match spec.feature_type() {
            FeatureType::Numerical => {
                let values: Vec<f64> = (0..n).map(|_| self.rng.gen_range(-10.0..10.0)).collect();
                Column::new(name, values)
            }
            FeatureType::Binary => {
                let values: Vec<bool> = (0..n).map(|_| self.rng.gen_bool(0.5)).collect();
                Column::new(name, values)
            }
            FeatureType::Category => {
                let vocab = self.vocabulary(vocab_size);
                let values: Vec<String> = (0..n).map(|_| self.pick(&vocab)).collect();
                Column::new(name, values)
            }
            FeatureType::Sequence | FeatureType::Set | FeatureType::Bag | FeatureType::Text => {
                let vocab = self.vocabulary(vocab_size);
                let values: Vec<String> = (0..n)
                    .map(|_| {
                        let len = self.rng.gen_range(1..=max_len);
                        (0..len).map(|_| self.pick(&vocab)).collect::<Vec<_>>().join(" ")
                    })
                    .collect();
                Column::new(name, values)
            }
            FeatureType::Vector => {
                let size = options.vector_size.unwrap_or(DEFAULT_VECTOR_SIZE).max(1);
                let values: Vec<String> = (0..n).map(|_| self.floats(size)).collect();
                Column::new(name, values)
            }
            FeatureType::Timeseries => {
                let values: Vec<String> = (0..n)
                    .map(|_| {
                        let len = self.rng.gen_range(1..=max_len);
                        self.floats(len)
                    })
                    .collect();
                Column::new(name, values)
            }
            FeatureType::H3 => {
                let values: Vec<i64> = (0..n).map(|_| self.h3_index() as i64).collect();
                Column::new(name, values)
            }
            FeatureType::Date => {
                let format = options
                    .date_format
                    .clone()
                    .unwrap_or_else(|| "%Y-%m-%d %H:%M:%S".to_string());
                let epoch = NaiveDate::from_ymd_opt(1990, 1, 1)
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .ok_or_else(|| FeatureflowError::ComputationError("invalid base date".into()))?;
                let values: Vec<String> = (0..n)
                    .map(|_| {
                        let offset = Duration::seconds(self.rng.gen_range(0..40 * 365 * 86_400));
                        (epoch + offset).format(&format).to_string()
                    })
                    .collect();
                Column::new(name, values)
            }
            FeatureType::Audio | FeatureType::Image => {
                return Err(FeatureflowError::UnsupportedFeature {
                    name: spec.name().to_string(),
                    feature_type: spec.feature_type().to_string(),
                    role: "synthetic data".to_string(),
                })
            }
        };
        Ok(column)
    }

    /// `size` distinct lowercase words
    fn vocabulary(&mut self, size: usize) -> Vec<String> {
        let mut words = Vec::with_capacity(size);
        while words.len() < size {
            let len = self.rng.gen_range(3..=8);
            let word: String = (&mut self.rng)
                .sample_iter(&Alphanumeric)
                .filter(u8::is_ascii_alphabetic)
                .take(len)
                .map(|b| char::from(b.to_ascii_lowercase()))
                .collect();
            if !words.contains(&word) {
                words.push(word);
            }
        }
        words
    }

    fn pick(&mut self, vocab: &[String]) -> String {
        vocab.choose(&mut self.rng).cloned().unwrap_or_default()
    }

    fn floats(&mut self, len: usize) -> String {
        (0..len)
            .map(|_| format!("{:.4}", self.rng.gen_range(-1.0..1.0)))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn h3_index(&mut self) -> u64 {
        let resolution = self.rng.gen_range(0..=MAX_H3_RESOLUTION);
        let mut digits = [UNUSED_DIGIT; 15];
        for digit in digits.iter_mut().take(resolution as usize) {
            *digit = self.rng.gen_range(0..UNUSED_DIGIT);
        }
        H3Components {
            mode: 1,
            edge: 0,
            resolution,
            base_cell: self.rng.gen_range(0..NUM_BASE_CELLS),
            digits,
        }
        .encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_tabular() -> Vec<FeatureSpec> {
        vec![
            FeatureSpec::sequence("seq"),
            FeatureSpec::numerical("num"),
            FeatureSpec::set("set"),
            FeatureSpec::text("text"),
            FeatureSpec::binary("bin"),
            FeatureSpec::bag("bag"),
            FeatureSpec::vector("vec"),
            FeatureSpec::h3("h3"),
            FeatureSpec::date("date"),
            FeatureSpec::timeseries("ts"),
            FeatureSpec::category("cat").with_vocab_size(2),
        ]
    }

    #[test]
    fn test_generates_every_tabular_type() {
        let features = all_tabular();
        let df = SyntheticDataGenerator::new(42).generate(&features, 25).unwrap();
        assert_eq!(df.height(), 25);
        assert_eq!(df.width(), features.len());
    }

    #[test]
    fn test_same_seed_same_frame() {
        let features = all_tabular();
        let a = SyntheticDataGenerator::new(7).generate(&features, 10).unwrap();
        let b = SyntheticDataGenerator::new(7).generate(&features, 10).unwrap();
        assert!(a.equals(&b));
    }

    #[test]
    fn test_category_respects_vocab_size() {
        let features = vec![FeatureSpec::category("cat").with_vocab_size(2)];
        let df = SyntheticDataGenerator::new(1).generate(&features, 200).unwrap();
        let distinct = df.column("cat").unwrap().n_unique().unwrap();
        assert_eq!(distinct, 2);
    }

    #[test]
    fn test_h3_indexes_decode() {
        let features = vec![FeatureSpec::h3("cell")];
        let df = SyntheticDataGenerator::new(3).generate(&features, 50).unwrap();
        for index in df.column("cell").unwrap().i64().unwrap().into_no_null_iter() {
            let decoded = H3Components::decode(index as u64).unwrap();
            assert!(decoded.resolution <= MAX_H3_RESOLUTION);
        }
    }

    #[test]
    fn test_vector_size_is_honored() {
        let features = vec![FeatureSpec::vector("v").with_vector_size(4)];
        let df = SyntheticDataGenerator::new(5).generate(&features, 3).unwrap();
        let first = df.column("v").unwrap().str().unwrap().get(0).unwrap().to_string();
        assert_eq!(first.split_whitespace().count(), 4);
    }

    #[test]
    fn test_audio_rejected() {
        let features = vec![FeatureSpec::new("clip", FeatureType::Audio)];
        assert!(SyntheticDataGenerator::new(0).generate(&features, 3).is_err());
    }
}
