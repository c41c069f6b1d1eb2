//! Input feature encoders
//!
//! Each encoder is fitted on the training split and turns one column into a
//! dense block of numeric features:
//! - numerical: one value, optionally z-score or min-max normalized
//! - binary: 0/1
//! - category: one-hot over the learned labels
//! - set / bag: multi-hot / counts over the learned token vocabulary
//! - sequence / text: token one-hots reduced over the sequence axis
//! - vector / timeseries: the floats themselves, timeseries zero padded
//! - h3: the index's mode, edge, resolution, base cell and child digits
//! - date: calendar components scaled to [0, 1]

use super::cells::{bool_cells, float_cells, float_list_cells, string_cells, u64_cells};
use super::h3::H3Components;
use super::tokenizer::{Tokenizer, Vocabulary};
use crate::config::{FeatureSpec, FeatureType, Normalization, Reduction};
use crate::error::{FeatureflowError, Result};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

const DATE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// Width of the date encoding
pub const DATE_WIDTH: usize = 9;

/// Fitted state of one input encoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoder", rename_all = "snake_case")]
pub enum InputEncoder {
    Numerical {
        normalization: Normalization,
        center: f64,
        scale: f64,
        fill: f64,
    },
    Binary {
        fill: bool,
    },
    Category {
        vocab: Vocabulary,
        fill: String,
    },
    Tokens {
        kind: FeatureType,
        tokenizer: Tokenizer,
        vocab: Vocabulary,
        reduction: Reduction,
        max_len: usize,
        fill: String,
    },
    Vector {
        size: usize,
    },
    Timeseries {
        length: usize,
    },
    H3,
    Date {
        format: Option<String>,
    },
}

/// An input encoder bound to its column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedInput {
    pub name: String,
    pub feature_type: FeatureType,
    pub encoder: InputEncoder,
}

impl FittedInput {
    /// Learn encoder state for `spec` from the training frame
    pub fn fit(spec: &FeatureSpec, df: &DataFrame) -> Result<Self> {
        let column = df
            .column(spec.name())
            .map_err(|_| FeatureflowError::missing_columns(vec![spec.name().to_string()]))?;
        let missing = spec.options().missing_value.clone();

        let encoder = match spec.feature_type() {
            FeatureType::Numerical => fit_numerical(spec, column, missing.as_deref())?,
            FeatureType::Binary => InputEncoder::Binary {
                fill: missing
                    .as_deref()
                    .and_then(super::cells::parse_bool)
                    .unwrap_or(false),
            },
            FeatureType::Category => {
                let fill = missing.unwrap_or_default();
                let cells = string_cells(column, &fill)?;
                InputEncoder::Category {
                    vocab: Vocabulary::build(cells.iter().filter(|c| !c.is_empty()), spec.vocab_size()),
                    fill,
                }
            }
            kind @ (FeatureType::Sequence | FeatureType::Set | FeatureType::Bag | FeatureType::Text) => {
                let fill = missing.unwrap_or_default();
                let tokenizer = if kind == FeatureType::Text {
                    Tokenizer::Words
                } else {
                    Tokenizer::Space
                };
                let max_len = spec.max_sequence_length();
                let cells = string_cells(column, &fill)?;
                let tokens: Vec<String> = cells
                    .iter()
                    .flat_map(|cell| {
                        tokenizer
                            .tokenize(cell)
                            .into_iter()
                            .take(max_len)
                            .map(|t| t.into_owned())
                            .collect::<Vec<_>>()
                    })
                    .collect();
                InputEncoder::Tokens {
                    kind,
                    tokenizer,
                    vocab: Vocabulary::build(tokens, spec.vocab_size()),
                    reduction: spec.reduce_output(),
                    max_len,
                    fill,
                }
            }
            FeatureType::Vector => {
                let lists = float_list_cells(column)?;
                let size = match spec.options().vector_size {
                    Some(size) => size,
                    None => lists.iter().map(|l| l.len()).find(|len| *len > 0).ok_or_else(|| {
                        FeatureflowError::PreprocessingError(format!(
                            "{}: cannot infer vector size from an empty column",
                            spec.name()
                        ))
                    })?,
                };
                InputEncoder::Vector { size }
            }
            FeatureType::Timeseries => {
                let lists = float_list_cells(column)?;
                let longest = lists.iter().map(|l| l.len()).max().unwrap_or(0);
                InputEncoder::Timeseries {
                    length: longest.min(spec.max_sequence_length()).max(1),
                }
            }
            FeatureType::H3 => InputEncoder::H3,
            FeatureType::Date => InputEncoder::Date {
                format: spec.options().date_format.clone(),
            },
            FeatureType::Audio | FeatureType::Image => {
                return Err(FeatureflowError::UnsupportedFeature {
                    name: spec.name().to_string(),
                    feature_type: spec.feature_type().to_string(),
                    role: "an input".to_string(),
                })
            }
        };

        Ok(Self {
            name: spec.name().to_string(),
            feature_type: spec.feature_type(),
            encoder,
        })
    }

    /// Number of numeric columns this encoder emits
    pub fn width(&self) -> usize {
        match &self.encoder {
            InputEncoder::Numerical { .. } | InputEncoder::Binary { .. } => 1,
            InputEncoder::Category { vocab, .. } | InputEncoder::Tokens { vocab, .. } => vocab.len(),
            InputEncoder::Vector { size } => *size,
            InputEncoder::Timeseries { length } => *length,
            InputEncoder::H3 => H3Components::WIDTH,
            InputEncoder::Date { .. } => DATE_WIDTH,
        }
    }

    /// Encode this feature's column of `df`
    pub fn transform(&self, df: &DataFrame) -> Result<Array2<f64>> {
        let column = df
            .column(&self.name)
            .map_err(|_| FeatureflowError::missing_columns(vec![self.name.clone()]))?;
        let n = column.len();
        let mut out = Array2::zeros((n, self.width()));

        match &self.encoder {
            InputEncoder::Numerical {
                center,
                scale,
                fill,
                ..
            } => {
                for (i, v) in float_cells(column, *fill)?.into_iter().enumerate() {
                    out[[i, 0]] = (v - center) / scale;
                }
            }
            InputEncoder::Binary { fill } => {
                for (i, v) in bool_cells(column, *fill)?.into_iter().enumerate() {
                    out[[i, 0]] = if v { 1.0 } else { 0.0 };
                }
            }
            InputEncoder::Category { vocab, fill } => {
                for (i, cell) in string_cells(column, fill)?.iter().enumerate() {
                    out[[i, vocab.index_of(cell)]] = 1.0;
                }
            }
            InputEncoder::Tokens {
                kind,
                tokenizer,
                vocab,
                reduction,
                max_len,
                fill,
            } => {
                for (i, cell) in string_cells(column, fill)?.iter().enumerate() {
                    let tokens = tokenizer.tokenize(cell);
                    let tokens = &tokens[..tokens.len().min(*max_len)];
                    for token in tokens {
                        out[[i, vocab.index_of(token)]] += 1.0;
                    }
                    let reduction = match kind {
                        FeatureType::Set => Reduction::Max,
                        FeatureType::Bag => Reduction::Sum,
                        _ => *reduction,
                    };
                    let mut row = out.row_mut(i);
                    match reduction {
                        Reduction::Sum => {}
                        Reduction::Max => row.mapv_inplace(|c| if c > 0.0 { 1.0 } else { 0.0 }),
                        Reduction::Mean => {
                            if !tokens.is_empty() {
                                let len = tokens.len() as f64;
                                row.mapv_inplace(|c| c / len);
                            }
                        }
                    }
                }
            }
            InputEncoder::Vector { size } => {
                for (i, values) in float_list_cells(column)?.into_iter().enumerate() {
                    if values.is_empty() {
                        continue;
                    }
                    if values.len() != *size {
                        return Err(FeatureflowError::PreprocessingError(format!(
                            "{}: row {i} has {} values, expected {size}",
                            self.name,
                            values.len()
                        )));
                    }
                    for (j, v) in values.into_iter().enumerate() {
                        out[[i, j]] = v;
                    }
                }
            }
            InputEncoder::Timeseries { length } => {
                for (i, values) in float_list_cells(column)?.into_iter().enumerate() {
                    for (j, v) in values.into_iter().take(*length).enumerate() {
                        out[[i, j]] = v;
                    }
                }
            }
            InputEncoder::H3 => {
                for (i, index) in u64_cells(column)?.into_iter().enumerate() {
                    if let Some(index) = index {
                        let features = H3Components::decode(index)?.to_features();
                        for (j, v) in features.into_iter().enumerate() {
                            out[[i, j]] = v;
                        }
                    }
                }
            }
            InputEncoder::Date { format } => {
                for (i, cell) in string_cells(column, "")?.iter().enumerate() {
                    if cell.trim().is_empty() {
                        continue;
                    }
                    let parsed = parse_datetime(cell, format.as_deref()).ok_or_else(|| {
                        FeatureflowError::PreprocessingError(format!(
                            "{}: cannot parse '{cell}' as a date",
                            self.name
                        ))
                    })?;
                    for (j, v) in date_features(&parsed).into_iter().enumerate() {
                        out[[i, j]] = v;
                    }
                }
            }
        }

        Ok(out)
    }
}

fn fit_numerical(spec: &FeatureSpec, column: &Column, missing: Option<&str>) -> Result<InputEncoder> {
    let fill = match missing {
        Some(s) => s.trim().parse::<f64>().map_err(|_| {
            FeatureflowError::InvalidConfig(format!(
                "{}: missing_value '{s}' is not a number",
                spec.name()
            ))
        })?,
        None => 0.0,
    };
    let values = float_cells(column, fill)?;
    let normalization = spec.normalization();

    let (center, scale) = match normalization {
        Normalization::Zscore => {
            let n = values.len().max(1) as f64;
            let mean = values.iter().sum::<f64>() / n;
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let std = var.sqrt();
            (mean, if std > 1e-12 { std } else { 1.0 })
        }
        Normalization::Minmax => {
            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            if min.is_finite() && max - min > 1e-12 {
                (min, max - min)
            } else {
                (if min.is_finite() { min } else { 0.0 }, 1.0)
            }
        }
        Normalization::None => (0.0, 1.0),
    };

    Ok(InputEncoder::Numerical {
        normalization,
        center,
        scale,
        fill,
    })
}

/// Parse a date cell with an explicit format or the built-in fallbacks
pub fn parse_datetime(cell: &str, format: Option<&str>) -> Option<NaiveDateTime> {
    let cell = cell.trim();
    if let Some(format) = format {
        return NaiveDateTime::parse_from_str(cell, format).ok().or_else(|| {
            NaiveDate::parse_from_str(cell, format)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        });
    }
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(cell, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(cell, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Year, month, day, weekday, day of year, hour, minute, second, second of day
pub fn date_features(dt: &NaiveDateTime) -> [f64; DATE_WIDTH] {
    let seconds_of_day = dt.num_seconds_from_midnight() as f64;
    [
        (dt.year() as f64 - 1970.0) / 100.0,
        dt.month0() as f64 / 11.0,
        dt.day0() as f64 / 30.0,
        dt.weekday().num_days_from_monday() as f64 / 6.0,
        dt.ordinal0() as f64 / 365.0,
        dt.hour() as f64 / 23.0,
        dt.minute() as f64 / 59.0,
        dt.second() as f64 / 59.0,
        seconds_of_day / 86_399.0,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fit_transform(spec: FeatureSpec, df: &DataFrame) -> (FittedInput, Array2<f64>) {
        let fitted = FittedInput::fit(&spec, df).unwrap();
        let out = fitted.transform(df).unwrap();
        assert_eq!(out.ncols(), fitted.width());
        (fitted, out)
    }

    #[test]
    fn test_numerical_zscore() {
        let df = df!("x" => &[1.0, 2.0, 3.0]).unwrap();
        let (_, out) = fit_transform(
            FeatureSpec::numerical("x").with_normalization(Normalization::Zscore),
            &df,
        );
        assert!((out.column(0).sum()).abs() < 1e-9);
        assert!(out[[0, 0]] < 0.0 && out[[2, 0]] > 0.0);
    }

    #[test]
    fn test_numerical_minmax_constant_column() {
        let df = df!("x" => &[4.0, 4.0]).unwrap();
        let (_, out) = fit_transform(
            FeatureSpec::numerical("x").with_normalization(Normalization::Minmax),
            &df,
        );
        assert_eq!(out[[0, 0]], 0.0);
    }

    #[test]
    fn test_category_one_hot_with_unknown() {
        let train = df!("c" => &["a", "b", "a"]).unwrap();
        let fitted = FittedInput::fit(&FeatureSpec::category("c"), &train).unwrap();
        assert_eq!(fitted.width(), 3);

        let unseen = df!("c" => &["z"]).unwrap();
        let out = fitted.transform(&unseen).unwrap();
        assert_eq!(out[[0, 0]], 1.0);
    }

    #[test]
    fn test_sequence_reductions() {
        let df = df!("s" => &["a a b", "b"]).unwrap();
        let (fitted, sum) = fit_transform(FeatureSpec::sequence("s"), &df);
        let a = match &fitted.encoder {
            InputEncoder::Tokens { vocab, .. } => vocab.index_of("a"),
            _ => unreachable!(),
        };
        assert_eq!(sum[[0, a]], 2.0);

        let (_, mean) = fit_transform(
            FeatureSpec::sequence("s").with_reduce_output(Reduction::Mean),
            &df,
        );
        assert!((mean[[0, a]] - 2.0 / 3.0).abs() < 1e-9);

        let (_, max) = fit_transform(
            FeatureSpec::sequence("s").with_reduce_output(Reduction::Max),
            &df,
        );
        assert_eq!(max[[0, a]], 1.0);
    }

    #[test]
    fn test_set_is_multi_hot_and_bag_counts() {
        let df = df!("t" => &["x x y"]).unwrap();
        let (_, set) = fit_transform(FeatureSpec::set("t"), &df);
        assert_eq!(set.row(0).sum(), 2.0);
        let (_, bag) = fit_transform(FeatureSpec::bag("t"), &df);
        assert_eq!(bag.row(0).sum(), 3.0);
    }

    #[test]
    fn test_text_is_case_insensitive() {
        let df = df!("t" => &["Hello world", "hello!"]).unwrap();
        let (fitted, _) = fit_transform(FeatureSpec::text("t"), &df);
        match &fitted.encoder {
            InputEncoder::Tokens { vocab, .. } => assert_eq!(vocab.tokens()[1], "hello"),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_vector_size_mismatch() {
        let train = df!("v" => &["1 2 3", "4 5 6"]).unwrap();
        let fitted = FittedInput::fit(&FeatureSpec::vector("v"), &train).unwrap();
        assert_eq!(fitted.width(), 3);
        let bad = df!("v" => &["1 2"]).unwrap();
        assert!(fitted.transform(&bad).is_err());
    }

    #[test]
    fn test_timeseries_padding() {
        let df = df!("ts" => &["1 2 3", "4"]).unwrap();
        let (_, out) = fit_transform(FeatureSpec::timeseries("ts"), &df);
        assert_eq!(out.ncols(), 3);
        assert_eq!(out.row(1).to_vec(), vec![4.0, 0.0, 0.0]);
    }

    #[test]
    fn test_h3_from_integers() {
        let df = df!("cell" => &[0x85283473fffffffi64]).unwrap();
        let (_, out) = fit_transform(FeatureSpec::h3("cell"), &df);
        assert_eq!(out.ncols(), H3Components::WIDTH);
        assert!((out[[0, 2]] - 5.0 / 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_date_formats() {
        let df = df!("d" => &["2020-02-29 12:00:00", "2021-01-01"]).unwrap();
        let (_, out) = fit_transform(FeatureSpec::date("d"), &df);
        assert_eq!(out.ncols(), DATE_WIDTH);
        assert!((out[[0, 0]] - 0.5).abs() < 1e-9);
        assert_eq!(out[[1, 5]], 0.0);

        let custom = parse_datetime("01/02/2020", Some("%d/%m/%Y")).unwrap();
        assert_eq!(custom.month(), 2);
    }

    #[test]
    fn test_image_input_unsupported() {
        let df = df!("img" => &["a.png"]).unwrap();
        let err = FittedInput::fit(&FeatureSpec::new("img", FeatureType::Image), &df).unwrap_err();
        assert!(matches!(err, FeatureflowError::UnsupportedFeature { .. }));
    }

    #[test]
    fn test_encoder_serde() {
        let df = df!("s" => &["a b"]).unwrap();
        let fitted = FittedInput::fit(&FeatureSpec::sequence("s"), &df).unwrap();
        let json = serde_json::to_string(&fitted).unwrap();
        let restored: FittedInput = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, fitted);
    }
}
