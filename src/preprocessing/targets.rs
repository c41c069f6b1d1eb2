//! Output feature encoders
//!
//! Targets are encoded into the block a network head is trained against and
//! head outputs are decoded back into prediction columns.

use super::cells::{bool_cells, float_cells, parse_bool, string_cells};
use super::tokenizer::Vocabulary;
use crate::config::{FeatureSpec, FeatureType};
use crate::error::{FeatureflowError, Result};
use ndarray::{Array2, ArrayView2};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Activation and loss pairing of an output head
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadKind {
    /// Softmax with cross entropy
    Softmax,
    /// Sigmoid with binary cross entropy
    Sigmoid,
    /// Identity with squared error
    Linear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decoder", rename_all = "snake_case")]
pub enum OutputEncoder {
    Category { vocab: Vocabulary },
    Binary,
    /// Targets are standardized for training and restored on decode
    Numerical { center: f64, scale: f64 },
}

/// An output encoder bound to its column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedOutput {
    pub name: String,
    pub feature_type: FeatureType,
    pub encoder: OutputEncoder,
    pub loss_weight: f64,
}

impl FittedOutput {
    pub fn fit(spec: &FeatureSpec, df: &DataFrame) -> Result<Self> {
        let column = df
            .column(spec.name())
            .map_err(|_| FeatureflowError::missing_columns(vec![spec.name().to_string()]))?;

        let encoder = match spec.feature_type() {
            FeatureType::Category => {
                let cells = string_cells(column, "")?;
                OutputEncoder::Category {
                    vocab: Vocabulary::build(cells.iter().filter(|c| !c.is_empty()), spec.vocab_size()),
                }
            }
            FeatureType::Binary => OutputEncoder::Binary,
            FeatureType::Numerical => {
                let values = float_cells(column, 0.0)?;
                let n = values.len().max(1) as f64;
                let mean = values.iter().sum::<f64>() / n;
                let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
                OutputEncoder::Numerical {
                    center: mean,
                    scale: if std > 1e-12 { std } else { 1.0 },
                }
            }
            other => {
                return Err(FeatureflowError::UnsupportedFeature {
                    name: spec.name().to_string(),
                    feature_type: other.to_string(),
                    role: "an output".to_string(),
                })
            }
        };

        Ok(Self {
            name: spec.name().to_string(),
            feature_type: spec.feature_type(),
            encoder,
            loss_weight: spec.loss_weight(),
        })
    }

    pub fn head(&self) -> HeadKind {
        match self.encoder {
            OutputEncoder::Category { .. } => HeadKind::Softmax,
            OutputEncoder::Binary => HeadKind::Sigmoid,
            OutputEncoder::Numerical { .. } => HeadKind::Linear,
        }
    }

    /// Width of the head's output block
    pub fn width(&self) -> usize {
        match &self.encoder {
            OutputEncoder::Category { vocab } => vocab.len(),
            OutputEncoder::Binary | OutputEncoder::Numerical { .. } => 1,
        }
    }

    /// Encode the target column: one-hot for categories, 0/1 for binary,
    /// standardized values for numericals
    pub fn encode(&self, df: &DataFrame) -> Result<Array2<f64>> {
        let column = df
            .column(&self.name)
            .map_err(|_| FeatureflowError::missing_columns(vec![self.name.clone()]))?;
        let mut out = Array2::zeros((column.len(), self.width()));

        match &self.encoder {
            OutputEncoder::Category { vocab } => {
                for (i, cell) in string_cells(column, "")?.iter().enumerate() {
                    out[[i, vocab.index_of(cell)]] = 1.0;
                }
            }
            OutputEncoder::Binary => {
                for (i, v) in bool_cells(column, false)?.into_iter().enumerate() {
                    out[[i, 0]] = if v { 1.0 } else { 0.0 };
                }
            }
            OutputEncoder::Numerical { center, scale } => {
                for (i, v) in float_cells(column, *center)?.into_iter().enumerate() {
                    out[[i, 0]] = (v - center) / scale;
                }
            }
        }
        Ok(out)
    }

    /// Turn head outputs (already activated) into prediction columns
    pub fn decode(&self, outputs: ArrayView2<'_, f64>) -> Result<Vec<Column>> {
        if outputs.ncols() != self.width() {
            return Err(FeatureflowError::ShapeError {
                expected: format!("{} columns for {}", self.width(), self.name),
                actual: format!("{} columns", outputs.ncols()),
            });
        }
        let predictions_name = format!("{}_predictions", self.name);
        let probability_name = format!("{}_probability", self.name);

        let columns = match &self.encoder {
            OutputEncoder::Category { vocab } => {
                let mut labels = Vec::with_capacity(outputs.nrows());
                let mut confidence = Vec::with_capacity(outputs.nrows());
                for row in outputs.rows() {
                    let (best, p) = row
                        .iter()
                        .copied()
                        .enumerate()
                        .fold((0, f64::NEG_INFINITY), |acc, (j, p)| if p > acc.1 { (j, p) } else { acc });
                    labels.push(vocab.token(best).unwrap_or_default().to_string());
                    confidence.push(p);
                }
                let mut columns = vec![
                    Column::new(predictions_name.into(), labels),
                    Column::new(probability_name.into(), confidence),
                ];
                for (j, token) in vocab.tokens().iter().enumerate() {
                    columns.push(Column::new(
                        format!("{}_probabilities_{token}", self.name).into(),
                        outputs.column(j).to_vec(),
                    ));
                }
                columns
            }
            OutputEncoder::Binary => {
                let p = outputs.column(0).to_vec();
                let labels: Vec<bool> = p.iter().map(|p| *p >= 0.5).collect();
                vec![
                    Column::new(predictions_name.into(), labels),
                    Column::new(probability_name.into(), p),
                ]
            }
            OutputEncoder::Numerical { center, scale } => {
                let values: Vec<f64> = outputs.column(0).iter().map(|v| v * scale + center).collect();
                vec![Column::new(predictions_name.into(), values)]
            }
        };
        Ok(columns)
    }

    /// Map a raw label to its class index; only meaningful for categories
    pub fn class_of(&self, label: &str) -> Option<usize> {
        match &self.encoder {
            OutputEncoder::Category { vocab } => Some(vocab.index_of(label)),
            OutputEncoder::Binary => parse_bool(label).map(usize::from),
            OutputEncoder::Numerical { .. } => None,
        }
    }
}
