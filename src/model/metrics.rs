//! Evaluation metrics per output feature

use crate::preprocessing::{FittedOutput, OutputEncoder};
use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metrics for one output feature on one split
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputMetrics {
    /// Accuracy (category, binary)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Mean Squared Error (numerical)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mse: Option<f64>,
    /// Mean Absolute Error (numerical)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mae: Option<f64>,
}

impl OutputMetrics {
    /// Compare activated head outputs against encoded targets.
    ///
    /// Numerical errors are reported in the original units.
    pub fn compute(output: &FittedOutput, predicted: &Array2<f64>, targets: ArrayView2<'_, f64>) -> Self {
        let n = predicted.nrows();
        if n == 0 {
            return Self::default();
        }

        match &output.encoder {
            OutputEncoder::Category { .. } => {
                let correct = predicted
                    .rows()
                    .into_iter()
                    .zip(targets.rows())
                    .filter(|(p, t)| argmax(p) == argmax(t))
                    .count();
                Self {
                    accuracy: Some(correct as f64 / n as f64),
                    ..Default::default()
                }
            }
            OutputEncoder::Binary => {
                let correct = predicted
                    .column(0)
                    .iter()
                    .zip(targets.column(0))
                    .filter(|(p, t)| (**p >= 0.5) == (**t >= 0.5))
                    .count();
                Self {
                    accuracy: Some(correct as f64 / n as f64),
                    ..Default::default()
                }
            }
            OutputEncoder::Numerical { scale, .. } => {
                let errors: Vec<f64> = predicted
                    .column(0)
                    .iter()
                    .zip(targets.column(0))
                    .map(|(p, t)| (p - t) * scale)
                    .collect();
                Self {
                    mse: Some(errors.iter().map(|e| e * e).sum::<f64>() / n as f64),
                    mae: Some(errors.iter().map(|e| e.abs()).sum::<f64>() / n as f64),
                    ..Default::default()
                }
            }
        }
    }
}

/// Combined loss and per-output metrics for one split
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitMetrics {
    /// Mean weighted loss per row
    pub loss: f64,
    pub outputs: BTreeMap<String, OutputMetrics>,
}

fn argmax(row: &ArrayView1<'_, f64>) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |acc, (i, v)| if *v > acc.1 { (i, *v) } else { acc })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureSpec;
    use ndarray::array;
    use polars::prelude::*;

    #[test]
    fn test_category_accuracy() {
        let df = df!("y" => &["a", "b"]).unwrap();
        let output = FittedOutput::fit(&FeatureSpec::category("y"), &df).unwrap();
        let predicted = array![[0.1, 0.8, 0.1], [0.1, 0.8, 0.1]];
        let targets = array![[0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let m = OutputMetrics::compute(&output, &predicted, targets.view());
        assert_eq!(m.accuracy, Some(0.5));
        assert!(m.mse.is_none());
    }

    #[test]
    fn test_numerical_errors_in_original_units() {
        let df = df!("y" => &[0.0, 10.0]).unwrap();
        let output = FittedOutput::fit(&FeatureSpec::numerical("y"), &df).unwrap();
        // std of [0, 10] is 5
        let predicted = array![[1.0], [-1.0]];
        let targets = array![[0.0], [0.0]];
        let m = OutputMetrics::compute(&output, &predicted, targets.view());
        assert!((m.mae.unwrap() - 5.0).abs() < 1e-9);
        assert!((m.mse.unwrap() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_split_has_no_metrics() {
        let df = df!("y" => &[true]).unwrap();
        let output = FittedOutput::fit(&FeatureSpec::binary("y"), &df).unwrap();
        let m = OutputMetrics::compute(&output, &Array2::zeros((0, 1)), Array2::zeros((0, 1)).view());
        assert_eq!(m, OutputMetrics::default());
    }
}
