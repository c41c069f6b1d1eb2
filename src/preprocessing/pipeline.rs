//! Fitted encoders for every declared feature

use super::encoders::FittedInput;
use super::targets::FittedOutput;
use crate::config::ModelConfig;
use crate::error::{FeatureflowError, Result};
use crate::utils::parallel::ParallelExecutor;
use ndarray::{concatenate, Array2, ArrayView2, Axis};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Input and output encoders fitted on a training split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturePipeline {
    inputs: Vec<FittedInput>,
    outputs: Vec<FittedOutput>,
}

impl FeaturePipeline {
    /// Fit one encoder per feature, features in parallel
    pub fn fit<E: ParallelExecutor>(config: &ModelConfig, df: &DataFrame, executor: &E) -> Result<Self> {
        let inputs = executor
            .map_indexed(config.input_features.len(), |i| {
                FittedInput::fit(&config.input_features[i], df)
            })
            .into_iter()
            .collect::<Result<Vec<_>>>()?;
        let outputs = config
            .output_features
            .iter()
            .map(|spec| FittedOutput::fit(spec, df))
            .collect::<Result<Vec<_>>>()?;

        let pipeline = Self { inputs, outputs };
        debug!(
            input_width = pipeline.input_width(),
            outputs = pipeline.outputs.len(),
            "fitted feature pipeline"
        );
        Ok(pipeline)
    }

    pub fn inputs(&self) -> &[FittedInput] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[FittedOutput] {
        &self.outputs
    }

    /// Width of the concatenated input block
    pub fn input_width(&self) -> usize {
        self.inputs.iter().map(FittedInput::width).sum()
    }

    /// Fail with `SchemaMismatch` when any input column is absent
    pub fn check_inputs(&self, df: &DataFrame) -> Result<()> {
        let missing: Vec<String> = self
            .inputs
            .iter()
            .filter(|input| df.column(&input.name).is_err())
            .map(|input| input.name.clone())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(FeatureflowError::missing_columns(missing))
        }
    }

    /// Encode all inputs and concatenate them in declaration order
    pub fn transform_inputs<E: ParallelExecutor>(&self, df: &DataFrame, executor: &E) -> Result<Array2<f64>> {
        self.check_inputs(df)?;
        let blocks = executor
            .map_indexed(self.inputs.len(), |i| self.inputs[i].transform(df))
            .into_iter()
            .collect::<Result<Vec<_>>>()?;
        let views: Vec<ArrayView2<'_, f64>> = blocks.iter().map(|b| b.view()).collect();
        Ok(concatenate(Axis(1), &views)?)
    }

    /// One encoded target block per output, in declaration order
    pub fn transform_targets(&self, df: &DataFrame) -> Result<Vec<Array2<f64>>> {
        self.outputs.iter().map(|output| output.encode(df)).collect()
    }

    /// Decode per-output head activations into a prediction frame
    pub fn decode(&self, heads: &[Array2<f64>]) -> Result<DataFrame> {
        if heads.len() != self.outputs.len() {
            return Err(FeatureflowError::ShapeError {
                expected: format!("{} output heads", self.outputs.len()),
                actual: format!("{} output heads", heads.len()),
            });
        }
        let mut columns = Vec::new();
        for (output, head) in self.outputs.iter().zip(heads) {
            columns.extend(output.decode(head.view())?);
        }
        Ok(DataFrame::new(columns)?)
    }
}
