//! A trained model: configuration, fitted encoders and network parameters

use super::network::CombinerNetwork;
use crate::config::ModelConfig;
use crate::error::{FeatureflowError, Result};
use crate::preprocessing::FeaturePipeline;
use crate::utils::parallel::{chunk_ranges, ParallelExecutor};
use ndarray::{concatenate, s, Array2, ArrayView2, Axis};
use polars::prelude::*;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

pub const MODEL_DIR: &str = "model";
pub const WEIGHTS_FILE: &str = "model_weights.json";
pub const HYPERPARAMETERS_FILE: &str = "model_hyperparameters.json";
pub const METADATA_FILE: &str = "training_set_metadata.json";

#[derive(Debug, Clone, PartialEq)]
pub struct TrainedModel {
    config: ModelConfig,
    pipeline: FeaturePipeline,
    network: CombinerNetwork,
}

impl TrainedModel {
    pub fn new(config: ModelConfig, pipeline: FeaturePipeline, network: CombinerNetwork) -> Self {
        Self {
            config,
            pipeline,
            network,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &FeaturePipeline {
        &self.pipeline
    }

    pub fn network(&self) -> &CombinerNetwork {
        &self.network
    }

    /// Named parameter tensors
    pub fn weights(&self) -> BTreeMap<String, Array2<f64>> {
        self.network.weights()
    }

    pub fn num_parameters(&self) -> usize {
        self.weights().values().map(|w| w.len()).sum()
    }

    /// Predict every row of `df`, sharding rows over `executor`.
    ///
    /// Output rows follow input order.
    pub fn predict_frame<E: ParallelExecutor>(&self, df: &DataFrame, executor: &E) -> Result<DataFrame> {
        let x = self.pipeline.transform_inputs(df, executor)?;
        let heads = self.predict_encoded(x.view(), executor)?;
        self.pipeline.decode(&heads)
    }

    fn predict_encoded<E: ParallelExecutor>(
        &self,
        x: ArrayView2<'_, f64>,
        executor: &E,
    ) -> Result<Vec<Array2<f64>>> {
        let shards = chunk_ranges(x.nrows(), executor.parallelism());
        let partials = executor
            .map_indexed(shards.len(), |i| {
                self.network.predict(x.slice(s![shards[i].clone(), ..]))
            })
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        (0..self.network.heads().len())
            .map(|k| {
                let views: Vec<ArrayView2<'_, f64>> = partials.iter().map(|p| p[k].view()).collect();
                Ok(concatenate(Axis(0), &views)?)
            })
            .collect()
    }

    /// Write `model/` under `dir`
    pub fn save(&self, dir: &Path) -> Result<()> {
        let model_dir = dir.join(MODEL_DIR);
        fs::create_dir_all(&model_dir)?;
        write_json(&model_dir.join(HYPERPARAMETERS_FILE), &self.config)?;
        write_json(&model_dir.join(METADATA_FILE), &self.pipeline)?;
        write_json(&model_dir.join(WEIGHTS_FILE), &self.network)?;
        debug!(path = %model_dir.display(), "saved model");
        Ok(())
    }

    /// Read a model written by [`TrainedModel::save`]
    pub fn load(dir: &Path) -> Result<Self> {
        let model_dir = dir.join(MODEL_DIR);
        if !model_dir.is_dir() {
            return Err(FeatureflowError::DataError(format!(
                "no saved model under {}",
                dir.display()
            )));
        }
        let config: ModelConfig = read_json(&model_dir.join(HYPERPARAMETERS_FILE))?;
        config.validate()?;
        let pipeline: FeaturePipeline = read_json(&model_dir.join(METADATA_FILE))?;
        let network: CombinerNetwork = read_json(&model_dir.join(WEIGHTS_FILE))?;

        if network.input_width() != pipeline.input_width() {
            return Err(FeatureflowError::ShapeError {
                expected: format!("{} network inputs", pipeline.input_width()),
                actual: format!("{} network inputs", network.input_width()),
            });
        }
        Ok(Self::new(config, pipeline, network))
    }
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CombinerConfig, FeatureSpec};
    use crate::utils::parallel::Serial;
    use tempfile::TempDir;

    fn fitted() -> (TrainedModel, DataFrame) {
        let df = df!(
            "x" => &[0.1, 0.9, 0.4, 0.7, 0.2],
            "c" => &["u", "v", "u", "v", "u"],
            "y" => &["no", "yes", "no", "yes", "no"]
        )
        .unwrap();
        let config = ModelConfig::new(
            vec![FeatureSpec::numerical("x"), FeatureSpec::category("c")],
            vec![FeatureSpec::category("y")],
        )
        .with_combiner(CombinerConfig::concat(4));
        let pipeline = FeaturePipeline::fit(&config, &df, &Serial).unwrap();
        let network =
            CombinerNetwork::new(pipeline.input_width(), &config.combiner, pipeline.outputs(), 1).unwrap();
        (TrainedModel::new(config, pipeline, network), df)
    }

    #[test]
    fn test_predictions_keep_row_order_across_workers() {
        let (model, df) = fitted();
        let pool = rayon::ThreadPoolBuilder::new().num_threads(3).build().unwrap();
        let serial = model.predict_frame(&df, &Serial).unwrap();
        let parallel = model.predict_frame(&df, &pool).unwrap();
        assert_eq!(serial.height(), 5);
        assert!(serial
            .column("y_predictions")
            .unwrap()
            .equals(parallel.column("y_predictions").unwrap()));
        assert!(serial.column("y_predictions").is_ok());
        assert!(serial.column("y_probability").is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let (model, df) = fitted();
        let dir = TempDir::new().unwrap();
        model.save(dir.path()).unwrap();
        assert!(dir.path().join("model").join(WEIGHTS_FILE).exists());
        assert!(dir.path().join("model").join(HYPERPARAMETERS_FILE).exists());

        let loaded = TrainedModel::load(dir.path()).unwrap();
        assert_eq!(loaded.weights(), model.weights());
        assert!(loaded
            .predict_frame(&df, &Serial)
            .unwrap()
            .equals(&model.predict_frame(&df, &Serial).unwrap()));
        assert_eq!(loaded, model);
    }

    #[test]
    fn test_load_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert!(TrainedModel::load(dir.path()).is_err());
    }

    #[test]
    fn test_weights_are_named() {
        let (model, _) = fitted();
        let weights = model.weights();
        assert!(weights.contains_key("combiner/fc_0/weights"));
        assert!(weights.contains_key("y/head/bias"));
        assert!(model.num_parameters() > 0);
    }
}
