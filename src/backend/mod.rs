//! Execution backends
//!
//! A backend reserves workers through [`Backend::initialize`], trains and
//! predicts inside the resulting [`ExecutionContext`], and gives the workers
//! back in [`Backend::teardown`]. Contexts are passed explicitly; nothing is
//! global, so several contexts can be live at once.

pub mod artifacts;
pub mod context;
pub mod distributed;
pub mod local;

pub use artifacts::ArtifactDir;
pub use context::ExecutionContext;
pub use distributed::DistributedBackend;
pub use local::LocalBackend;

use crate::config::{BackendConfig, BackendType, ModelConfig};
use crate::data::{split_dataset, DataSaver, DatasetHandle};
use crate::error::{FeatureflowError, Result};
use crate::model::{CombinerNetwork, EncodedSplit, TrainedModel, Trainer, TrainingStatistics};
use crate::preprocessing::FeaturePipeline;
use crate::utils::parallel::ParallelExecutor;
use artifacts::{
    DESCRIPTION_FILE, PROCESSED_DIR, PROGRESS_FILE, TEST_PREDICTIONS_FILE, TRAINING_STATISTICS_FILE,
};
use polars::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Worker request passed to [`Backend::initialize`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceHints {
    /// Workers to reserve; `None` lets the backend choose
    pub num_workers: Option<usize>,
}

impl ResourceHints {
    pub fn workers(num_workers: usize) -> Self {
        Self {
            num_workers: Some(num_workers),
        }
    }
}

impl From<&BackendConfig> for ResourceHints {
    fn from(config: &BackendConfig) -> Self {
        Self {
            num_workers: config.num_workers,
        }
    }
}

/// What a backend can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackendCapabilities {
    /// Work is spread over more than one worker
    pub distributed: bool,
    /// Largest worker count `initialize` accepts
    pub max_workers: usize,
    /// Partitioned datasets are collapsed into one frame before predicting
    pub materializes_for_predict: bool,
}

/// Switches for the files a training run writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainOptions {
    /// Parent of the run directory
    pub output_directory: PathBuf,
    pub experiment_name: String,
    pub model_name: String,
    pub skip_save_model: bool,
    /// Per-epoch progress log
    pub skip_save_progress: bool,
    pub skip_save_training_statistics: bool,
    /// Parquet copies of the train/validation/test splits
    pub skip_save_processed_input: bool,
    /// Predictions on the test split
    pub skip_save_unprocessed_output: bool,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            output_directory: PathBuf::from("results"),
            experiment_name: "experiment".to_string(),
            model_name: "run".to_string(),
            skip_save_model: false,
            skip_save_progress: false,
            skip_save_training_statistics: false,
            skip_save_processed_input: false,
            skip_save_unprocessed_output: false,
        }
    }
}

impl TrainOptions {
    pub fn with_output_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_directory = dir.into();
        self
    }

    pub fn with_experiment_name(mut self, name: impl Into<String>) -> Self {
        self.experiment_name = name.into();
        self
    }

    /// Skip every optional artifact except the model itself
    pub fn minimal(mut self) -> Self {
        self.skip_save_progress = true;
        self.skip_save_processed_input = true;
        self.skip_save_unprocessed_output = true;
        self
    }
}

/// Output of a successful [`Backend::train`]
#[derive(Debug)]
pub struct TrainingResult {
    pub model: TrainedModel,
    pub statistics: TrainingStatistics,
    /// Run directory; removed when this value is dropped unless persisted
    pub artifacts: ArtifactDir,
}

impl TrainingResult {
    pub fn output_directory(&self) -> &Path {
        self.artifacts.path()
    }
}

/// One row of predictions per input row, in input order
#[derive(Debug, Clone)]
pub struct Predictions {
    frame: DataFrame,
}

impl Predictions {
    pub fn new(frame: DataFrame) -> Self {
        Self { frame }
    }

    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn into_frame(self) -> DataFrame {
        self.frame
    }

    /// Write to csv, parquet or json depending on the extension
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut frame = self.frame.clone();
        DataSaver::save_auto(&mut frame, path)
    }
}

/// Backend dispatch contract
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> BackendCapabilities;

    /// Reserve workers. Fails with `ResourceUnavailable` when they cannot be
    /// provided, leaving no context behind.
    fn initialize(&self, hints: &ResourceHints) -> Result<ExecutionContext>;

    /// Train a model on `dataset` inside `ctx`.
    ///
    /// Any failure after the run directory exists is reported as
    /// `TrainingFailed` and the directory is removed.
    fn train(
        &self,
        ctx: &ExecutionContext,
        config: &ModelConfig,
        dataset: &DatasetHandle,
        options: &TrainOptions,
    ) -> Result<TrainingResult>;

    fn predict(&self, ctx: &ExecutionContext, model: &TrainedModel, dataset: &DatasetHandle) -> Result<Predictions>;

    /// Release `ctx`. Calling it again is a no-op.
    fn teardown(&self, ctx: &mut ExecutionContext) -> Result<()> {
        if ctx.release() {
            info!(backend = self.name(), id = %ctx.id(), "execution context torn down");
        }
        Ok(())
    }

    /// Contexts created by this backend and not yet released
    fn active_contexts(&self) -> usize;
}

/// Run `body` inside a fresh context, tearing it down however `body` ends
pub fn with_execution_context<B, T, F>(backend: &B, hints: &ResourceHints, body: F) -> Result<T>
where
    B: Backend + ?Sized,
    F: FnOnce(&ExecutionContext) -> Result<T>,
{
    let mut ctx = backend.initialize(hints)?;
    let result = body(&ctx);
    let teardown = backend.teardown(&mut ctx);
    let value = result?;
    teardown?;
    Ok(value)
}

/// Build the backend a configuration asks for
pub fn create_backend(config: &BackendConfig) -> Box<dyn Backend> {
    match config.backend_type {
        BackendType::Local => Box::new(LocalBackend::new()),
        BackendType::Distributed => {
            let backend = DistributedBackend::new();
            match config.max_workers {
                Some(max) => Box::new(backend.with_max_workers(max)),
                None => Box::new(backend),
            }
        }
    }
}

/// The part of training both backends share; `ctx` decides the parallelism
pub(crate) fn run_training(
    backend: &str,
    ctx: &ExecutionContext,
    config: &ModelConfig,
    dataset: &DatasetHandle,
    options: &TrainOptions,
) -> Result<TrainingResult> {
    ctx.ensure_live(backend)?;
    config.validate_for_training()?;
    dataset.check_features(config.all_features())?;

    let artifacts = ArtifactDir::create(
        &options.output_directory,
        &options.experiment_name,
        &options.model_name,
    )?;
    info!(
        backend,
        workers = ctx.num_workers(),
        path = %artifacts.path().display(),
        "training started"
    );

    // `artifacts` is dropped, and the directory removed, on the error path
    match fit_and_save(backend, ctx, config, dataset, options, artifacts.path()) {
        Ok((model, statistics)) => {
            info!(
                backend,
                epochs = statistics.epochs_run(),
                best_epoch = statistics.best_epoch,
                "training finished"
            );
            Ok(TrainingResult {
                model,
                statistics,
                artifacts,
            })
        }
        Err(e) => {
            warn!(backend, error = %e, "training failed");
            Err(FeatureflowError::training_failed(e))
        }
    }
}

fn fit_and_save(
    backend: &str,
    ctx: &ExecutionContext,
    config: &ModelConfig,
    dataset: &DatasetHandle,
    options: &TrainOptions,
    dir: &Path,
) -> Result<(TrainedModel, TrainingStatistics)> {
    let df = dataset.materialize_with(ctx)?;
    let splits = split_dataset(
        &df,
        config.preprocessing.split_probabilities,
        config.training.random_seed,
    )?;
    let (n_train, n_val, n_test) = splits.sizes();
    info!(rows = df.height(), n_train, n_val, n_test, "dataset split");

    if !options.skip_save_processed_input {
        let processed = dir.join(PROCESSED_DIR);
        std::fs::create_dir_all(&processed)?;
        for (name, frame) in [
            ("training", &splits.training),
            ("validation", &splits.validation),
            ("test", &splits.test),
        ] {
            let mut frame = frame.clone();
            DataSaver::save_parquet(&mut frame, &processed.join(format!("{name}.parquet")))?;
        }
    }

    let pipeline = FeaturePipeline::fit(config, &splits.training, ctx)?;
    let encode = |df: &DataFrame| -> Result<EncodedSplit> {
        Ok(EncodedSplit {
            x: pipeline.transform_inputs(df, ctx)?,
            targets: pipeline.transform_targets(df)?,
        })
    };
    let training = encode(&splits.training)?;
    let validation = encode(&splits.validation)?;
    let test = encode(&splits.test)?;

    let mut network = CombinerNetwork::new(
        pipeline.input_width(),
        &config.combiner,
        pipeline.outputs(),
        config.training.random_seed,
    )?;

    let progress_path = dir.join(PROGRESS_FILE);
    let mut progress = Vec::new();
    let mut progress_error = None;
    let statistics = Trainer::new(&config.training, ctx).fit(
        &mut network,
        pipeline.outputs(),
        &training,
        Some(&validation),
        Some(&test),
        |epoch| {
            if options.skip_save_progress || progress_error.is_some() {
                return;
            }
            progress.push(epoch.clone());
            if let Err(e) = crate::model::trained::write_json(&progress_path, &progress) {
                progress_error = Some(e);
            }
        },
    )?;
    if let Some(e) = progress_error {
        return Err(e);
    }

    let model = TrainedModel::new(config.clone(), pipeline, network);

    if !options.skip_save_model {
        model.save(dir)?;
    }
    if !options.skip_save_training_statistics {
        crate::model::trained::write_json(&dir.join(TRAINING_STATISTICS_FILE), &statistics)?;
    }
    if !options.skip_save_unprocessed_output && splits.test.height() > 0 {
        let mut predictions = model.predict_frame(&splits.test, ctx)?;
        DataSaver::save_parquet(&mut predictions, &dir.join(TEST_PREDICTIONS_FILE))?;
    }
    crate::model::trained::write_json(
        &dir.join(DESCRIPTION_FILE),
        &Description {
            featureflow_version: env!("CARGO_PKG_VERSION"),
            backend,
            context_id: ctx.id().to_string(),
            num_workers: ctx.num_workers(),
            started_at: chrono::Utc::now().to_rfc3339(),
            dataset_rows: df.height(),
            config,
        },
    )?;

    Ok((model, statistics))
}

#[derive(Serialize)]
struct Description<'a> {
    featureflow_version: &'static str,
    backend: &'a str,
    context_id: String,
    num_workers: usize,
    started_at: String,
    dataset_rows: usize,
    config: &'a ModelConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;

    #[test]
    fn test_factory_picks_backend() {
        assert_eq!(create_backend(&BackendConfig::local()).name(), "local");
        let distributed = create_backend(&BackendConfig::distributed(2));
        assert_eq!(distributed.name(), "distributed");
        assert!(distributed.capabilities().distributed);
    }

    #[test]
    fn test_factory_honors_max_workers() {
        let config = BackendConfig {
            max_workers: Some(2),
            ..BackendConfig::distributed(2)
        };
        let backend = create_backend(&config);
        assert_eq!(backend.capabilities().max_workers, 2);
        assert!(backend.initialize(&ResourceHints::workers(3)).is_err());
    }

    #[test]
    fn test_with_execution_context_tears_down_on_error() {
        let backend = DistributedBackend::new();
        let result: Result<()> = with_execution_context(&backend, &ResourceHints::workers(2), |ctx| {
            assert!(ctx.is_live());
            assert_eq!(backend.active_contexts(), 1);
            Err(FeatureflowError::ModelNotFitted)
        });
        assert!(matches!(result, Err(FeatureflowError::ModelNotFitted)));
        assert_eq!(backend.active_contexts(), 0);
    }

    #[test]
    fn test_hints_from_config() {
        let hints = ResourceHints::from(&BackendConfig::distributed(3));
        assert_eq!(hints, ResourceHints::workers(3));
    }
}
