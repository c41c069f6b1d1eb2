//! Single-process backend

use super::{
    run_training, Backend, BackendCapabilities, ExecutionContext, Predictions, ResourceHints,
    TrainOptions, TrainingResult,
};
use crate::config::ModelConfig;
use crate::data::DatasetHandle;
use crate::error::{FeatureflowError, Result};
use crate::model::TrainedModel;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Runs everything on the calling thread
#[derive(Debug, Default)]
pub struct LocalBackend {
    ledger: Arc<AtomicUsize>,
}

impl LocalBackend {
    pub const NAME: &'static str = "local";

    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for LocalBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            distributed: false,
            max_workers: 1,
            materializes_for_predict: true,
        }
    }

    fn initialize(&self, hints: &ResourceHints) -> Result<ExecutionContext> {
        match hints.num_workers {
            Some(0) => Err(FeatureflowError::ResourceUnavailable(
                "cannot reserve zero workers".to_string(),
            )),
            Some(n) if n > 1 => {
                debug!(requested = n, "local backend runs on a single worker");
                Ok(ExecutionContext::new(Self::NAME, 1, None, self.ledger.clone()))
            }
            _ => Ok(ExecutionContext::new(Self::NAME, 1, None, self.ledger.clone())),
        }
    }

    fn train(
        &self,
        ctx: &ExecutionContext,
        config: &ModelConfig,
        dataset: &DatasetHandle,
        options: &TrainOptions,
    ) -> Result<TrainingResult> {
        run_training(Self::NAME, ctx, config, dataset, options)
    }

    fn predict(&self, ctx: &ExecutionContext, model: &TrainedModel, dataset: &DatasetHandle) -> Result<Predictions> {
        ctx.ensure_live(Self::NAME)?;
        let df = dataset.materialize()?;
        let frame = model.predict_frame(&df, ctx)?;
        info!(rows = frame.height(), "predicted");
        Ok(Predictions::new(frame))
    }

    fn active_contexts(&self) -> usize {
        self.ledger.load(Ordering::SeqCst)
    }
}
