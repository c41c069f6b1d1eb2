//! Multi-worker backend backed by a rayon thread pool per context

use super::{
    run_training, Backend, BackendCapabilities, ExecutionContext, Predictions, ResourceHints,
    TrainOptions, TrainingResult,
};
use crate::config::ModelConfig;
use crate::data::{concat_frames, DatasetHandle};
use crate::error::{FeatureflowError, Result};
use crate::model::TrainedModel;
use crate::utils::parallel::{ParallelExecutor, Serial};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

/// Upper bound on workers per context unless configured otherwise
pub const DEFAULT_MAX_WORKERS: usize = 64;

/// Spreads loading, feature encoding, gradient computation and prediction
/// over a pool of workers.
///
/// Partitioned datasets are loaded partition by partition on the pool and
/// predicted without first collapsing them into one frame.
#[derive(Debug)]
pub struct DistributedBackend {
    max_workers: usize,
    ledger: Arc<AtomicUsize>,
}

impl Default for DistributedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DistributedBackend {
    pub const NAME: &'static str = "distributed";

    pub fn new() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            ledger: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    fn default_workers() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

impl Backend for DistributedBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            distributed: true,
            max_workers: self.max_workers,
            materializes_for_predict: false,
        }
    }

    fn initialize(&self, hints: &ResourceHints) -> Result<ExecutionContext> {
        let workers = hints
            .num_workers
            .unwrap_or_else(|| Self::default_workers().min(self.max_workers));
        if workers == 0 {
            return Err(FeatureflowError::ResourceUnavailable(
                "cannot reserve zero workers".to_string(),
            ));
        }
        if workers > self.max_workers {
            return Err(FeatureflowError::ResourceUnavailable(format!(
                "requested {workers} workers but at most {} are available",
                self.max_workers
            )));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("featureflow-worker-{i}"))
            .build()
            .map_err(|e| FeatureflowError::ResourceUnavailable(format!("could not start workers: {e}")))?;

        let ctx = ExecutionContext::new(Self::NAME, workers, Some(pool), self.ledger.clone());
        info!(id = %ctx.id(), workers, "distributed context initialized");
        Ok(ctx)
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
        let frame = match dataset {
            DatasetHandle::Materialized(df) => model.predict_frame(df, ctx)?,
            DatasetHandle::Partitioned(dataset) => {
                let partitions = dataset.partitions();
                let frames = ctx
                    .map_indexed(partitions.len(), |i| {
                        let df = partitions[i].load()?;
                        model.predict_frame(&df, &Serial)
                    })
                    .into_iter()
                    .collect::<Result<Vec<_>>>()?;
                concat_frames(frames)?
            }
        };
        info!(rows = frame.height(), workers = ctx.num_workers(), "predicted");
        Ok(Predictions::new(frame))
    }

    fn active_contexts(&self) -> usize {
        self.ledger.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_reserves_requested_workers() {
        let backend = DistributedBackend::new();
        let ctx = backend.initialize(&ResourceHints::workers(4)).unwrap();
        assert_eq!(ctx.num_workers(), 4);
        assert_eq!(ctx.parallelism(), 4);
        assert_eq!(backend.active_contexts(), 1);
        drop(ctx);
        assert_eq!(backend.active_contexts(), 0);
    }

    #[test]
    fn test_zero_workers_is_resource_unavailable() {
        let backend = DistributedBackend::new();
        let err = backend.initialize(&ResourceHints::workers(0)).unwrap_err();
        assert!(matches!(err, FeatureflowError::ResourceUnavailable(_)));
        assert_eq!(backend.active_contexts(), 0);
    }

    #[test]
    fn test_over_capacity_is_resource_unavailable() {
        let backend = DistributedBackend::new().with_max_workers(2);
        let err = backend.initialize(&ResourceHints::workers(3)).unwrap_err();
        assert!(matches!(err, FeatureflowError::ResourceUnavailable(_)));
    }

    #[test]
    fn test_contexts_are_independent() {
        let backend = DistributedBackend::new();
        let mut a = backend.initialize(&ResourceHints::workers(2)).unwrap();
        let b = backend.initialize(&ResourceHints::workers(3)).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(backend.active_contexts(), 2);
        backend.teardown(&mut a).unwrap();
        assert!(b.is_live());
        assert_eq!(b.map_indexed(3, |i| i * i), vec![0, 1, 4]);
        assert_eq!(backend.active_contexts(), 1);
    }

    #[test]
    fn test_default_worker_count() {
        let backend = DistributedBackend::new();
        let ctx = backend.initialize(&ResourceHints::default()).unwrap();
        assert!(ctx.num_workers() >= 1);
    }
}
