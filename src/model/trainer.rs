//! Mini-batch training loop
//!
//! Each batch is cut into one shard per worker. Shards compute summed
//! gradients independently, the sums are added in shard order and divided by
//! the batch size, so a single worker and many workers take the same step.

use super::metrics::{OutputMetrics, SplitMetrics};
use super::network::{CombinerNetwork, Gradients};
use crate::config::TrainingParams;
use crate::error::{FeatureflowError, Result};
use crate::preprocessing::FittedOutput;
use crate::utils::parallel::{chunk_ranges, ParallelExecutor};
use ndarray::{concatenate, s, Array2, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

/// Encoded inputs and targets of one split
#[derive(Debug, Clone)]
pub struct EncodedSplit {
    pub x: Array2<f64>,
    pub targets: Vec<Array2<f64>>,
}

impl EncodedSplit {
    pub fn rows(&self) -> usize {
        self.x.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.x.nrows() == 0
    }

    fn select(&self, indices: &[usize]) -> Self {
        Self {
            x: self.x.select(Axis(0), indices),
            targets: self.targets.iter().map(|t| t.select(Axis(0), indices)).collect(),
        }
    }

    fn shard(&self, range: std::ops::Range<usize>) -> (ArrayView2<'_, f64>, Vec<ArrayView2<'_, f64>>) {
        (
            self.x.slice(s![range.clone(), ..]),
            self.targets.iter().map(|t| t.slice(s![range.clone(), ..])).collect(),
        )
    }
}

/// Metrics recorded at the end of an epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub training: SplitMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<SplitMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<SplitMetrics>,
    pub elapsed_secs: f64,
}

/// Everything recorded while training one model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingStatistics {
    pub epochs: Vec<EpochStats>,
    /// Epoch whose parameters were kept
    pub best_epoch: usize,
    pub stopped_early: bool,
    pub num_workers: usize,
    pub training_rows: usize,
    pub validation_rows: usize,
    pub test_rows: usize,
    pub training_time_secs: f64,
}

impl TrainingStatistics {
    pub fn epochs_run(&self) -> usize {
        self.epochs.len()
    }

    pub fn last(&self) -> Option<&EpochStats> {
        self.epochs.last()
    }
}

/// Runs epochs of momentum SGD over an executor
pub struct Trainer<'a, E: ParallelExecutor> {
    params: &'a TrainingParams,
    executor: &'a E,
}

impl<'a, E: ParallelExecutor> Trainer<'a, E> {
    pub fn new(params: &'a TrainingParams, executor: &'a E) -> Self {
        Self { params, executor }
    }

    /// Train `network` in place.
    ///
    /// With a validation split and `early_stop` set, training stops after that
    /// many epochs without improvement and the best epoch's parameters are
    /// restored.
    pub fn fit(
        &self,
        network: &mut CombinerNetwork,
        outputs: &[FittedOutput],
        training: &EncodedSplit,
        validation: Option<&EncodedSplit>,
        test: Option<&EncodedSplit>,
        mut progress: impl FnMut(&EpochStats),
    ) -> Result<TrainingStatistics> {
        if training.is_empty() {
            return Err(FeatureflowError::DataError(
                "training split is empty".to_string(),
            ));
        }
        let validation = validation.filter(|v| !v.is_empty());
        let test = test.filter(|t| !t.is_empty());

        let start = Instant::now();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.params.random_seed);
        let mut velocity = Gradients::zeros(network);
        let mut stats = TrainingStatistics {
            num_workers: self.executor.parallelism(),
            training_rows: training.rows(),
            validation_rows: validation.map_or(0, EncodedSplit::rows),
            test_rows: test.map_or(0, EncodedSplit::rows),
            ..Default::default()
        };

        let mut best: Option<(f64, usize, CombinerNetwork)> = None;
        let mut stale = 0;

        for epoch in 1..=self.params.epochs {
            let epoch_start = Instant::now();
            let mut indices: Vec<usize> = (0..training.rows()).collect();
            indices.shuffle(&mut rng);

            for batch in indices.chunks(self.params.batch_size) {
                let batch = training.select(batch);
                let grads = self.batch_gradients(network, &batch)?;
                if !grads.loss.is_finite() {
                    return Err(FeatureflowError::ComputationError(format!(
                        "loss became {} in epoch {epoch}",
                        grads.loss
                    )));
                }
                network.apply(
                    &grads,
                    &mut velocity,
                    self.params.learning_rate,
                    self.params.momentum,
                    self.params.regularization_lambda,
                );
            }
            if !network.is_finite() {
                return Err(FeatureflowError::ComputationError(format!(
                    "parameters diverged in epoch {epoch}"
                )));
            }

            let record = EpochStats {
                epoch,
                training: self.evaluate(network, outputs, training)?,
                validation: validation.map(|v| self.evaluate(network, outputs, v)).transpose()?,
                test: test.map(|t| self.evaluate(network, outputs, t)).transpose()?,
                elapsed_secs: epoch_start.elapsed().as_secs_f64(),
            };
            info!(
                epoch,
                train_loss = record.training.loss,
                validation_loss = record.validation.as_ref().map(|v| v.loss),
                "epoch finished"
            );
            progress(&record);

            let monitored = record
                .validation
                .as_ref()
                .map_or(record.training.loss, |v| v.loss);
            stats.epochs.push(record);

            let improved = best.as_ref().map_or(true, |(loss, _, _)| monitored < *loss);
            if improved {
                best = Some((monitored, epoch, network.clone()));
                stale = 0;
            } else {
                stale += 1;
            }

            if let (Some(patience), Some(_)) = (self.params.early_stop, validation) {
                if stale >= patience && epoch < self.params.epochs {
                    info!(epoch, patience, "early stopping");
                    stats.stopped_early = true;
                    break;
                }
            }
        }

        if let Some((_, epoch, params)) = best {
            stats.best_epoch = epoch;
            *network = params;
        }
        stats.training_time_secs = start.elapsed().as_secs_f64();
        Ok(stats)
    }

    /// Average gradient of one batch, computed shard by shard on the executor
    fn batch_gradients(&self, network: &CombinerNetwork, batch: &EncodedSplit) -> Result<Gradients> {
        let shards = chunk_ranges(batch.rows(), self.executor.parallelism());
        debug!(rows = batch.rows(), shards = shards.len(), "computing batch gradients");

        let partials = self.executor.map_indexed(shards.len(), |i| {
            let (x, targets) = batch.shard(shards[i].clone());
            network.gradients(x, &targets)
        });

        let mut total = Gradients::zeros(network);
        for partial in partials {
            total.add(&partial?);
        }
        total.scale(1.0 / batch.rows() as f64);
        Ok(total)
    }

    /// Loss and metrics over a whole split, sharded like training batches
    pub fn evaluate(
        &self,
        network: &CombinerNetwork,
        outputs: &[FittedOutput],
        split: &EncodedSplit,
    ) -> Result<SplitMetrics> {
        let shards = chunk_ranges(split.rows(), self.executor.parallelism());
        let partials = self
            .executor
            .map_indexed(shards.len(), |i| {
                let (x, targets) = split.shard(shards[i].clone());
                network.evaluate(x, &targets)
            })
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        let loss: f64 = partials.iter().map(|(loss, _)| loss).sum();
        let mut metrics = SplitMetrics {
            loss: loss / split.rows().max(1) as f64,
            ..Default::default()
        };
        for (k, output) in outputs.iter().enumerate() {
            let views: Vec<ArrayView2<'_, f64>> = partials.iter().map(|(_, heads)| heads[k].view()).collect();
            let predicted = concatenate(Axis(0), &views)?;
            metrics.outputs.insert(
                output.name.clone(),
                OutputMetrics::compute(output, &predicted, split.targets[k].view()),
            );
        }
        Ok(metrics)
    }
}
