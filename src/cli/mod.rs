//! featureflow CLI
//!
//! Command-line interface for training, prediction and dataset generation.

use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::backend::{create_backend, Backend, ResourceHints, TrainOptions};
use crate::config::{BackendConfig, BackendType, ModelConfig};
use crate::data::{write_partitioned, DataSaver, DatasetHandle, SyntheticDataGenerator};
use crate::model::TrainedModel;

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString {
    s.truecolor(100, 100, 100)
}
fn accent(s: &str) -> ColoredString {
    s.truecolor(120, 170, 255)
}
fn muted(s: &str) -> ColoredString {
    s.truecolor(140, 140, 140)
}
fn ok(s: &str) -> ColoredString {
    s.truecolor(100, 210, 120)
}

fn kv(key: &str, val: &str) {
    println!("  {:<18} {}", muted(key), val.white());
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "featureflow")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Declarative tabular model training on local or distributed backends")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Backend selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    Local,
    Distributed,
}

impl From<BackendArg> for BackendType {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Local => BackendType::Local,
            BackendArg::Distributed => BackendType::Distributed,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train a model described by a JSON configuration
    Train {
        /// Model configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Dataset: csv, tsv, json, parquet, or a directory of parquet partitions
        #[arg(short, long)]
        dataset: PathBuf,

        /// Backend, overriding the configuration's backend section
        #[arg(short, long, value_enum)]
        backend: Option<BackendArg>,

        /// Workers to reserve
        #[arg(short, long)]
        workers: Option<usize>,

        /// Parent directory of the run directory
        #[arg(short, long, default_value = "results")]
        output_directory: PathBuf,

        /// Run directory prefix
        #[arg(long, default_value = "experiment")]
        experiment_name: String,

        /// Only write the model, not progress, splits or test predictions
        #[arg(long)]
        minimal: bool,
    },

    /// Predict with a trained model
    Predict {
        /// Run directory written by `train`
        #[arg(short, long)]
        model: PathBuf,

        /// Dataset to predict
        #[arg(short, long)]
        dataset: PathBuf,

        #[arg(short, long, value_enum)]
        backend: Option<BackendArg>,

        #[arg(short, long)]
        workers: Option<usize>,

        /// Predictions file (csv, json or parquet)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate a random dataset matching a configuration's features
    Synthesize {
        #[arg(short, long)]
        config: PathBuf,

        /// Output file, or directory when --partitions is given
        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long, default_value = "100")]
        rows: usize,

        #[arg(short, long, default_value = "42")]
        seed: u64,

        /// Write a directory of this many parquet partitions
        #[arg(short, long)]
        partitions: Option<usize>,
    },

    /// Show a dataset's schema
    Info {
        #[arg(short, long)]
        dataset: PathBuf,
    },
}

fn backend_config(config: &ModelConfig, backend: Option<BackendArg>, workers: Option<usize>) -> BackendConfig {
    let mut resolved = config.backend.clone().unwrap_or_default();
    if let Some(backend) = backend {
        resolved.backend_type = backend.into();
    }
    if workers.is_some() {
        resolved.num_workers = workers;
    }
    resolved
}

fn open_backend(config: &BackendConfig) -> (Box<dyn Backend>, ResourceHints) {
    (create_backend(config), ResourceHints::from(config))
}

// ─── Commands ──────────────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
pub fn cmd_train(
    config_path: &Path,
    dataset_path: &Path,
    backend: Option<BackendArg>,
    workers: Option<usize>,
    output_directory: &Path,
    experiment_name: &str,
    minimal: bool,
) -> anyhow::Result<()> {
    section("Train");

    step_run("Reading configuration");
    let config = ModelConfig::from_file(config_path)?;
    step_done(&format!(
        "{} inputs, {} outputs",
        config.input_features.len(),
        config.output_features.len()
    ));

    let dataset = DatasetHandle::from_path(dataset_path)?;
    let (backend, hints) = open_backend(&backend_config(&config, backend, workers));

    step_run(&format!("Starting {} backend", backend.name().cyan()));
    let mut ctx = backend.initialize(&hints)?;
    step_done(&format!("{} workers", ctx.num_workers()));

    let mut options = TrainOptions::default()
        .with_output_directory(output_directory)
        .with_experiment_name(experiment_name);
    if minimal {
        options = options.minimal();
    }

    step_run(&format!("Training for up to {} epochs", config.training.epochs));
    let start = Instant::now();
    let result = backend.train(&ctx, &config, &dataset, &options);
    backend.teardown(&mut ctx)?;
    let result = result?;
    step_done(&format!("{:?}", start.elapsed()));

    let stats = &result.statistics;
    println!();
    kv("Epochs", &stats.epochs_run().to_string());
    kv("Best epoch", &stats.best_epoch.to_string());
    if let Some(last) = stats.last() {
        kv("Final train loss", &format!("{:.4}", last.training.loss));
    }
    if let Some(best) = stats.epochs.get(stats.best_epoch.saturating_sub(1)) {
        let split = best.validation.as_ref().unwrap_or(&best.training);
        kv("Loss", &format!("{:.4}", split.loss));
        for (name, metrics) in &split.outputs {
            if let Some(accuracy) = metrics.accuracy {
                kv(&format!("{name} accuracy"), &format!("{accuracy:.4}"));
            }
            if let Some(mae) = metrics.mae {
                kv(&format!("{name} mae"), &format!("{mae:.4}"));
            }
        }
    }

    let path = result.artifacts.persist();
    println!();
    println!("  {} {}", ok("saved"), path.display().to_string().white());
    println!();
    Ok(())
}

pub fn cmd_predict(
    model_dir: &Path,
    dataset_path: &Path,
    backend: Option<BackendArg>,
    workers: Option<usize>,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    section("Predict");

    step_run("Loading model");
    let model = TrainedModel::load(model_dir)?;
    step_done(&format!("{} parameters", model.num_parameters()));

    let dataset = DatasetHandle::from_path(dataset_path)?;
    let (backend, hints) = open_backend(&backend_config(model.config(), backend, workers));

    step_run(&format!("Predicting on {} backend", backend.name().cyan()));
    let start = Instant::now();
    let predictions = crate::backend::with_execution_context(backend.as_ref(), &hints, |ctx| {
        backend.predict(ctx, &model, &dataset)
    })?;
    step_done(&format!("{} rows in {:?}", predictions.len(), start.elapsed()));

    match output {
        Some(path) => {
            step_run(&format!("Saving → {}", path.display()));
            predictions.save(path)?;
            step_done("");
        }
        None => println!("\n{}", predictions.frame().head(Some(10))),
    }
    println!();
    Ok(())
}

pub fn cmd_synthesize(
    config_path: &Path,
    output: &Path,
    rows: usize,
    seed: u64,
    partitions: Option<usize>,
) -> anyhow::Result<()> {
    section("Synthesize");

    let config = ModelConfig::from_file(config_path)?;
    step_run(&format!("Generating {rows} rows"));
    let mut df = SyntheticDataGenerator::new(seed).generate(config.all_features(), rows)?;
    step_done(&format!("{} columns", df.width()));

    step_run(&format!("Saving → {}", output.display()));
    match partitions {
        Some(n) => {
            let files = write_partitioned(&df, output, n)?;
            step_done(&format!("{} partitions", files.len()));
        }
        None => {
            DataSaver::save_auto(&mut df, output)?;
            step_done("");
        }
    }
    println!();
    Ok(())
}

pub fn cmd_info(dataset_path: &Path) -> anyhow::Result<()> {
    section("Dataset");

    let dataset = DatasetHandle::from_path(dataset_path)?;
    let schema = dataset.schema()?;
    match &dataset {
        DatasetHandle::Materialized(df) => kv("Rows", &df.height().to_string()),
        DatasetHandle::Partitioned(parts) => kv("Partitions", &parts.num_partitions().to_string()),
    }
    kv("Columns", &schema.len().to_string());
    println!();
    for name in schema.names() {
        let dtype = schema.dtype(name).map(|d| d.to_string()).unwrap_or_default();
        println!("  {:<24} {}", name.white(), dim(&dtype));
    }
    println!();
    Ok(())
}
