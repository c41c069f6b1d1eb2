//! featureflow - Main Entry Point

use clap::Parser;
use featureflow::cli::{cmd_info, cmd_predict, cmd_synthesize, cmd_train, Cli, Commands};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("FEATUREFLOW_LOG")
                .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| "featureflow=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            config,
            dataset,
            backend,
            workers,
            output_directory,
            experiment_name,
            minimal,
        } => cmd_train(
            &config,
            &dataset,
            backend,
            workers,
            &output_directory,
            &experiment_name,
            minimal,
        )?,
        Commands::Predict {
            model,
            dataset,
            backend,
            workers,
            output,
        } => cmd_predict(&model, &dataset, backend, workers, output.as_deref())?,
        Commands::Synthesize {
            config,
            output,
            rows,
            seed,
            partitions,
        } => cmd_synthesize(&config, &output, rows, seed, partitions)?,
        Commands::Info { dataset } => cmd_info(&dataset)?,
    }

    Ok(())
}
