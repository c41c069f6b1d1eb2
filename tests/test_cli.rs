//! Integration test: synthesize → train → predict through the command functions

use featureflow::cli::{cmd_info, cmd_predict, cmd_synthesize, cmd_train, BackendArg};
use featureflow::config::{CombinerConfig, FeatureSpec, ModelConfig, TrainingParams};
use featureflow::data::{DataLoader, DatasetHandle};
use featureflow::model::TrainedModel;
use tempfile::TempDir;

fn write_config(dir: &std::path::Path) -> std::path::PathBuf {
    let config = ModelConfig::new(
        vec![
            FeatureSpec::numerical("amount"),
            FeatureSpec::category("region"),
            FeatureSpec::text("notes"),
            FeatureSpec::binary("flag"),
        ],
        vec![FeatureSpec::binary("churned")],
    )
    .with_combiner(CombinerConfig::concat(8))
    .with_training(TrainingParams::default().with_epochs(2).with_batch_size(16));
    let path = dir.join("model.json");
    std::fs::write(&path, config.to_json().unwrap()).unwrap();
    path
}

#[test]
fn test_synthesize_train_predict_round_trip() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());
    let data = tmp.path().join("data");

    cmd_synthesize(&config, &data, 120, 3, Some(3)).unwrap();
    let handle = DatasetHandle::from_path(&data).unwrap();
    assert!(!handle.is_materialized());
    cmd_info(&data).unwrap();

    let results = tmp.path().join("results");
    cmd_train(
        &config,
        &data,
        Some(BackendArg::Distributed),
        Some(2),
        &results,
        "cli",
        true,
    )
    .unwrap();
    let run_dir = results.join("cli_run");
    assert!(run_dir.join("model").is_dir());
    assert!(TrainedModel::load(&run_dir).is_ok());

    let out = tmp.path().join("predictions.csv");
    cmd_predict(&run_dir, &data, Some(BackendArg::Local), None, Some(&out)).unwrap();
    let predictions = DataLoader::new().load_auto(&out).unwrap();
    assert_eq!(predictions.height(), 120);
    assert!(predictions.column("churned_predictions").is_ok());
}

#[test]
fn test_train_rejects_missing_config() {
    let tmp = TempDir::new().unwrap();
    let err = cmd_train(
        &tmp.path().join("absent.json"),
        &tmp.path().join("data.csv"),
        None,
        None,
        &tmp.path().join("results"),
        "cli",
        true,
    );
    assert!(err.is_err());
    assert!(!tmp.path().join("results").exists());
}
