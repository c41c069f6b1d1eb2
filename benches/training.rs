use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use featureflow::backend::{Backend, DistributedBackend, LocalBackend, ResourceHints, TrainOptions};
use featureflow::config::{CombinerConfig, FeatureSpec, ModelConfig, TrainingParams};
use featureflow::data::{DatasetHandle, SyntheticDataGenerator};

fn bench_config() -> ModelConfig {
    ModelConfig::new(
        vec![
            FeatureSpec::numerical("numerical"),
            FeatureSpec::category("category"),
            FeatureSpec::text("text"),
            FeatureSpec::vector("vector"),
            FeatureSpec::date("date"),
        ],
        vec![FeatureSpec::binary("label")],
    )
    .with_combiner(CombinerConfig::concat(32))
    .with_training(TrainingParams::default().with_epochs(3).with_batch_size(256))
}

fn dataset(config: &ModelConfig, rows: usize) -> DatasetHandle {
    let df = SyntheticDataGenerator::new(7)
        .generate(config.all_features(), rows)
        .unwrap();
    DatasetHandle::from(df)
}

fn bench_training(c: &mut Criterion) {
    let mut group = c.benchmark_group("train");
    group.sample_size(10);

    let config = bench_config();
    let tmp = tempfile::TempDir::new().unwrap();
    let options = TrainOptions::default()
        .with_output_directory(tmp.path())
        .minimal();

    for rows in [1000, 5000] {
        let data = dataset(&config, rows);

        let local = LocalBackend::new();
        let ctx = local.initialize(&ResourceHints::default()).unwrap();
        group.bench_with_input(BenchmarkId::new("local", rows), &data, |b, data| {
            b.iter(|| local.train(&ctx, black_box(&config), data, &options).unwrap())
        });
        drop(ctx);

        for workers in [2, 4] {
            let distributed = DistributedBackend::new();
            let ctx = distributed.initialize(&ResourceHints::workers(workers)).unwrap();
            group.bench_with_input(
                BenchmarkId::new(format!("distributed_{workers}"), rows),
                &data,
                |b, data| b.iter(|| distributed.train(&ctx, black_box(&config), data, &options).unwrap()),
            );
        }
    }

    group.finish();
}

fn bench_prediction(c: &mut Criterion) {
    let mut group = c.benchmark_group("predict");

    let config = bench_config();
    let tmp = tempfile::TempDir::new().unwrap();
    let options = TrainOptions::default()
        .with_output_directory(tmp.path())
        .minimal();
    let data = dataset(&config, 5000);

    let backend = DistributedBackend::new();
    let ctx = backend.initialize(&ResourceHints::workers(4)).unwrap();
    let trained = backend.train(&ctx, &config, &data, &options).unwrap();

    group.bench_function("distributed_4", |b| {
        b.iter(|| backend.predict(&ctx, &trained.model, black_box(&data)).unwrap())
    });

    let local = LocalBackend::new();
    let local_ctx = local.initialize(&ResourceHints::default()).unwrap();
    group.bench_function("local", |b| {
        b.iter(|| local.predict(&local_ctx, &trained.model, black_box(&data)).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_training, bench_prediction);
criterion_main!(benches);
