//! Benchmarks for one trainer epoch over the reference components

use components::builtin::linear::Linear;
use components::builtin::loss::MseLoss;
use components::builtin::optim::{Adam, Sgd};
use components::builtin::synthetic::SyntheticRegression;
use components::{Model, Optimizer};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pipeline::worker::TrainContext;
use pipeline::{LossTerm, MetricsWriter, Trainer};
use runtime_core::DeviceAssignment;

fn train_one_epoch(in_features: usize, optimizer: &mut dyn Optimizer, model: &mut Linear) {
    let source = SyntheticRegression::generate("train", 4096, 64, in_features, 0.1, 3);
    let losses = vec![LossTerm::new("MseLoss", 1.0, Box::new(MseLoss))];
    let mut writer = MetricsWriter::disabled();
    let devices = DeviceAssignment::cpu();

    let mut trainer = Trainer::new(Box::new(source), 0);
    trainer.run_epoch(
        1,
        TrainContext {
            model,
            optimizer,
            losses: &losses,
            metrics: &[],
            writer: &mut writer,
            devices: &devices,
            log_step: 0,
        },
    );
}

fn trainer_epoch_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("trainer_epoch");
    group.throughput(Throughput::Elements(4096));

    for in_features in [8, 64, 512] {
        group.bench_with_input(BenchmarkId::new("sgd", in_features), &in_features, |b, &n| {
            b.iter(|| {
                let mut model = Linear::new(n);
                let mut optimizer = Sgd::new(0.01, 0.9, 0.0, model.parameter_shapes());
                train_one_epoch(n, &mut optimizer, &mut model);
            });
        });

        group.bench_with_input(BenchmarkId::new("adam", in_features), &in_features, |b, &n| {
            b.iter(|| {
                let mut model = Linear::new(n);
                let mut optimizer = Adam::new(0.001, model.parameter_shapes());
                train_one_epoch(n, &mut optimizer, &mut model);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, trainer_epoch_benchmark);
criterion_main!(benches);
