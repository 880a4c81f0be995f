use benchmarks::dataset;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nutripredict::features::{self, FeatureEngineer};
use std::hint::black_box;

fn bench_fit_transform(c: &mut Criterion) {
    let mut group = c.benchmark_group("engineer_dataset");
    for size in [100usize, 1000, 10000] {
        let data = dataset(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| black_box(features::engineer(black_box(data)).expect("engineer")));
        });
    }
    group.finish();
}

fn bench_transform_record(c: &mut Criterion) {
    let data = dataset(1000);
    let engineer = FeatureEngineer::new().fit(&data).expect("fit");
    let record = &data.records()[0];
    c.bench_function("transform_record", |b| {
        b.iter(|| black_box(engineer.transform_record(black_box(record))));
    });
}

criterion_group!(benches, bench_fit_transform, bench_transform_record);
criterion_main!(benches);
