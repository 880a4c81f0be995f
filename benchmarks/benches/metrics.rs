use benchmarks::target_pair;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use nutripredict::metrics::Metrics;
use std::hint::black_box;

fn bench_single_target(c: &mut Criterion) {
    for size in [100, 1000, 10000, 100000].iter() {
        let (y_true, y_pred) = target_pair(*size);
        c.bench_with_input(BenchmarkId::new("r_squared", size), size, |b, _| {
            b.iter(|| {
                black_box(Metrics::r_squared(
                    black_box(y_true.column(0)),
                    black_box(y_pred.column(0)),
                ))
            });
        });
        c.bench_with_input(BenchmarkId::new("mae", size), size, |b, _| {
            b.iter(|| black_box(Metrics::mae(black_box(y_true.column(0)), black_box(y_pred.column(0)))));
        });
    }
}

fn bench_all_targets(c: &mut Criterion) {
    for size in [100, 1000, 10000, 100000].iter() {
        let (y_true, y_pred) = target_pair(*size);
        c.bench_with_input(BenchmarkId::new("calculate_multi", size), size, |b, _| {
            b.iter(|| {
                black_box(Metrics::calculate_multi(
                    black_box(y_true.view()),
                    black_box(y_pred.view()),
                ))
            });
        });
    }
}

criterion_group!(benches, bench_single_target, bench_all_targets);
criterion_main!(benches);
