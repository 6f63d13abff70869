//! Batch application benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use replidb_bench::generate_cud_batch;
use replidb_repl::{ApplierContext, BatchExecutor, InitialJobMode, ReplConfig};
use replidb_store::MemoryServer;

/// Benchmark optimistic against pessimistic namespace jobs on an empty store.
fn bench_job_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("cud_apply");

    for batch_size in [10, 100, 1000].iter() {
        let batch = generate_cud_batch(*batch_size, 4, 3);
        group.throughput(Throughput::Elements(*batch_size as u64));

        for (name, reapplying) in [("optimistic", true), ("pessimistic", false)] {
            let config =
                ReplConfig::default().with_initial_job_mode(InitialJobMode::FollowReapplyingFlag);
            let context = ApplierContext::builder().reapplying(reapplying).build();

            group.bench_with_input(BenchmarkId::new(name, batch_size), &batch, |b, batch| {
                b.iter(|| {
                    let executor = BatchExecutor::new(MemoryServer::new(), config.clone());
                    executor.apply(black_box(batch), &context).unwrap();
                });
            });
        }
    }
    group.finish();
}

/// Benchmark the uniqueness fallback: re-applying a batch whose inserts
/// already exist.
fn bench_reapply(c: &mut Criterion) {
    let mut group = c.benchmark_group("cud_reapply");

    for batch_size in [10, 100, 1000].iter() {
        let batch = generate_cud_batch(*batch_size, 4, 3);
        group.throughput(Throughput::Elements(*batch_size as u64));

        group.bench_with_input(BenchmarkId::from_parameter(batch_size), &batch, |b, batch| {
            let executor = BatchExecutor::new(MemoryServer::new(), ReplConfig::default());
            let context = ApplierContext::for_reapply();
            executor.apply(batch, &context).unwrap();

            b.iter(|| {
                executor.apply(black_box(batch), &context).unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_job_modes, bench_reapply);
criterion_main!(benches);
