//! Append-path benchmarks
//!
//! - `insert/*`: in-memory inserts, no file involved
//! - `flush/*`: one flush of N pending records (encode, append, header rewrite)
//! - `recover/*`: replay of a file holding N records
//!
//! ```bash
//! cargo bench --bench append_benchmarks
//! cargo bench --bench append_benchmarks -- "flush"
//! ```

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use serde::{Deserialize, Serialize};
use spool_core::{Buffer, BufferOptions};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Job {
    id: u64,
    name: String,
    attempts: u32,
}

fn job(id: u64) -> Job {
    Job {
        id,
        name: format!("job_{id:06}"),
        attempts: 0,
    }
}

fn durable_options(dir: &TempDir, name: &str) -> BufferOptions {
    BufferOptions::default()
        .with_backing_file(dir.path().join(name))
        .with_persistence(true)
        .with_recovery(true)
}

fn insert_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    group.throughput(Throughput::Elements(1));

    group.bench_function("tail", |b| {
        let buffer: Buffer<Job> = Buffer::new(&BufferOptions::default());
        let mut id = 0;
        b.iter(|| {
            id += 1;
            buffer.add_at_tail(black_box(job(id)));
        });
    });

    group.bench_function("tail_then_remove_head", |b| {
        let buffer: Buffer<Job> = Buffer::new(&BufferOptions::default());
        let mut id = 0;
        b.iter(|| {
            id += 1;
            buffer.add_at_tail(job(id));
            black_box(buffer.remove_head().unwrap());
        });
    });

    group.finish();
}

fn flush_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush");
    group.measurement_time(Duration::from_secs(10));

    for count in [10u64, 100, 1_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let dir = TempDir::new().unwrap();
            let mut run = 0;
            b.iter_batched(
                || {
                    run += 1;
                    let buffer: Buffer<Job> =
                        Buffer::new(&durable_options(&dir, &format!("flush_{run}")));
                    for id in 0..count {
                        buffer.add_at_tail(job(id));
                    }
                    buffer
                },
                |buffer| black_box(buffer.flush().unwrap()),
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

fn recover_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("recover");

    for count in [100u64, 1_000, 10_000] {
        let dir = TempDir::new().unwrap();
        let options = durable_options(&dir, "recover");
        let source: Buffer<Job> = Buffer::new(&options);
        for id in 0..count {
            source.add_at_tail(job(id));
        }
        source.flush().unwrap();

        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                let buffer: Buffer<Job> = Buffer::new(&options);
                buffer.register_type();
                black_box(buffer.recover().unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, insert_benchmarks, flush_benchmarks, recover_benchmarks);
criterion_main!(benches);
