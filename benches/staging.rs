//! Benchmarks for the staging-queue hot paths.
//!
//! Run with: `cargo bench`
//! View reports in: `target/criterion/report/index.html`

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

use fgstage::{QueueSet, SeedIndex, StagingQueues};

/// Sink that discards everything, so the bench measures queue-side work.
struct NullIndex;

impl SeedIndex for NullIndex {
    fn add(&self, hash: u64, id: u64) -> anyhow::Result<()> {
        black_box((hash, id));
        Ok(())
    }

    fn freeze(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

const RECORDS: u64 = 100_000;
const HASH_BITS: u32 = 24;

/// A cheap well-mixed 24-bit hash for record `i`.
#[inline]
fn hash_for(i: u64) -> u64 {
    i.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> (64 - HASH_BITS)
}

/// Benchmark the `add` hot path, pre-sized and with forced block growth.
fn bench_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("staging_add");
    group.throughput(Throughput::Elements(RECORDS));

    // Initial blocks sized for the full load: no growth events.
    group.bench_function("presized", |b| {
        b.iter_batched(
            || QueueSet::new(HASH_BITS - 10, 10, 40, RECORDS).unwrap(),
            |mut set| {
                for i in 0..RECORDS {
                    set.add(hash_for(i), i);
                }
                set
            },
            BatchSize::LargeInput,
        );
    });

    // Minimum-size initial blocks: every bucket grows repeatedly.
    group.bench_function("growing", |b| {
        b.iter_batched(
            || QueueSet::new(HASH_BITS - 10, 10, 40, 0).unwrap(),
            |mut set| {
                for i in 0..RECORDS {
                    set.add(hash_for(i), i);
                }
                set
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

/// Benchmark the full close + two-pass drain into a null index.
fn bench_freeze(c: &mut Criterion) {
    let mut group = c.benchmark_group("staging_freeze");
    // Each record is replayed twice.
    group.throughput(Throughput::Elements(2 * RECORDS));

    for threads in [1usize, 4] {
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            b.iter_batched(
                || {
                    let mut queues =
                        StagingQueues::new(threads, HASH_BITS, RECORDS, 40, 16).unwrap();
                    let per_thread = RECORDS / threads as u64;
                    for (t, set) in queues.queues_mut().iter_mut().enumerate() {
                        for i in 0..per_thread {
                            let record = (t as u64) * per_thread + i;
                            set.add(hash_for(record), record);
                        }
                    }
                    queues
                },
                |queues| queues.freeze(&NullIndex).unwrap(),
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_add, bench_freeze);
criterion_main!(benches);
