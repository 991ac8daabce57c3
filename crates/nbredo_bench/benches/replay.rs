//! Replay throughput benchmarks.

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use nbredo_core::{
    BackendPageStore, BasicOnlineBtree, BtreeRedo, BufferPool, RecoverySession, RedoConfig,
};
use nbredo_testkit::{replay_fresh, PrimaryIndex};
use rand::seq::SliceRandom;
use std::sync::Arc;
use tempfile::TempDir;

/// Build a primary by inserting `keys` keys in random order.
fn random_primary(keys: u32, image_every: Option<u64>) -> PrimaryIndex {
    let mut order: Vec<u32> = (0..keys).collect();
    order.shuffle(&mut rand::thread_rng());

    let mut primary = PrimaryIndex::in_memory();
    if let Some(every) = image_every {
        primary = primary.full_page_images(every);
    }
    for n in order {
        primary.insert(n).unwrap();
    }
    primary
}

fn record_count(primary: &PrimaryIndex) -> u64 {
    primary.wal().read_all().unwrap().len() as u64
}

/// Benchmark in-memory replay of insert-and-split workloads.
fn bench_replay_in_memory(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay_in_memory");

    for keys in [250u32, 1000, 1500].iter() {
        let primary = random_primary(*keys, None);
        group.throughput(Throughput::Elements(record_count(&primary)));
        group.bench_with_input(BenchmarkId::from_parameter(keys), keys, |b, _| {
            b.iter(|| {
                let replayed = replay_fresh(black_box(primary.wal()), RedoConfig::default());
                black_box(replayed.unwrap());
            });
        });
    }
    group.finish();
}

/// Benchmark replay when some records carry full-page images.
fn bench_replay_with_images(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay_with_images");

    for every in [2u64, 8, 32].iter() {
        let primary = random_primary(1000, Some(*every));
        group.throughput(Throughput::Elements(record_count(&primary)));
        group.bench_with_input(BenchmarkId::new("every", every), every, |b, _| {
            b.iter(|| {
                let replayed = replay_fresh(black_box(primary.wal()), RedoConfig::default());
                black_box(replayed.unwrap());
            });
        });
    }
    group.finish();
}

/// Benchmark replay into a page directory, including the final flush.
fn bench_replay_to_disk(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay_to_disk");
    group.sample_size(20);

    let primary = random_primary(1000, None);
    group.throughput(Throughput::Elements(record_count(&primary)));
    group.bench_function("1000_keys", |b| {
        b.iter_batched(
            || TempDir::new().unwrap(),
            |dir| {
                let store = BackendPageStore::open_dir(dir.path()).unwrap();
                let pool = Arc::new(BufferPool::new(store));
                let redo = BtreeRedo::new(pool, RedoConfig::default());
                let mut session = RecoverySession::new(primary.wal(), redo);
                session.replay().unwrap();
                black_box(session.finish(&BasicOnlineBtree::default()).unwrap());
            },
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

/// Benchmark decoding the log without applying it.
fn bench_wal_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("wal_decode");

    let primary = random_primary(1000, Some(8));
    group.throughput(Throughput::Bytes(primary.wal().size().unwrap()));
    group.bench_function("1000_keys", |b| {
        b.iter(|| {
            let records = primary.wal().read_all().unwrap();
            black_box(records);
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_replay_in_memory,
    bench_replay_with_images,
    bench_replay_to_disk,
    bench_wal_decode,
);
criterion_main!(benches);
