//! Benchmarks for the storage engine (WAL + Memtable).

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use quorumkv_storage::wal::FsyncPolicy;
use quorumkv_storage::{Store, NEVER_EXPIRES};
use tempfile::TempDir;

fn bench_store_upsert(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_upsert");

    for size in [64usize, 1024, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let mut store = Store::open(dir.path(), FsyncPolicy::None).unwrap();

            let mut i = 0u64;
            b.iter(|| {
                let key = format!("key_{}", i);
                store
                    .upsert(key.as_bytes(), vec![0x42u8; size], NEVER_EXPIRES)
                    .unwrap();
                i += 1;
            });
        });
    }
    group.finish();
}

fn bench_store_get(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let mut store = Store::open(dir.path(), FsyncPolicy::None).unwrap();

    // Pre-populate 1000 keys
    for i in 0..1000 {
        let key = format!("key_{:04}", i);
        store
            .upsert(key.as_bytes(), vec![0x42u8; 256], NEVER_EXPIRES)
            .unwrap();
    }

    c.bench_function("store_get", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key_{:04}", i % 1000);
            i += 1;
            black_box(store.get(key.as_bytes()))
        });
    });
}

fn bench_store_range(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let mut store = Store::open(dir.path(), FsyncPolicy::None).unwrap();

    for i in 0..1000 {
        let key = format!("key_{:04}", i);
        store
            .upsert(key.as_bytes(), vec![0x42u8; 256], NEVER_EXPIRES)
            .unwrap();
    }

    c.bench_function("store_range_100", |b| {
        b.iter(|| {
            let records: Vec<_> = store
                .records(b"key_0100", Some(b"key_0200".as_slice()), 0)
                .collect();
            black_box(records)
        });
    });
}

criterion_group!(benches, bench_store_upsert, bench_store_get, bench_store_range);
criterion_main!(benches);
