//! Performance benchmarks for diffing, patching and change tracking.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use delta_store::diff::{diff, patch, DiffOptions};
use delta_store::storage::SetOptions;
use delta_store::tracker::BatchOptions;
use delta_store::{ChangeTracker, Storage, StorageConfig, TrackerConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

fn document(rows: usize, revision: usize) -> Value {
    let items: Vec<Value> = (0..rows)
        .map(|i| {
            json!({
                "id": i,
                "name": format!("item-{}", i),
                "qty": if i % 7 == 0 { revision } else { 1 },
                "tags": ["a", "b", "c"],
            })
        })
        .collect();
    json!({"title": "inventory", "revision": revision, "items": items})
}

fn rotated(doc: &Value) -> Value {
    let mut doc = doc.clone();
    if let Some(items) = doc["items"].as_array_mut() {
        if !items.is_empty() {
            items.rotate_left(1);
        }
    }
    doc
}

/// Benchmark diff with varying array sizes
fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff");

    for rows in [10, 100, 1000] {
        let old = document(rows, 1);
        let new = document(rows, 2);

        group.bench_with_input(BenchmarkId::new("index_mode", rows), &rows, |b, _| {
            let options = DiffOptions::default();
            b.iter(|| black_box(diff(&old, &new, &options)));
        });

        let moved = rotated(&new);
        group.bench_with_input(BenchmarkId::new("identity_mode", rows), &rows, |b, _| {
            let options = DiffOptions::default().with_object_identifier("id");
            b.iter(|| black_box(diff(&old, &moved, &options)));
        });
    }

    group.finish();
}

/// Benchmark patch application
fn bench_patch(c: &mut Criterion) {
    let mut group = c.benchmark_group("patch");

    for rows in [10, 100, 1000] {
        let old = document(rows, 1);
        let new = rotated(&document(rows, 2));
        let options = DiffOptions::default().with_object_identifier("id");
        let node = diff(&old, &new, &options);

        group.bench_with_input(BenchmarkId::new("identity_moves", rows), &rows, |b, _| {
            b.iter(|| black_box(patch(&old, &node)));
        });
    }

    group.finish();
}

/// Benchmark tracking into an in-memory store with a growing log
fn bench_track_change(c: &mut Criterion) {
    let mut group = c.benchmark_group("track_change");

    for pending in [10, 100, 500] {
        group.bench_with_input(BenchmarkId::new("pending", pending), &pending, |b, &pending| {
            let storage = Arc::new(Storage::in_memory(StorageConfig::default()));
            let tracker = ChangeTracker::new(storage, TrackerConfig::default());
            for i in 0..pending {
                tracker
                    .track_change("items", &format!("i{}", i), Some(&json!({"n": i})), None, None)
                    .unwrap();
            }

            let old = json!({"n": 0, "note": "before"});
            let new = json!({"n": 1, "note": "after"});
            b.iter(|| {
                black_box(
                    tracker
                        .track_change("items", "hot", Some(&new), Some(&old), None)
                        .unwrap(),
                )
            });
        });
    }

    group.finish();
}

/// Benchmark batch generation
fn bench_generate_batch(c: &mut Criterion) {
    let storage = Arc::new(Storage::in_memory(StorageConfig::default()));
    let tracker = ChangeTracker::new(storage, TrackerConfig::default());
    for i in 0..500 {
        let collection = if i % 2 == 0 { "users" } else { "posts" };
        tracker
            .track_change(collection, &format!("e{}", i), Some(&json!({"n": i})), None, None)
            .unwrap();
    }

    c.bench_function("generate_batch_500", |b| {
        b.iter(|| black_box(tracker.generate_change_batch(&BatchOptions::new()).unwrap()));
    });
}

/// Benchmark file-backed writes
fn bench_file_writes(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let storage = Storage::open(dir.path().join("bench.dsf"), 64 * 1024 * 1024, StorageConfig::default())
        .unwrap();
    let value = json!({"payload": "x".repeat(256)});

    let mut i = 0u64;
    c.bench_function("file_set", |b| {
        b.iter(|| {
            i += 1;
            storage
                .set(&format!("k{}", i % 100), value.clone(), SetOptions::new())
                .unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_diff,
    bench_patch,
    bench_track_change,
    bench_generate_batch,
    bench_file_writes
);
criterion_main!(benches);
