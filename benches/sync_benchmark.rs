//! Benchmarks for acled-sync operations.

use acled_sync::engine::select_new_records;
use acled_sync::{EventRecord, EventSchema};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;
use std::collections::HashSet;

fn record(i: usize) -> EventRecord {
    serde_json::from_value(json!({
        "event_id_cnty": format!("NGA{}", i),
        "event_date": "2024-03-01",
        "year": "2024",
        "event_type": "Protests",
        "country": "Nigeria",
        "latitude": "9.0765",
        "longitude": "7.3986",
        "fatalities": "0",
        "timestamp": "1709251200"
    }))
    .unwrap()
}

/// Benchmark the per-page dedup step against a large baseline.
fn bench_select_new(c: &mut Criterion) {
    let baseline: HashSet<String> = (0..200_000).map(|i| format!("NGA{}", i)).collect();
    let mut group = c.benchmark_group("select_new_records");

    for overlap in [0usize, 2500, 5000] {
        let page: Vec<EventRecord> = (0..5000)
            .map(|i| record(200_000 - overlap + i))
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(overlap), &page, |b, page| {
            b.iter(|| black_box(select_new_records(page.clone(), &baseline, "event_id_cnty")))
        });
    }
    group.finish();
}

/// Benchmark coercion of a page into typed rows.
fn bench_prepare_batch(c: &mut Criterion) {
    let schema = EventSchema::acled();
    let records: Vec<EventRecord> = (0..5000).map(record).collect();

    c.bench_function("prepare_batch", |b| {
        b.iter(|| black_box(schema.prepare_batch(&records)))
    });
}

criterion_group!(benches, bench_select_new, bench_prepare_batch);
criterion_main!(benches);
