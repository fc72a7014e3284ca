//! Benchmarks for event append and projection replay.
use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use planwright_core::events::{calculate_hash, Event, EventStore, EventType, NewEvent};
use planwright_core::projections::{
    AuditTimelineProjection, DriftHistoryProjection, ExtendedVelocityProjection, Projection,
    ProjectionSet, TaskStateProjection,
};
use std::sync::Arc;

fn history(n: usize) -> Vec<Event> {
    let start = Utc::now() - Duration::days(60);
    let mut prev = String::new();
    (0..n)
        .map(|i| {
            let at = start + Duration::minutes(i as i64 * 7);
            let draft = match i % 4 {
                0 => NewEvent::task(EventType::TaskStarted, format!("task-{}", i / 4)),
                1 => NewEvent::task(EventType::TaskCompleted, format!("task-{}", i / 4)),
                2 => NewEvent::drift(EventType::DriftDetected, format!("comp-{}", i % 13), "schema")
                    .meta("issue_count", (i % 17) as i64),
                _ => NewEvent::task(EventType::TaskVerified, format!("task-{}", i / 4)),
            };
            let event = draft.at(at).seal(&prev);
            prev = event.hash.clone();
            event
        })
        .collect()
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_store_append");
    group.throughput(Throughput::Elements(1));
    let dir = tempfile::tempdir().unwrap();
    let store = EventStore::open(dir.path().join("events.jsonl")).unwrap();
    group.bench_function("task_started", |b| {
        b.iter(|| black_box(store.append(NewEvent::task(EventType::TaskStarted, "bench").meta("n", 1)).unwrap()));
    });
    group.finish();
}

fn bench_hash(c: &mut Criterion) {
    let event = history(3).pop().unwrap();
    c.bench_function("calculate_hash", |b| b.iter(|| black_box(calculate_hash(black_box(&event)))));
}

fn bench_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("projection_rebuild");
    for size in [1_000usize, 10_000] {
        let events = history(size);
        group.throughput(Throughput::Elements(size as u64));
        let set = ProjectionSet::new()
            .with(Arc::new(TaskStateProjection::new()))
            .with(Arc::new(ExtendedVelocityProjection::default()))
            .with(Arc::new(DriftHistoryProjection::default()))
            .with(Arc::new(AuditTimelineProjection::new()));
        group.bench_with_input(BenchmarkId::new("all", size), &events, |b, events| {
            b.iter(|| set.rebuild(black_box(events)));
        });
        let tasks = TaskStateProjection::new();
        group.bench_with_input(BenchmarkId::new("task_state", size), &events, |b, events| {
            b.iter(|| tasks.rebuild(black_box(events)));
        });
    }
    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let events = history(10_000);
    let velocity = ExtendedVelocityProjection::default();
    velocity.rebuild(&events);
    let drift = DriftHistoryProjection::default();
    drift.rebuild(&events);

    let mut group = c.benchmark_group("projection_queries");
    group.bench_function("velocity_trend", |b| b.iter(|| black_box(velocity.get_velocity_trend())));
    group.bench_function("velocity_stats", |b| b.iter(|| black_box(velocity.get_velocity_stats())));
    group.bench_function("burndown_30", |b| b.iter(|| black_box(velocity.generate_burndown(5_000, 500, 30))));
    group.bench_function("drift_trend", |b| b.iter(|| black_box(drift.get_drift_trend(30))));
    group.finish();
}

criterion_group!(benches, bench_append, bench_hash, bench_rebuild, bench_queries);
criterion_main!(benches);
