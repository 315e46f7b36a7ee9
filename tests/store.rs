//! Measurement semantics under virtual timestamps, driven through the
//! controller the way the probe natives drive it.

use jvmmon::profiler::registry::MethodKey;
use jvmmon::profiler::store::MeasurementStore;
use jvmmon::profiler::Profiler;
use jvmmon::rewriter::RewriteConfig;

const MS: u64 = 1_000_000;

fn key(name: &str) -> MethodKey {
    MethodKey {
        class: "com/example/Demo".to_string(),
        name: name.to_string(),
        descriptor: "(II)I".to_string(),
    }
}

#[test]
fn nested_calls_split_self_and_total_time() {
    let profiler = Profiler::new(RewriteConfig::default());
    let outer = profiler.registry().assign(key("outer"));
    let inner = profiler.registry().assign(key("inner"));

    // outer runs 0..10ms, inner 2..7ms inside it
    profiler.enter(outer, 0);
    profiler.enter(inner, 2 * MS);
    profiler.exit(inner, 7 * MS);
    profiler.exit(outer, 10 * MS);

    let m = profiler.measurements();
    let outer_rec = m.iter().find(|e| e.key.name == "outer").unwrap();
    let inner_rec = m.iter().find(|e| e.key.name == "inner").unwrap();

    assert_eq!(outer_rec.record.total_ns, 10 * MS);
    assert_eq!(outer_rec.record.self_ns, 5 * MS);
    assert_eq!(inner_rec.record.total_ns, 5 * MS);
    assert_eq!(inner_rec.record.self_ns, 5 * MS);
    // self times over the tree add up to wall time
    assert_eq!(outer_rec.record.self_ns + inner_rec.record.self_ns, 10 * MS);
}

#[test]
fn pause_time_is_reported_alongside_wall_time() {
    let store = MeasurementStore::new();
    store.enter(1, 0);
    store.pause_enter(1, 3 * MS);
    store.pause_exit(1, 8 * MS); // 5ms sleeping
    store.exit(1, 10 * MS);

    // wall time keeps the pause; pause_ns lets the consumer discount it
    let rec = store.record(1).unwrap();
    assert_eq!(rec.count, 1);
    assert_eq!(rec.pause_ns, 5 * MS);
    assert_eq!(rec.total_ns, 10 * MS);
    assert_eq!(rec.self_ns, 10 * MS);
}

#[test]
fn lock_waits_are_tracked_separately() {
    let store = MeasurementStore::new();
    store.enter(1, 0);
    store.lock_enter(1, 1 * MS);
    store.lock_exit(1, 4 * MS); // 3ms blocked
    store.exit(1, 10 * MS);

    let rec = store.record(1).unwrap();
    assert_eq!(rec.block_ns, 3 * MS);
}

#[test]
fn a_thousand_one_millisecond_invocations() {
    let profiler = Profiler::new(RewriteConfig::default());
    let compute = profiler.registry().assign(key("compute"));

    let mut now = 0;
    for _ in 0..1000 {
        profiler.enter(compute, now);
        now += MS;
        profiler.exit(compute, now);
    }

    let m = profiler.measurements();
    let rec = &m.iter().find(|e| e.key.name == "compute").unwrap().record;
    assert_eq!(rec.count, 1000);
    assert_eq!(rec.self_ns, 1000 * MS);
    assert_eq!(rec.total_ns, 1000 * MS);
}

#[test]
fn reset_zeroes_counters_but_keeps_ids() {
    let profiler = Profiler::new(RewriteConfig::default());
    let id = profiler.registry().assign(key("compute"));
    profiler.enter(id, 0);
    profiler.exit(id, MS);
    assert_eq!(profiler.measurements().len(), 1);

    profiler.reset_measurements();
    assert!(profiler.measurements().is_empty());
    // the id mapping survives so later probes still resolve
    assert_eq!(profiler.registry().key_of(id).unwrap().name, "compute");
}

#[test]
fn unmatched_exit_is_ignored() {
    let store = MeasurementStore::new();
    store.exit(7, MS);
    assert!(store.record(7).is_none() || store.record(7).unwrap().count == 0);
}
