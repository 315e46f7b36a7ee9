//! Measurement store and the probe hot path.
//!
//! Counters live in a sharded map keyed by probe id, each record holding
//! plain atomics, so concurrent probes from different threads never take a
//! common lock. The per-thread call stack is a thread local; probes receive
//! the current monotonic timestamp from the caller, which lets tests drive
//! a virtual clock through the exact same code path.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct MethodMetrics {
    count: AtomicU64,
    self_ns: AtomicU64,
    total_ns: AtomicU64,
    /// Time inside `Object.wait` / `Thread.sleep` while this method was on
    /// top of the stack.
    pause_ns: AtomicU64,
    /// Time blocked entering a monitor.
    block_ns: AtomicU64,
}

/// Point-in-time copy of one method's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub count: u64,
    pub self_ns: u64,
    pub total_ns: u64,
    pub pause_ns: u64,
    pub block_ns: u64,
}

struct CallFrame {
    id: u32,
    start_ns: u64,
    callee_ns: u64,
    pause_start: Option<u64>,
}

thread_local! {
    static CALL_STACK: RefCell<Vec<CallFrame>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug, Default)]
pub struct MeasurementStore {
    records: DashMap<u32, MethodMetrics>,
}

impl MeasurementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self, id: u32, now_ns: u64) {
        CALL_STACK.with(|stack| {
            stack.borrow_mut().push(CallFrame {
                id,
                start_ns: now_ns,
                callee_ns: 0,
                pause_start: None,
            });
        });
    }

    pub fn exit(&self, id: u32, now_ns: u64) {
        let frame = CALL_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            // The exceptional-exit probe fires once per instrumented frame,
            // so entries and exits pair up; frames above a mismatched id can
            // only come from a probe lost to an unloaded class. Drop them.
            while let Some(frame) = stack.pop() {
                if frame.id == id {
                    return Some(frame);
                }
            }
            None
        });
        let Some(frame) = frame else { return };

        let elapsed = now_ns.saturating_sub(frame.start_ns);
        let self_ns = elapsed.saturating_sub(frame.callee_ns);

        let rec = self.records.entry(id).or_default();
        rec.count.fetch_add(1, Ordering::Relaxed);
        rec.self_ns.fetch_add(self_ns, Ordering::Relaxed);
        rec.total_ns.fetch_add(elapsed, Ordering::Relaxed);
        drop(rec);

        CALL_STACK.with(|stack| {
            if let Some(parent) = stack.borrow_mut().last_mut() {
                parent.callee_ns += elapsed;
            }
        });
    }

    pub fn pause_enter(&self, _id: u32, now_ns: u64) {
        CALL_STACK.with(|stack| {
            if let Some(top) = stack.borrow_mut().last_mut() {
                top.pause_start = Some(now_ns);
            }
        });
    }

    pub fn pause_exit(&self, id: u32, now_ns: u64) {
        let paused = CALL_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let top = stack.last_mut()?;
            let start = top.pause_start.take()?;
            Some(now_ns.saturating_sub(start))
        });
        if let Some(paused) = paused {
            self.records
                .entry(id)
                .or_default()
                .pause_ns
                .fetch_add(paused, Ordering::Relaxed);
        }
    }

    pub fn lock_enter(&self, id: u32, now_ns: u64) {
        self.pause_enter(id, now_ns);
    }

    pub fn lock_exit(&self, id: u32, now_ns: u64) {
        let blocked = CALL_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let top = stack.last_mut()?;
            let start = top.pause_start.take()?;
            Some(now_ns.saturating_sub(start))
        });
        if let Some(blocked) = blocked {
            self.records
                .entry(id)
                .or_default()
                .block_ns
                .fetch_add(blocked, Ordering::Relaxed);
        }
    }

    pub fn record(&self, id: u32) -> Option<MeasurementRecord> {
        self.records.get(&id).map(|m| m.snapshot())
    }

    /// Snapshot of every record. Each counter is an independent relaxed
    /// load; a probe racing the snapshot may be half-visible, which is fine
    /// for monitoring output.
    pub fn snapshot(&self) -> Vec<(u32, MeasurementRecord)> {
        let mut out: Vec<_> = self
            .records
            .iter()
            .map(|e| (*e.key(), e.value().snapshot()))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    pub fn reset(&self) {
        self.records.clear();
    }

    /// Drops the records of the given probe ids, used when one class is
    /// retransformed without disturbing the rest.
    pub fn reset_ids(&self, ids: &[u32]) {
        for id in ids {
            self.records.remove(id);
        }
    }
}

impl MethodMetrics {
    fn snapshot(&self) -> MeasurementRecord {
        MeasurementRecord {
            count: self.count.load(Ordering::Relaxed),
            self_ns: self.self_ns.load(Ordering::Relaxed),
            total_ns: self.total_ns.load(Ordering::Relaxed),
            pause_ns: self.pause_ns.load(Ordering::Relaxed),
            block_ns: self.block_ns.load(Ordering::Relaxed),
        }
    }
}
