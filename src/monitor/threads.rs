//! Thread snapshots and deadlock detection.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::control::Bean;
use crate::error::ControlError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadState {
    New,
    Runnable,
    Blocked,
    Waiting,
    TimedWaiting,
    Terminated,
}

/// Point-in-time view of one thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    pub name: String,
    pub state: ThreadState,
    pub blocked_count: u64,
    pub blocked_time_ms: i64,
    pub waited_count: u64,
    pub waited_time_ms: i64,
    /// Monitor or synchronizer the thread is waiting on.
    pub lock_name: Option<String>,
    /// Name of the thread holding that lock.
    pub lock_owner: Option<String>,
    pub suspended: bool,
    /// Set by [`detect_deadlocks`]; never reported by the VM directly.
    pub deadlocked: bool,
    pub cpu_percent: f64,
    pub stack: Vec<String>,
    /// Scheduling rule the thread waits for, when a job framework adapter
    /// supplies one.
    pub rule_waiting: Option<String>,
    pub rules_held: Vec<String>,
}

impl ThreadSnapshot {
    pub fn new(name: impl Into<String>, state: ThreadState) -> Self {
        Self {
            name: name.into(),
            state,
            blocked_count: 0,
            blocked_time_ms: -1,
            waited_count: 0,
            waited_time_ms: -1,
            lock_name: None,
            lock_owner: None,
            suspended: false,
            deadlocked: false,
            cpu_percent: 0.0,
            stack: Vec::new(),
            rule_waiting: None,
            rules_held: Vec::new(),
        }
    }
}

/// Marks every member of a mutual-wait cycle as deadlocked and returns the
/// cycles found. Pure: works only on the snapshot's lock_name/lock_owner
/// edges, so the same input always yields the same verdict.
pub fn detect_deadlocks(threads: &mut [ThreadSnapshot]) -> Vec<Vec<String>> {
    let index: HashMap<&str, usize> = threads
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.as_str(), i))
        .collect();
    // waits_on[i] = index of the thread that holds what i waits for
    let waits_on: Vec<Option<usize>> = threads
        .iter()
        .map(|t| {
            t.lock_owner
                .as_deref()
                .and_then(|owner| index.get(owner).copied())
        })
        .collect();

    let mut cycles = Vec::new();
    let mut in_cycle = vec![false; threads.len()];
    for start in 0..threads.len() {
        // follow the wait chain; a repeat inside the current path is a cycle
        let mut path = Vec::new();
        let mut seen = vec![false; threads.len()];
        let mut cur = start;
        loop {
            if in_cycle[cur] {
                break;
            }
            if seen[cur] {
                let from = path.iter().position(|&p| p == cur).unwrap_or(0);
                let cycle: Vec<usize> = path[from..].to_vec();
                for &i in &cycle {
                    in_cycle[i] = true;
                }
                cycles.push(cycle.iter().map(|&i| threads[i].name.clone()).collect());
                break;
            }
            seen[cur] = true;
            path.push(cur);
            match waits_on[cur] {
                Some(next) => cur = next,
                None => break,
            }
        }
    }
    for (i, t) in threads.iter_mut().enumerate() {
        if in_cycle[i] {
            t.deadlocked = true;
        }
    }
    cycles
}

/// Derives per-thread CPU percentages from successive cumulative CPU time
/// samples. The first sample of a thread reports 0.
#[derive(Debug, Default)]
pub struct CpuUsageTracker {
    last: HashMap<i64, (u64, u64)>,
}

impl CpuUsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn percent(&mut self, thread_id: i64, cpu_ns: u64, now_ns: u64) -> f64 {
        let prev = self.last.insert(thread_id, (cpu_ns, now_ns));
        match prev {
            Some((prev_cpu, prev_now)) if now_ns > prev_now => {
                let used = cpu_ns.saturating_sub(prev_cpu) as f64;
                let wall = (now_ns - prev_now) as f64;
                (used / wall * 100.0).min(100.0)
            }
            _ => 0.0,
        }
    }

    pub fn forget(&mut self, thread_id: i64) {
        self.last.remove(&thread_id);
    }
}

/// Whatever can produce a thread dump; the agent backs this with JVMTI,
/// tests with canned snapshots.
pub trait ThreadDumpSource: Send + Sync {
    fn dump(&self) -> Vec<ThreadSnapshot>;
}

/// Control-protocol surface over a dump source. Deadlock marking happens
/// here so every consumer sees the same verdict.
pub struct ThreadingBean {
    source: Arc<dyn ThreadDumpSource>,
}

impl ThreadingBean {
    pub fn new(source: Arc<dyn ThreadDumpSource>) -> Self {
        Self { source }
    }
}

impl Bean for ThreadingBean {
    fn invoke(&self, operation: &str, _args: &[String]) -> Result<Value, ControlError> {
        match operation {
            "dump" => {
                let mut threads = self.source.dump();
                detect_deadlocks(&mut threads);
                Ok(serde_json::to_value(threads)?)
            }
            other => Err(ControlError::UnknownOperation {
                bean: "Threading".to_string(),
                operation: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked(name: &str, lock: &str, owner: &str) -> ThreadSnapshot {
        let mut t = ThreadSnapshot::new(name, ThreadState::Blocked);
        t.lock_name = Some(lock.to_string());
        t.lock_owner = Some(owner.to_string());
        t
    }

    #[test]
    fn mutual_wait_is_a_deadlock() {
        let mut threads = vec![
            blocked("T1", "lockB", "T2"),
            blocked("T2", "lockA", "T1"),
            ThreadSnapshot::new("main", ThreadState::Runnable),
        ];
        let cycles = detect_deadlocks(&mut threads);
        assert_eq!(cycles.len(), 1);
        assert!(threads[0].deadlocked);
        assert!(threads[1].deadlocked);
        assert!(!threads[2].deadlocked);
    }

    #[test]
    fn three_way_cycle() {
        let mut threads = vec![
            blocked("A", "l1", "B"),
            blocked("B", "l2", "C"),
            blocked("C", "l3", "A"),
        ];
        detect_deadlocks(&mut threads);
        assert!(threads.iter().all(|t| t.deadlocked));
    }

    #[test]
    fn chain_without_cycle_is_clean() {
        let mut threads = vec![
            blocked("A", "l1", "B"),
            blocked("B", "l2", "C"),
            ThreadSnapshot::new("C", ThreadState::Runnable),
        ];
        let cycles = detect_deadlocks(&mut threads);
        assert!(cycles.is_empty());
        assert!(threads.iter().all(|t| !t.deadlocked));
    }

    #[test]
    fn waiting_on_unknown_owner_is_ignored() {
        let mut threads = vec![blocked("A", "l1", "gone")];
        assert!(detect_deadlocks(&mut threads).is_empty());
        assert!(!threads[0].deadlocked);
    }

    #[test]
    fn cpu_percent_needs_two_samples() {
        let mut tracker = CpuUsageTracker::new();
        assert_eq!(tracker.percent(1, 1_000, 1_000_000), 0.0);
        // 50ms cpu over 100ms wall
        let pct = tracker.percent(1, 50_001_000, 101_000_000);
        assert!((pct - 50.0).abs() < 0.1, "{pct}");
    }
}
