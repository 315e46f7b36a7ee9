//! Out-of-process monitoring: active JVM tracking, thread and job
//! snapshots, and the polling machinery that keeps them fresh.
//!
//! State lives in an explicitly constructed [`MonitoringContext`] owned by
//! the embedding tool; there is no process-global model.

pub mod jobs;
pub mod sched;
pub mod threads;

use parking_lot::RwLock;
use serde::Serialize;

use crate::attach::{self, JvmProcess};

/// A JVM currently visible on this host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveJvm {
    pub pid: i32,
    pub display: String,
}

/// What changed during one refresh.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RefreshDelta {
    pub added: Vec<i32>,
    pub removed: Vec<i32>,
}

#[derive(Debug, Default)]
pub struct MonitoringContext {
    jvms: RwLock<Vec<ActiveJvm>>,
}

impl MonitoringContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rescans /proc and reconciles the active list.
    pub fn refresh(&self) -> RefreshDelta {
        self.reconcile(attach::list_candidate_processes())
    }

    /// Diff-based update: JVMs keep their identity across refreshes, new
    /// pids are added, vanished pids dropped.
    pub fn reconcile(&self, current: Vec<JvmProcess>) -> RefreshDelta {
        let mut jvms = self.jvms.write();
        let mut delta = RefreshDelta::default();

        jvms.retain(|known| {
            let alive = current.iter().any(|p| p.pid == known.pid);
            if !alive {
                delta.removed.push(known.pid);
            }
            alive
        });
        for p in current {
            if !jvms.iter().any(|known| known.pid == p.pid) {
                delta.added.push(p.pid);
                jvms.push(ActiveJvm { pid: p.pid, display: p.display });
            }
        }
        delta
    }

    pub fn jvms(&self) -> Vec<ActiveJvm> {
        self.jvms.read().clone()
    }

    pub fn clear(&self) {
        self.jvms.write().clear();
    }
}
