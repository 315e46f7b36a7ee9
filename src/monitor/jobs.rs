//! Background-job framework monitoring.
//!
//! Frameworks with their own scheduling layer (an Eclipse-style job
//! manager) expose job states and a scheduling-rule lock graph. Support is
//! probed at runtime through [`JobManagerAdapter::is_supported`]; a target
//! without the framework degrades to the null adapter instead of erroring.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::control::Bean;
use crate::error::ControlError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    None,
    Sleeping,
    Waiting,
    Running,
}

impl JobState {
    /// Job manager state codes: 1 sleeping, 2 waiting, 4 running.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => JobState::Sleeping,
            2 => JobState::Waiting,
            4 => JobState::Running,
            _ => JobState::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Display name, made unique with a sequence number: `build (3)`.
    pub name: String,
    pub class_name: String,
    pub state: JobState,
    pub canceled: bool,
    /// Thread currently running the job, if any.
    pub thread: Option<String>,
    pub scheduling_rule: Option<String>,
}

/// `name (number)` keeps two jobs with the same label apart in dumps.
pub fn unique_job_name(name: &str, number: u64) -> String {
    format!("{name} ({number})")
}

/// Which thread holds or waits for which scheduling rule.
///
/// Rows are threads, columns are resources; a positive cell is a hold
/// count, -1 means the thread is waiting for the resource, 0 means no
/// relation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LockGraph {
    pub threads: Vec<String>,
    pub resources: Vec<String>,
    pub cells: Vec<Vec<i32>>,
}

impl LockGraph {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a graph only when the matrix dimensions agree with the name
    /// lists; anything inconsistent is replaced by the empty graph, so a
    /// consumer never indexes out of bounds on a half-read snapshot.
    pub fn validated(threads: Vec<String>, resources: Vec<String>, cells: Vec<Vec<i32>>) -> Self {
        let consistent = cells.len() == threads.len()
            && cells.iter().all(|row| row.len() == resources.len());
        if consistent {
            Self { threads, resources, cells }
        } else {
            Self::empty()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Threads trapped in a hold-wait cycle over scheduling rules.
    ///
    /// Edges: a waiting thread points at the resource, a held resource
    /// points back at its holder. Any cycle means every thread on it is
    /// deadlocked.
    pub fn deadlocked_threads(&self) -> Vec<String> {
        let mut holder_of = vec![None; self.resources.len()];
        for (t, row) in self.cells.iter().enumerate() {
            for (r, &cell) in row.iter().enumerate() {
                if cell > 0 {
                    holder_of[r] = Some(t);
                }
            }
        }
        // waits_on[t] = thread holding the resource t waits for
        let waits_on: Vec<Option<usize>> = self
            .cells
            .iter()
            .map(|row| {
                row.iter()
                    .position(|&c| c == -1)
                    .and_then(|r| holder_of[r])
            })
            .collect();

        let mut deadlocked = vec![false; self.threads.len()];
        for start in 0..self.threads.len() {
            let mut seen = vec![false; self.threads.len()];
            let mut path = Vec::new();
            let mut cur = start;
            loop {
                if deadlocked[cur] {
                    break;
                }
                if seen[cur] {
                    let from = path.iter().position(|&p| p == cur).unwrap_or(0);
                    for &i in &path[from..] {
                        deadlocked[i] = true;
                    }
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
        self.threads
            .iter()
            .zip(&deadlocked)
            .filter(|(_, &d)| d)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Seam to the target's job framework. The agent provides a JNI-backed
/// implementation; targets without the framework get [`NullJobManager`].
pub trait JobManagerAdapter: Send + Sync {
    fn is_supported(&self) -> bool;
    fn jobs(&self) -> Vec<JobSnapshot>;
    fn lock_graph(&self) -> LockGraph;
}

/// Degraded mode: no framework, no data, never an error.
#[derive(Debug, Default)]
pub struct NullJobManager;

impl JobManagerAdapter for NullJobManager {
    fn is_supported(&self) -> bool {
        false
    }

    fn jobs(&self) -> Vec<JobSnapshot> {
        Vec::new()
    }

    fn lock_graph(&self) -> LockGraph {
        LockGraph::empty()
    }
}

pub struct JobManagerBean {
    adapter: Arc<dyn JobManagerAdapter>,
}

impl JobManagerBean {
    pub fn new(adapter: Arc<dyn JobManagerAdapter>) -> Self {
        Self { adapter }
    }
}

impl Bean for JobManagerBean {
    fn invoke(&self, operation: &str, _args: &[String]) -> Result<Value, ControlError> {
        match operation {
            "isSupported" => Ok(Value::Bool(self.adapter.is_supported())),
            "getJobs" => Ok(serde_json::to_value(self.adapter.jobs())?),
            "getSchedulingRule" => Ok(serde_json::to_value(self.adapter.lock_graph())?),
            other => Err(ControlError::UnknownOperation {
                bean: "JobManager".to_string(),
                operation: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_codes_map() {
        assert_eq!(JobState::from_code(1), JobState::Sleeping);
        assert_eq!(JobState::from_code(2), JobState::Waiting);
        assert_eq!(JobState::from_code(4), JobState::Running);
        assert_eq!(JobState::from_code(0), JobState::None);
        assert_eq!(JobState::from_code(99), JobState::None);
    }

    #[test]
    fn mismatched_dimensions_yield_empty_graph() {
        let g = LockGraph::validated(
            vec!["T1".into(), "T2".into()],
            vec!["R1".into()],
            vec![vec![1]], // only one row for two threads
        );
        assert!(g.is_empty());

        let g = LockGraph::validated(
            vec!["T1".into()],
            vec!["R1".into(), "R2".into()],
            vec![vec![1]], // row too short
        );
        assert!(g.is_empty());
    }

    #[test]
    fn consistent_graph_is_kept() {
        let g = LockGraph::validated(
            vec!["T1".into()],
            vec!["R1".into(), "R2".into()],
            vec![vec![1, -1]],
        );
        assert!(!g.is_empty());
        assert_eq!(g.cells[0], vec![1, -1]);
    }

    #[test]
    fn hold_wait_cycle_is_detected() {
        // T1 holds R1 waits R2; T2 holds R2 waits R1
        let g = LockGraph::validated(
            vec!["T1".into(), "T2".into()],
            vec!["R1".into(), "R2".into()],
            vec![vec![1, -1], vec![-1, 2]],
        );
        let mut dead = g.deadlocked_threads();
        dead.sort();
        assert_eq!(dead, vec!["T1".to_string(), "T2".to_string()]);
    }

    #[test]
    fn plain_contention_is_not_a_deadlock() {
        // T2 waits for R1 held by T1, which waits for nothing
        let g = LockGraph::validated(
            vec!["T1".into(), "T2".into()],
            vec!["R1".into()],
            vec![vec![1], vec![-1]],
        );
        assert!(g.deadlocked_threads().is_empty());
    }

    #[test]
    fn null_adapter_degrades() {
        let a = NullJobManager;
        assert!(!a.is_supported());
        assert!(a.jobs().is_empty());
        assert!(a.lock_graph().is_empty());
    }
}
