//! Probe id registry.
//!
//! Instrumented methods are identified at runtime by a dense `u32` handed
//! to the probe as an `ldc` constant. The registry owns the bidirectional
//! mapping plus the per-class instrumentation state machine.

use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Identity of one method: class and method in internal form plus the full
/// descriptor, so overloads stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodKey {
    pub class: String,
    pub name: String,
    pub descriptor: String,
}

impl MethodKey {
    /// `com/example/Foo.bar(I)V` form used in logs and dumps.
    pub fn qualified(&self) -> String {
        format!("{}.{}{}", self.class, self.name, self.descriptor)
    }
}

/// Per-class instrumentation state. Absence means the class has not been
/// seen yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClassState {
    Transforming,
    Instrumented,
    Skipped,
}

#[derive(Debug, Default)]
pub struct MethodRegistry {
    ids: DashMap<MethodKey, u32>,
    keys: DashMap<u32, MethodKey>,
    states: DashMap<String, ClassState>,
    next_id: AtomicU32,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for `key`, assigning the next free one on first use.
    /// Re-registration after a retransform yields the same id.
    pub fn assign(&self, key: MethodKey) -> u32 {
        if let Some(id) = self.ids.get(&key) {
            return *id;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.keys.insert(id, key.clone());
        // A racing assign for the same key can allocate twice; the entry
        // that lands in `ids` wins and the loser id stays unreferenced.
        *self.ids.entry(key).or_insert(id)
    }

    pub fn key_of(&self, id: u32) -> Option<MethodKey> {
        self.keys.get(&id).map(|k| k.clone())
    }

    pub fn ids_for_class(&self, class: &str) -> Vec<u32> {
        self.ids
            .iter()
            .filter(|e| e.key().class == class)
            .map(|e| *e.value())
            .collect()
    }

    pub fn class_state(&self, class: &str) -> Option<ClassState> {
        self.states.get(class).map(|s| *s)
    }

    pub fn set_class_state(&self, class: &str, state: ClassState) {
        self.states.insert(class.to_string(), state);
    }

    /// Forgets the class's state so the next load hook runs the rewriter
    /// again. Ids stay assigned.
    pub fn clear_class_state(&self, class: &str) {
        self.states.remove(class);
    }

    pub fn instrumented_classes(&self) -> Vec<String> {
        self.states
            .iter()
            .filter(|e| *e.value() == ClassState::Instrumented)
            .map(|e| e.key().clone())
            .collect()
    }
}
