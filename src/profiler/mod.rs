//! Instrumentation controller.
//!
//! Owns the filter configuration, the probe id registry and the
//! measurement store, and drives the rewriter from the class load hook.
//! The filter is swapped copy-on-write: the transformer grabs an `Arc`
//! per class and never blocks a concurrent reconfiguration.

pub mod filter;
pub mod registry;
pub mod store;

use std::sync::Arc;

use log::{info, warn};
use parking_lot::RwLock;
use serde::Serialize;

use crate::error::ConfigError;
use crate::rewriter::{self, RewriteConfig};

use filter::FilterConfig;
use registry::{ClassState, MethodKey, MethodRegistry};
use store::{MeasurementRecord, MeasurementStore};

/// One row of the measurement snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct MeasurementEntry {
    pub key: MethodKey,
    pub record: MeasurementRecord,
}

#[derive(Debug, Default)]
pub struct Profiler {
    filter: RwLock<Arc<FilterConfig>>,
    registry: MethodRegistry,
    store: MeasurementStore,
    rewrite: RewriteConfig,
}

impl Profiler {
    pub fn new(rewrite: RewriteConfig) -> Self {
        Self {
            filter: RwLock::new(Arc::new(FilterConfig::default())),
            registry: MethodRegistry::new(),
            store: MeasurementStore::new(),
            rewrite,
        }
    }

    /// Validates and installs a new filter. Only affects classes
    /// transformed after the swap; callers retransform explicitly.
    pub fn configure_filter<I, S>(&self, includes: I, excludes: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let new = Arc::new(FilterConfig::new(includes, excludes)?);
        *self.filter.write() = new;
        Ok(())
    }

    pub fn filter(&self) -> Arc<FilterConfig> {
        self.filter.read().clone()
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    pub fn store(&self) -> &MeasurementStore {
        &self.store
    }

    /// Class load hook entry. Returns replacement bytes, or `None` to keep
    /// the original class. A class already instrumented or skipped is left
    /// alone until `mark_for_retransform` clears its state.
    pub fn transform(&self, class_name: &str, bytes: &[u8]) -> Option<Vec<u8>> {
        match self.registry.class_state(class_name) {
            Some(ClassState::Instrumented) | Some(ClassState::Skipped) => return None,
            _ => {}
        }
        self.registry.set_class_state(class_name, ClassState::Transforming);
        let filter = self.filter();
        match rewriter::rewrite_class(bytes, &filter, &self.registry, &self.rewrite) {
            Ok(Some(out)) => {
                self.registry.set_class_state(class_name, ClassState::Instrumented);
                Some(out)
            }
            Ok(None) => {
                self.registry.set_class_state(class_name, ClassState::Skipped);
                None
            }
            Err(e) => {
                warn!("instrumentation of {class_name} failed: {e}");
                self.registry.set_class_state(class_name, ClassState::Skipped);
                None
            }
        }
    }

    /// Clears one class's state and its records ahead of a retransform,
    /// so stale counts never survive a re-instrumentation.
    pub fn mark_for_retransform(&self, class_name: &str) {
        let ids = self.registry.ids_for_class(class_name);
        self.store.reset_ids(&ids);
        self.registry.clear_class_state(class_name);
        info!("cleared instrumentation state of {class_name}");
    }

    pub fn class_state(&self, class_name: &str) -> Option<ClassState> {
        self.registry.class_state(class_name)
    }

    /// Point-in-time snapshot ordered by method key.
    pub fn measurements(&self) -> Vec<MeasurementEntry> {
        let mut out: Vec<MeasurementEntry> = self
            .store
            .snapshot()
            .into_iter()
            .filter_map(|(id, record)| {
                self.registry
                    .key_of(id)
                    .map(|key| MeasurementEntry { key, record })
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    /// Zeroes every counter; instrumentation state is untouched.
    pub fn reset_measurements(&self) {
        self.store.reset();
    }

    // Probe entry points. `now_ns` comes from the caller so the hot path
    // stays clock-agnostic.

    pub fn enter(&self, id: u32, now_ns: u64) {
        self.store.enter(id, now_ns);
    }

    pub fn exit(&self, id: u32, now_ns: u64) {
        self.store.exit(id, now_ns);
    }

    pub fn pause_enter(&self, id: u32, now_ns: u64) {
        self.store.pause_enter(id, now_ns);
    }

    pub fn pause_exit(&self, id: u32, now_ns: u64) {
        self.store.pause_exit(id, now_ns);
    }

    pub fn lock_enter(&self, id: u32, now_ns: u64) {
        self.store.lock_enter(id, now_ns);
    }

    pub fn lock_exit(&self, id: u32, now_ns: u64) {
        self.store.lock_exit(id, now_ns);
    }
}
