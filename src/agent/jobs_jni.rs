//! JNI-reflection adapter for Eclipse-style job managers.
//!
//! Support is probed at runtime: if the job manager class is not on the
//! target's classpath the adapter reports unsupported and every query
//! degrades to empty data. All lookups go through JNI reflection, so a
//! missing method on an unexpected framework version degrades the same
//! way instead of failing the dump.

use std::collections::HashMap;
use std::ptr;

use log::debug;

use crate::ffi::jni::{jobject, jvalue};
use crate::monitor::jobs::{
    unique_job_name, JobManagerAdapter, JobSnapshot, JobState, LockGraph,
};

use super::{c_name, Jni, VmHandle};

const JOB_MANAGER_CLASS: &[u8] = b"org/eclipse/core/internal/jobs/JobManager\0";

pub struct JniJobManager {
    vm: VmHandle,
}

impl JniJobManager {
    pub(crate) fn new(vm: VmHandle) -> Self {
        Self { vm }
    }

    fn with_env<T>(&self, f: impl FnOnce(&Jni) -> Option<T>) -> Option<T> {
        let env = self.vm.jni_env().ok()?;
        let jni = unsafe { Jni::from_raw(env) };
        f(&jni)
    }

    /// All jobs known to the manager, via `JobManager.getInstance().find(null)`.
    fn collect_jobs(&self, jni: &Jni) -> Option<Vec<JobSnapshot>> {
        let manager_class = jni.find_class(c_name(JOB_MANAGER_CLASS))?;
        let get_instance = jni.get_static_method(
            manager_class,
            c_name(b"getInstance\0"),
            c_name(b"()Lorg/eclipse/core/internal/jobs/JobManager;\0"),
        )?;
        let manager = jni.call_static_object(manager_class, get_instance, &[])?;
        let find = jni.get_method(
            manager_class,
            c_name(b"find\0"),
            c_name(b"(Ljava/lang/Object;)[Lorg/eclipse/core/runtime/jobs/Job;\0"),
        )?;
        let all = [jvalue { l: ptr::null_mut() }];
        let jobs_array = jni.call_object(manager, find, &all)?;

        let mut jobs = Vec::new();
        let mut number = 0u64;
        for i in 0..jni.array_len(jobs_array) {
            let Some(job) = jni.array_element(jobs_array, i) else { continue };
            if let Some(snapshot) = self.snapshot_job(jni, job, &mut number) {
                jobs.push(snapshot);
            }
            jni.delete_local(job);
        }
        jni.delete_local(jobs_array);
        jni.delete_local(manager);
        jni.delete_local(manager_class);
        Some(jobs)
    }

    fn snapshot_job(&self, jni: &Jni, job: jobject, number: &mut u64) -> Option<JobSnapshot> {
        let class = jni.get_object_class(job)?;

        let name = self
            .string_property(jni, job, class, b"getName\0", b"()Ljava/lang/String;\0")
            .unwrap_or_else(|| "<unnamed>".to_string());
        *number += 1;

        let state = jni
            .get_method(class, c_name(b"getState\0"), c_name(b"()I\0"))
            .and_then(|m| jni.call_int(job, m, &[]))
            .map(JobState::from_code)
            .unwrap_or(JobState::None);

        // protected on InternalJob; JNI method lookup ignores access
        let canceled = jni
            .get_method(class, c_name(b"isCanceled\0"), c_name(b"()Z\0"))
            .and_then(|m| jni.call_bool(job, m, &[]))
            .unwrap_or(false);

        let thread = jni
            .get_method(class, c_name(b"getThread\0"), c_name(b"()Ljava/lang/Thread;\0"))
            .and_then(|m| jni.call_object(job, m, &[]))
            .and_then(|t| {
                let out = self.object_to_string(jni, t, b"getName\0");
                jni.delete_local(t);
                out
            });

        let scheduling_rule = jni
            .get_method(
                class,
                c_name(b"getRule\0"),
                c_name(b"()Lorg/eclipse/core/runtime/jobs/ISchedulingRule;\0"),
            )
            .and_then(|m| jni.call_object(job, m, &[]))
            .and_then(|r| {
                let out = self.object_to_string(jni, r, b"toString\0");
                jni.delete_local(r);
                out
            });

        let class_name = self.class_display_name(jni, class);
        jni.delete_local(class);

        Some(JobSnapshot {
            name: unique_job_name(&name, *number),
            class_name,
            state,
            canceled,
            thread,
            scheduling_rule,
        })
    }

    fn string_property(
        &self,
        jni: &Jni,
        obj: jobject,
        class: jobject,
        method: &'static [u8],
        sig: &'static [u8],
    ) -> Option<String> {
        let m = jni.get_method(class, c_name(method), c_name(sig))?;
        let s = jni.call_object(obj, m, &[])?;
        let out = jni.get_string(s);
        jni.delete_local(s);
        out
    }

    /// Calls a no-arg `()Ljava/lang/String;` method on `obj`.
    fn object_to_string(&self, jni: &Jni, obj: jobject, method: &'static [u8]) -> Option<String> {
        let class = jni.get_object_class(obj)?;
        let out = self.string_property(jni, obj, class, method, b"()Ljava/lang/String;\0");
        jni.delete_local(class);
        out
    }

    /// `getClass().getName()` for the snapshot's class name field.
    fn class_display_name(&self, jni: &Jni, class: jobject) -> String {
        self.object_to_string(jni, class, b"getName\0")
            .unwrap_or_default()
    }
}

impl JobManagerAdapter for JniJobManager {
    fn is_supported(&self) -> bool {
        self.with_env(|jni| {
            let class = jni.find_class(c_name(JOB_MANAGER_CLASS))?;
            jni.delete_local(class);
            Some(())
        })
        .is_some()
    }

    fn jobs(&self) -> Vec<JobSnapshot> {
        self.with_env(|jni| self.collect_jobs(jni)).unwrap_or_else(|| {
            debug!("job manager not reachable; returning no jobs");
            Vec::new()
        })
    }

    /// Hold/wait matrix over scheduling rules, derived from the job list:
    /// a running job's thread holds its rule, a waiting job's thread
    /// waits for it.
    fn lock_graph(&self) -> LockGraph {
        let jobs = self.jobs();

        let mut threads = Vec::new();
        let mut resources = Vec::new();
        let mut thread_index = HashMap::new();
        let mut resource_index = HashMap::new();
        let mut edges = Vec::new();

        for job in &jobs {
            let (Some(thread), Some(rule)) = (&job.thread, &job.scheduling_rule) else {
                continue;
            };
            let t = *thread_index.entry(thread.clone()).or_insert_with(|| {
                threads.push(thread.clone());
                threads.len() - 1
            });
            let r = *resource_index.entry(rule.clone()).or_insert_with(|| {
                resources.push(rule.clone());
                resources.len() - 1
            });
            let cell = match job.state {
                JobState::Running => 1,
                JobState::Waiting => -1,
                _ => 0,
            };
            edges.push((t, r, cell));
        }

        let mut cells = vec![vec![0; resources.len()]; threads.len()];
        for (t, r, cell) in edges {
            if cell != 0 {
                cells[t][r] = cell;
            }
        }
        LockGraph::validated(threads, resources, cells)
    }
}
