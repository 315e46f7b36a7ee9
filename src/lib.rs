//! # jvmmon
//!
//! In-process JVM profiling and monitoring without restarting the target.
//!
//! The crate builds two ways:
//!
//! - as a `cdylib`, the JVM TI agent injected into a running JVM through
//!   the attach mechanism. It instruments selected methods at class load
//!   with entry/exit/pause/lock probes, collects self/total/pause/block
//!   times per method, and serves the results over a unix-socket control
//!   protocol;
//! - as an `rlib`, the out-of-process side: JVM discovery, the attach
//!   protocol client, agent injection, the control protocol client and
//!   the monitoring data model (thread dumps, deadlock detection, job
//!   states).
//!
//! The `jvmmon-load` and `jvmmon-invoke` binaries are thin command-line
//! frontends over [`attach`] and [`control`].
//!
//! ## Instrumentation pipeline
//!
//! [`profiler::Profiler`] owns the include/exclude
//! [`profiler::filter::FilterConfig`], the method-id
//! [`profiler::registry::MethodRegistry`] and the
//! [`profiler::store::MeasurementStore`]. The class-file-load hook feeds
//! every loaded class through [`profiler::Profiler::transform`], which
//! parses it with [`classfile`], rewrites matching methods with
//! [`rewriter::rewrite_class`] and hands the new bytes back to the VM.
//! Probes land in `jvmmon/runtime/Probe`, a class the agent synthesizes
//! and binds at `VMInit`.

pub mod attach;
pub mod classfile;
pub mod control;
pub mod descriptor;
pub mod error;
pub mod monitor;
pub mod profiler;
pub mod rewriter;

pub mod ffi;

#[cfg(unix)]
pub mod agent;

pub use error::{
    AgentError, AttachError, ClassFileError, ConfigError, ControlError, DescriptorError,
    MonitorError, RewriteError,
};
