//! In-process side: JVM TI entry points, the class-load transformer and
//! the control server that makes the profiler reachable from outside.
//!
//! The JVM calls `Agent_OnLoad` (agentpath on the command line) or
//! `Agent_OnAttach` (dynamic attach). Either way the agent requests its
//! capabilities, installs the class-file-load hook backed by
//! [`Profiler::transform`], and once the VM is live defines the probe
//! class and starts the control server.

pub mod jobs_jni;
pub mod probe;

use std::collections::hash_map::DefaultHasher;
use std::ffi::{c_void, CStr, CString};
use std::hash::{Hash, Hasher};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::slice;
use std::sync::{Arc, OnceLock};

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde_json::Value;

use crate::control::{Bean, ControlServer, Dispatcher, ProfilerBean};
use crate::error::{AgentError, ControlError};
use crate::ffi::jni::{
    jboolean, jclass, jint, jlong, jmethodID, jobject, jstring, jthread, jvalue, JNIEnv,
    JNINativeMethod, JavaVM, JNI_OK, JNI_VERSION_1_8,
};
use crate::ffi::jvmti::{
    jvmtiCapabilities, jvmtiEnv, jvmtiError, jvmtiEventCallbacks, jvmtiFrameInfo,
    jvmtiMonitorUsage, jvmtiThreadInfo, JVMTI_ENABLE, JVMTI_ERROR_NONE,
    JVMTI_EVENT_CLASS_FILE_LOAD_HOOK, JVMTI_EVENT_VM_DEATH, JVMTI_EVENT_VM_INIT,
    JVMTI_THREAD_STATE_ALIVE, JVMTI_THREAD_STATE_BLOCKED_ON_MONITOR_ENTER,
    JVMTI_THREAD_STATE_SLEEPING, JVMTI_THREAD_STATE_SUSPENDED, JVMTI_THREAD_STATE_TERMINATED,
    JVMTI_THREAD_STATE_WAITING, JVMTI_THREAD_STATE_WAITING_WITH_TIMEOUT, JVMTI_VERSION_1_2,
};
use crate::monitor::jobs::JobManagerBean;
use crate::monitor::sched::{Clock, SystemClock};
use crate::monitor::threads::{
    CpuUsageTracker, ThreadDumpSource, ThreadSnapshot, ThreadState, ThreadingBean,
};
use crate::profiler::Profiler;
use crate::rewriter::RewriteConfig;

/// `*mut JavaVM` that can be shared across agent threads. The invocation
/// interface is documented thread-safe; only JNIEnv pointers are
/// per-thread.
#[derive(Clone, Copy)]
pub(crate) struct VmHandle(*mut JavaVM);

unsafe impl Send for VmHandle {}
unsafe impl Sync for VmHandle {}

impl VmHandle {
    /// JNIEnv for the calling thread, attaching it as a daemon if it is
    /// not a Java thread yet.
    pub fn jni_env(&self) -> Result<*mut JNIEnv, AgentError> {
        unsafe {
            let table = &*(*self.0).functions;
            let get_env = table.GetEnv.ok_or(AgentError::MissingSlot("GetEnv"))?;
            let mut env: *mut c_void = ptr::null_mut();
            if get_env(self.0, &mut env, JNI_VERSION_1_8) == JNI_OK {
                return Ok(env as *mut JNIEnv);
            }
            let attach = table
                .AttachCurrentThreadAsDaemon
                .ok_or(AgentError::MissingSlot("AttachCurrentThreadAsDaemon"))?;
            if attach(self.0, &mut env, ptr::null_mut()) != JNI_OK {
                return Err(AgentError::Jni("AttachCurrentThreadAsDaemon"));
            }
            Ok(env as *mut JNIEnv)
        }
    }
}

macro_rules! jvmti_try {
    ($env:expr, $name:ident ( $($arg:expr),* )) => {{
        let table = &*(*$env).functions;
        let f = table.$name.ok_or(AgentError::MissingSlot(stringify!($name)))?;
        let err: jvmtiError = f($env $(, $arg)*);
        if err != JVMTI_ERROR_NONE {
            return Err(AgentError::Jvmti { func: stringify!($name), code: err });
        }
    }};
}

/// Thin wrapper over a raw `jvmtiEnv`. The environment is process-wide
/// and callable from any attached thread.
#[derive(Clone, Copy)]
pub(crate) struct Jvmti {
    env: *mut jvmtiEnv,
}

unsafe impl Send for Jvmti {}
unsafe impl Sync for Jvmti {}

impl Jvmti {
    /// # Safety
    /// `vm` must be the live invocation interface passed to the agent
    /// entry point.
    pub unsafe fn from_vm(vm: *mut JavaVM) -> Result<Self, AgentError> {
        let table = &*(*vm).functions;
        let get_env = table.GetEnv.ok_or(AgentError::MissingSlot("GetEnv"))?;
        let mut env: *mut c_void = ptr::null_mut();
        if get_env(vm, &mut env, JVMTI_VERSION_1_2) != JNI_OK {
            return Err(AgentError::Jni("GetEnv(JVMTI_VERSION_1_2)"));
        }
        Ok(Self { env: env as *mut jvmtiEnv })
    }

    /// Requests what the profiler and the thread dump need. Class hook
    /// and retransform are mandatory; monitor and CPU introspection are
    /// taken only if the VM offers them.
    pub fn add_profiling_capabilities(&self) -> Result<(), AgentError> {
        unsafe {
            let mut potential = jvmtiCapabilities::new();
            jvmti_try!(self.env, GetPotentialCapabilities(&mut potential));

            let mut caps = jvmtiCapabilities::new();
            caps.set_can_generate_all_class_hook_events(true);
            caps.set_can_retransform_classes(true);
            caps.set_can_get_owned_monitor_info(potential.can_get_owned_monitor_info());
            caps.set_can_get_current_contended_monitor(
                potential.can_get_current_contended_monitor(),
            );
            caps.set_can_get_monitor_info(potential.can_get_monitor_info());
            caps.set_can_get_thread_cpu_time(potential.can_get_thread_cpu_time());
            jvmti_try!(self.env, AddCapabilities(&caps));
        }
        Ok(())
    }

    pub fn set_callbacks(&self, callbacks: &jvmtiEventCallbacks) -> Result<(), AgentError> {
        unsafe {
            let size = std::mem::size_of::<jvmtiEventCallbacks>() as jint;
            jvmti_try!(self.env, SetEventCallbacks(callbacks, size));
        }
        Ok(())
    }

    pub fn enable_event(&self, event: jint) -> Result<(), AgentError> {
        unsafe {
            jvmti_try!(
                self.env,
                SetEventNotificationMode(JVMTI_ENABLE, event, ptr::null_mut())
            );
        }
        Ok(())
    }

    /// Copies `bytes` into JVM TI-allocated memory the VM will own.
    pub fn allocate_copy(&self, bytes: &[u8]) -> Result<*mut u8, AgentError> {
        unsafe {
            let mut mem: *mut u8 = ptr::null_mut();
            jvmti_try!(self.env, Allocate(bytes.len() as jlong, &mut mem));
            ptr::copy_nonoverlapping(bytes.as_ptr(), mem, bytes.len());
            Ok(mem)
        }
    }

    fn deallocate(&self, mem: *mut u8) {
        unsafe {
            if mem.is_null() {
                return;
            }
            if let Some(f) = (*(*self.env).functions).Deallocate {
                f(self.env, mem);
            }
        }
    }

    /// Takes ownership of a JVM TI-allocated C string, if any.
    fn take_string(&self, p: *mut std::os::raw::c_char) -> Option<String> {
        if p.is_null() {
            return None;
        }
        let s = unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned();
        self.deallocate(p as *mut u8);
        Some(s)
    }

    pub fn all_threads(&self) -> Result<Vec<jthread>, AgentError> {
        unsafe {
            let mut count: jint = 0;
            let mut raw: *mut jthread = ptr::null_mut();
            jvmti_try!(self.env, GetAllThreads(&mut count, &mut raw));
            let threads = slice::from_raw_parts(raw, count.max(0) as usize).to_vec();
            self.deallocate(raw as *mut u8);
            Ok(threads)
        }
    }

    pub fn thread_name(&self, thread: jthread) -> Result<String, AgentError> {
        unsafe {
            let mut info = jvmtiThreadInfo {
                name: ptr::null_mut(),
                priority: 0,
                is_daemon: 0,
                thread_group: ptr::null_mut(),
                context_class_loader: ptr::null_mut(),
            };
            jvmti_try!(self.env, GetThreadInfo(thread, &mut info));
            Ok(self.take_string(info.name).unwrap_or_default())
        }
    }

    pub fn thread_state_bits(&self, thread: jthread) -> Result<jint, AgentError> {
        unsafe {
            let mut bits: jint = 0;
            jvmti_try!(self.env, GetThreadState(thread, &mut bits));
            Ok(bits)
        }
    }

    pub fn thread_cpu_ns(&self, thread: jthread) -> Result<i64, AgentError> {
        unsafe {
            let mut nanos: jlong = 0;
            jvmti_try!(self.env, GetThreadCpuTime(thread, &mut nanos));
            Ok(nanos)
        }
    }

    pub fn stack_frames(
        &self,
        thread: jthread,
        max_depth: usize,
    ) -> Result<Vec<jvmtiFrameInfo>, AgentError> {
        unsafe {
            let mut frames = vec![
                jvmtiFrameInfo { method: ptr::null_mut(), location: 0 };
                max_depth
            ];
            let mut count: jint = 0;
            jvmti_try!(
                self.env,
                GetStackTrace(thread, 0, max_depth as jint, frames.as_mut_ptr(), &mut count)
            );
            frames.truncate(count.max(0) as usize);
            Ok(frames)
        }
    }

    /// `pkg.Class.method` display string for one stack frame.
    pub fn method_display(&self, method: jmethodID) -> Result<String, AgentError> {
        unsafe {
            let mut name: *mut std::os::raw::c_char = ptr::null_mut();
            jvmti_try!(
                self.env,
                GetMethodName(method, &mut name, ptr::null_mut(), ptr::null_mut())
            );
            let name = self.take_string(name).unwrap_or_default();

            let mut class: jclass = ptr::null_mut();
            jvmti_try!(self.env, GetMethodDeclaringClass(method, &mut class));
            let owner = self.class_display(class)?;
            Ok(format!("{owner}.{name}"))
        }
    }

    /// `Ljava/lang/Foo;` -> `java.lang.Foo`.
    pub fn class_display(&self, class: jclass) -> Result<String, AgentError> {
        unsafe {
            let mut sig: *mut std::os::raw::c_char = ptr::null_mut();
            jvmti_try!(self.env, GetClassSignature(class, &mut sig, ptr::null_mut()));
            let sig = self.take_string(sig).unwrap_or_default();
            let inner = sig
                .strip_prefix('L')
                .and_then(|s| s.strip_suffix(';'))
                .unwrap_or(&sig);
            Ok(inner.replace('/', "."))
        }
    }

    pub fn contended_monitor(&self, thread: jthread) -> Result<jobject, AgentError> {
        unsafe {
            let mut monitor: jobject = ptr::null_mut();
            jvmti_try!(self.env, GetCurrentContendedMonitor(thread, &mut monitor));
            Ok(monitor)
        }
    }

    pub fn monitor_owner(&self, monitor: jobject) -> Result<jthread, AgentError> {
        unsafe {
            let mut usage = jvmtiMonitorUsage {
                owner: ptr::null_mut(),
                entry_count: 0,
                waiter_count: 0,
                waiters: ptr::null_mut(),
                notify_waiter_count: 0,
                notify_waiters: ptr::null_mut(),
            };
            jvmti_try!(self.env, GetObjectMonitorUsage(monitor, &mut usage));
            self.deallocate(usage.waiters as *mut u8);
            self.deallocate(usage.notify_waiters as *mut u8);
            Ok(usage.owner)
        }
    }

    pub fn is_modifiable(&self, class: jclass) -> Result<bool, AgentError> {
        unsafe {
            let mut flag: jboolean = 0;
            jvmti_try!(self.env, IsModifiableClass(class, &mut flag));
            Ok(flag != 0)
        }
    }

    pub fn retransform(&self, classes: &[jclass]) -> Result<(), AgentError> {
        if classes.is_empty() {
            return Ok(());
        }
        unsafe {
            jvmti_try!(
                self.env,
                RetransformClasses(classes.len() as jint, classes.as_ptr())
            );
        }
        Ok(())
    }
}

/// Per-thread JNI wrapper. Not `Send`: a JNIEnv is only valid on the
/// thread it was obtained for.
pub(crate) struct Jni {
    env: *mut JNIEnv,
}

impl Jni {
    /// # Safety
    /// `env` must be the current thread's JNIEnv.
    pub unsafe fn from_raw(env: *mut JNIEnv) -> Self {
        Self { env }
    }

    fn table(&self) -> &crate::ffi::jni::JNINativeInterface_ {
        unsafe { &*(*self.env).functions }
    }

    /// Clears and reports any pending exception. JNI leaves the thrown
    /// object pending; everything after a failed call must go through
    /// here before touching JNI again.
    fn clear_exception(&self) -> bool {
        unsafe {
            let pending = match self.table().ExceptionCheck {
                Some(f) => f(self.env) != 0,
                None => false,
            };
            if pending {
                if let Some(f) = self.table().ExceptionClear {
                    f(self.env);
                }
            }
            pending
        }
    }

    pub fn define_class(&self, name: &CStr, bytes: &[u8]) -> Result<jclass, AgentError> {
        unsafe {
            let f = self
                .table()
                .DefineClass
                .ok_or(AgentError::MissingSlot("DefineClass"))?;
            let class = f(
                self.env,
                name.as_ptr(),
                ptr::null_mut(),
                bytes.as_ptr() as *const i8,
                bytes.len() as jint,
            );
            if class.is_null() || self.clear_exception() {
                return Err(AgentError::Jni("DefineClass"));
            }
            Ok(class)
        }
    }

    pub fn find_class(&self, name: &CStr) -> Option<jclass> {
        unsafe {
            let f = self.table().FindClass?;
            let class = f(self.env, name.as_ptr());
            if self.clear_exception() || class.is_null() {
                return None;
            }
            Some(class)
        }
    }

    pub fn register_natives(
        &self,
        class: jclass,
        methods: &[JNINativeMethod],
    ) -> Result<(), AgentError> {
        unsafe {
            let f = self
                .table()
                .RegisterNatives
                .ok_or(AgentError::MissingSlot("RegisterNatives"))?;
            let rc = f(self.env, class, methods.as_ptr(), methods.len() as jint);
            if rc != JNI_OK || self.clear_exception() {
                return Err(AgentError::Jni("RegisterNatives"));
            }
            Ok(())
        }
    }

    pub fn get_method(&self, class: jclass, name: &CStr, sig: &CStr) -> Option<jmethodID> {
        unsafe {
            let f = self.table().GetMethodID?;
            let id = f(self.env, class, name.as_ptr(), sig.as_ptr());
            if self.clear_exception() || id.is_null() {
                return None;
            }
            Some(id)
        }
    }

    pub fn get_static_method(&self, class: jclass, name: &CStr, sig: &CStr) -> Option<jmethodID> {
        unsafe {
            let f = self.table().GetStaticMethodID?;
            let id = f(self.env, class, name.as_ptr(), sig.as_ptr());
            if self.clear_exception() || id.is_null() {
                return None;
            }
            Some(id)
        }
    }

    pub fn call_static_object(
        &self,
        class: jclass,
        method: jmethodID,
        args: &[jvalue],
    ) -> Option<jobject> {
        unsafe {
            let f = self.table().CallStaticObjectMethodA?;
            let out = f(self.env, class, method, args.as_ptr());
            if self.clear_exception() || out.is_null() {
                return None;
            }
            Some(out)
        }
    }

    pub fn call_object(&self, obj: jobject, method: jmethodID, args: &[jvalue]) -> Option<jobject> {
        unsafe {
            let f = self.table().CallObjectMethodA?;
            let out = f(self.env, obj, method, args.as_ptr());
            if self.clear_exception() || out.is_null() {
                return None;
            }
            Some(out)
        }
    }

    pub fn call_int(&self, obj: jobject, method: jmethodID, args: &[jvalue]) -> Option<jint> {
        unsafe {
            let f = self.table().CallIntMethodA?;
            let out = f(self.env, obj, method, args.as_ptr());
            if self.clear_exception() {
                return None;
            }
            Some(out)
        }
    }

    pub fn call_bool(&self, obj: jobject, method: jmethodID, args: &[jvalue]) -> Option<bool> {
        unsafe {
            let f = self.table().CallBooleanMethodA?;
            let out = f(self.env, obj, method, args.as_ptr());
            if self.clear_exception() {
                return None;
            }
            Some(out != 0)
        }
    }

    pub fn get_object_class(&self, obj: jobject) -> Option<jclass> {
        unsafe {
            let f = self.table().GetObjectClass?;
            let class = f(self.env, obj);
            if class.is_null() {
                return None;
            }
            Some(class)
        }
    }

    pub fn new_string(&self, s: &str) -> Option<jstring> {
        let c = CString::new(s).ok()?;
        unsafe {
            let f = self.table().NewStringUTF?;
            let out = f(self.env, c.as_ptr());
            if self.clear_exception() || out.is_null() {
                return None;
            }
            Some(out)
        }
    }

    pub fn get_string(&self, s: jstring) -> Option<String> {
        if s.is_null() {
            return None;
        }
        unsafe {
            let get = self.table().GetStringUTFChars?;
            let release = self.table().ReleaseStringUTFChars?;
            let chars = get(self.env, s, ptr::null_mut());
            if chars.is_null() {
                self.clear_exception();
                return None;
            }
            let out = CStr::from_ptr(chars).to_string_lossy().into_owned();
            release(self.env, s, chars);
            Some(out)
        }
    }

    pub fn array_len(&self, array: jobject) -> usize {
        unsafe {
            match self.table().GetArrayLength {
                Some(f) => f(self.env, array).max(0) as usize,
                None => 0,
            }
        }
    }

    pub fn array_element(&self, array: jobject, index: usize) -> Option<jobject> {
        unsafe {
            let f = self.table().GetObjectArrayElement?;
            let out = f(self.env, array, index as jint);
            if self.clear_exception() || out.is_null() {
                return None;
            }
            Some(out)
        }
    }

    pub fn delete_local(&self, obj: jobject) {
        unsafe {
            if obj.is_null() {
                return;
            }
            if let Some(f) = self.table().DeleteLocalRef {
                f(self.env, obj);
            }
        }
    }
}

/// Process-wide agent state, set once by the entry point.
pub(crate) struct AgentState {
    pub profiler: Arc<Profiler>,
    pub clock: SystemClock,
    pub jvmti: Jvmti,
    pub vm: VmHandle,
    control_address: Mutex<Option<String>>,
}

static AGENT: OnceLock<AgentState> = OnceLock::new();

pub(crate) fn agent() -> Option<&'static AgentState> {
    AGENT.get()
}

/// Agent options: `include=a.b.*,c.D;exclude=a.b.internal.*`. Dots or
/// slashes both work; unknown keys are ignored with a warning.
fn parse_options(options: &str) -> Result<(Vec<String>, Vec<String>), AgentError> {
    let mut includes = Vec::new();
    let mut excludes = Vec::new();
    for part in options.split(';').filter(|p| !p.trim().is_empty()) {
        match part.split_once('=') {
            Some(("include", v)) => {
                includes.extend(v.split(',').filter(|p| !p.is_empty()).map(str::to_string))
            }
            Some(("exclude", v)) => {
                excludes.extend(v.split(',').filter(|p| !p.is_empty()).map(str::to_string))
            }
            _ => warn!("ignoring unrecognized agent option {part:?}"),
        }
    }
    Ok((includes, excludes))
}

#[no_mangle]
pub unsafe extern "system" fn Agent_OnLoad(
    vm: *mut JavaVM,
    options: *const std::os::raw::c_char,
    _reserved: *mut c_void,
) -> jint {
    enter_agent(vm, options, false)
}

#[no_mangle]
pub unsafe extern "system" fn Agent_OnAttach(
    vm: *mut JavaVM,
    options: *const std::os::raw::c_char,
    _reserved: *mut c_void,
) -> jint {
    enter_agent(vm, options, true)
}

unsafe fn enter_agent(
    vm: *mut JavaVM,
    options: *const std::os::raw::c_char,
    vm_is_live: bool,
) -> jint {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::new().filter_or("JVMMON_LOG", "info"),
    )
    .try_init();

    let options = if options.is_null() {
        String::new()
    } else {
        CStr::from_ptr(options).to_string_lossy().into_owned()
    };

    match init_agent(vm, &options, vm_is_live) {
        Ok(()) => JNI_OK,
        Err(e) => {
            error!("agent initialization failed: {e}");
            crate::ffi::jni::JNI_ERR
        }
    }
}

fn init_agent(vm: *mut JavaVM, options: &str, vm_is_live: bool) -> Result<(), AgentError> {
    let (includes, excludes) = parse_options(options)?;

    let jvmti = unsafe { Jvmti::from_vm(vm)? };
    jvmti.add_profiling_capabilities()?;

    let profiler = Arc::new(Profiler::new(RewriteConfig::default()));
    profiler.configure_filter(includes, excludes)?;

    let state = AgentState {
        profiler,
        clock: SystemClock::new(),
        jvmti,
        vm: VmHandle(vm),
        control_address: Mutex::new(None),
    };
    AGENT.set(state).map_err(|_| AgentError::AlreadyLoaded)?;

    let callbacks = jvmtiEventCallbacks {
        VMInit: Some(on_vm_init),
        VMDeath: Some(on_vm_death),
        ClassFileLoadHook: Some(on_class_file_load),
        ..Default::default()
    };
    jvmti.set_callbacks(&callbacks)?;
    jvmti.enable_event(JVMTI_EVENT_CLASS_FILE_LOAD_HOOK)?;
    jvmti.enable_event(JVMTI_EVENT_VM_DEATH)?;

    if vm_is_live {
        // Dynamic attach: VMInit fired long ago, bootstrap right here.
        let state = agent().ok_or(AgentError::AlreadyLoaded)?;
        let jni = unsafe { Jni::from_raw(state.vm.jni_env()?) };
        bootstrap(&jni, state)?;
    } else {
        jvmti.enable_event(JVMTI_EVENT_VM_INIT)?;
    }
    info!("agent initialized (options {options:?})");
    Ok(())
}

/// Live-phase setup: probe class, control server, connector property.
/// Idempotent so the attach path and a late VMInit cannot double-bind.
fn bootstrap(jni: &Jni, state: &'static AgentState) -> Result<(), AgentError> {
    {
        let address = state.control_address.lock();
        if address.is_some() {
            return Ok(());
        }
    }
    probe::define_probe_class(jni)?;

    let mut dispatcher = Dispatcher::new();
    dispatcher.register(
        "Profiler",
        Arc::new(AgentProfilerBean::new(state.profiler.clone())),
    );
    dispatcher.register(
        "Threading",
        Arc::new(ThreadingBean::new(Arc::new(JvmtiThreadDumpSource::new(
            state.jvmti,
            state.vm,
        )))),
    );
    dispatcher.register(
        "JobManager",
        Arc::new(JobManagerBean::new(Arc::new(jobs_jni::JniJobManager::new(
            state.vm,
        )))),
    );

    let server = ControlServer::bind(ControlServer::default_path())?;
    let address = server.spawn(Arc::new(dispatcher));
    set_system_property(jni, crate::attach::CONNECTOR_PROPERTY, &address)?;
    *state.control_address.lock() = Some(address.clone());
    info!("control server listening on {address}");
    Ok(())
}

fn set_system_property(jni: &Jni, key: &str, value: &str) -> Result<(), AgentError> {
    let system = jni
        .find_class(c_name(b"java/lang/System\0"))
        .ok_or(AgentError::Jni("FindClass(java/lang/System)"))?;
    let set = jni
        .get_static_method(
            system,
            c_name(b"setProperty\0"),
            c_name(b"(Ljava/lang/String;Ljava/lang/String;)Ljava/lang/String;\0"),
        )
        .ok_or(AgentError::Jni("GetStaticMethodID(setProperty)"))?;
    let k = jni.new_string(key).ok_or(AgentError::Jni("NewStringUTF"))?;
    let v = jni.new_string(value).ok_or(AgentError::Jni("NewStringUTF"))?;
    let args = [jvalue { l: k }, jvalue { l: v }];
    // setProperty returns the previous value or null; either is fine
    let previous = jni.call_static_object(system, set, &args);
    if let Some(p) = previous {
        jni.delete_local(p);
    }
    jni.delete_local(k);
    jni.delete_local(v);
    jni.delete_local(system);
    Ok(())
}

/// Interprets a NUL-terminated byte literal as a &CStr.
pub(crate) fn c_name(bytes: &'static [u8]) -> &'static CStr {
    // all callers pass literals with a trailing NUL
    CStr::from_bytes_with_nul(bytes).unwrap_or_default()
}

unsafe extern "system" fn on_vm_init(
    _jvmti: *mut jvmtiEnv,
    jni: *mut JNIEnv,
    _thread: jthread,
) {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let Some(state) = agent() else { return };
        let jni = Jni::from_raw(jni);
        if let Err(e) = bootstrap(&jni, state) {
            error!("agent bootstrap failed: {e}");
        }
    }));
    if outcome.is_err() {
        error!("agent bootstrap panicked");
    }
}

unsafe extern "system" fn on_vm_death(_jvmti: *mut jvmtiEnv, _jni: *mut JNIEnv) {
    let _ = catch_unwind(AssertUnwindSafe(|| {
        let Some(state) = agent() else { return };
        let measured = state.profiler.measurements().len();
        info!("VM shutting down; {measured} instrumented methods recorded data");
    }));
}

unsafe extern "system" fn on_class_file_load(
    _jvmti: *mut jvmtiEnv,
    _jni: *mut JNIEnv,
    _class_being_redefined: jclass,
    _loader: jobject,
    name: *const std::os::raw::c_char,
    _protection_domain: jobject,
    class_data_len: jint,
    class_data: *const u8,
    new_class_data_len: *mut jint,
    new_class_data: *mut *mut u8,
) {
    // A panic must never unwind into the VM.
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        transform_hook(name, class_data_len, class_data, new_class_data_len, new_class_data)
    }));
    if outcome.is_err() {
        error!("class transformer panicked; class left untouched");
    }
}

unsafe fn transform_hook(
    name: *const std::os::raw::c_char,
    class_data_len: jint,
    class_data: *const u8,
    new_class_data_len: *mut jint,
    new_class_data: *mut *mut u8,
) {
    let Some(state) = agent() else { return };
    // anonymous/hidden classes come through with a null name; skip them
    if name.is_null() || class_data.is_null() || class_data_len <= 0 {
        return;
    }
    let Ok(name) = CStr::from_ptr(name).to_str() else { return };
    let bytes = slice::from_raw_parts(class_data, class_data_len as usize);

    if let Some(replacement) = state.profiler.transform(name, bytes) {
        match state.jvmti.allocate_copy(&replacement) {
            Ok(mem) => {
                *new_class_data_len = replacement.len() as jint;
                *new_class_data = mem;
                debug!("instrumented {name} ({} -> {} bytes)", bytes.len(), replacement.len());
            }
            Err(e) => warn!("could not hand back rewritten {name}: {e}"),
        }
    }
}

/// The `Profiler` control bean as served in-process: the library-level
/// operations plus `retransform`, which needs JVM TI and therefore lives
/// here.
pub struct AgentProfilerBean {
    profiler: Arc<Profiler>,
    delegate: ProfilerBean,
}

impl AgentProfilerBean {
    pub fn new(profiler: Arc<Profiler>) -> Self {
        Self { delegate: ProfilerBean::new(profiler.clone()), profiler }
    }

    fn retransform_by_name(&self, names: &str) -> Result<Value, ControlError> {
        let state = agent().ok_or_else(|| {
            ControlError::RemoteInvocationFailure("agent not initialized".to_string())
        })?;
        let jni_env = state.vm.jni_env().map_err(|e| {
            ControlError::RemoteInvocationFailure(format!("no JNI environment: {e}"))
        })?;
        let jni = unsafe { Jni::from_raw(jni_env) };

        let mut classes = Vec::new();
        for name in names.split(',').filter(|n| !n.is_empty()) {
            let slashed = name.replace('.', "/");
            self.profiler.mark_for_retransform(&slashed);
            let Ok(c_slashed) = CString::new(slashed.clone()) else { continue };
            match jni.find_class(&c_slashed) {
                Some(class) => {
                    if state.jvmti.is_modifiable(class).unwrap_or(false) {
                        classes.push(class);
                    } else {
                        warn!("{slashed} is not modifiable; skipping retransform");
                        jni.delete_local(class);
                    }
                }
                None => warn!("retransform target {slashed} not found"),
            }
        }
        let count = classes.len();
        state.jvmti.retransform(&classes).map_err(|e| {
            ControlError::RemoteInvocationFailure(format!("retransform failed: {e}"))
        })?;
        for class in classes {
            jni.delete_local(class);
        }
        Ok(Value::from(count as u64))
    }
}

impl Bean for AgentProfilerBean {
    fn invoke(&self, operation: &str, args: &[String]) -> Result<Value, ControlError> {
        match operation {
            "retransform" => {
                let names = args.first().map(String::as_str).unwrap_or("");
                self.retransform_by_name(names)
            }
            _ => self.delegate.invoke(operation, args),
        }
    }
}

const DUMP_MAX_FRAMES: usize = 64;

/// Thread dumps straight from JVM TI.
pub struct JvmtiThreadDumpSource {
    jvmti: Jvmti,
    vm: VmHandle,
    cpu: Mutex<CpuUsageTracker>,
    clock: SystemClock,
}

impl JvmtiThreadDumpSource {
    pub(crate) fn new(jvmti: Jvmti, vm: VmHandle) -> Self {
        Self { jvmti, vm, cpu: Mutex::new(CpuUsageTracker::new()), clock: SystemClock::new() }
    }

    fn snapshot_thread(&self, jni: &Jni, thread: jthread, now_ns: u64) -> Option<ThreadSnapshot> {
        let name = self.jvmti.thread_name(thread).ok()?;
        let bits = self.jvmti.thread_state_bits(thread).ok()?;
        let mut snap = ThreadSnapshot::new(name.clone(), map_thread_state(bits));
        snap.suspended = bits & JVMTI_THREAD_STATE_SUSPENDED != 0;

        if let Ok(cpu_ns) = self.jvmti.thread_cpu_ns(thread) {
            let key = name_key(&name);
            snap.cpu_percent = self.cpu.lock().percent(key, cpu_ns.max(0) as u64, now_ns);
        }

        if let Ok(frames) = self.jvmti.stack_frames(thread, DUMP_MAX_FRAMES) {
            snap.stack = frames
                .iter()
                .filter_map(|f| self.jvmti.method_display(f.method).ok())
                .collect();
        }

        if let Ok(monitor) = self.jvmti.contended_monitor(thread) {
            if !monitor.is_null() {
                if let Some(class) = jni.get_object_class(monitor) {
                    snap.lock_name = self.jvmti.class_display(class).ok();
                    jni.delete_local(class);
                }
                if let Ok(owner) = self.jvmti.monitor_owner(monitor) {
                    if !owner.is_null() {
                        snap.lock_owner = self.jvmti.thread_name(owner).ok();
                        jni.delete_local(owner);
                    }
                }
                jni.delete_local(monitor);
            }
        }
        Some(snap)
    }
}

impl ThreadDumpSource for JvmtiThreadDumpSource {
    fn dump(&self) -> Vec<ThreadSnapshot> {
        let jni = match self.vm.jni_env() {
            Ok(env) => unsafe { Jni::from_raw(env) },
            Err(e) => {
                warn!("thread dump unavailable: {e}");
                return Vec::new();
            }
        };
        let threads = match self.jvmti.all_threads() {
            Ok(t) => t,
            Err(e) => {
                warn!("thread dump unavailable: {e}");
                return Vec::new();
            }
        };
        let now_ns = self.clock.now_ns();
        let mut out = Vec::with_capacity(threads.len());
        for thread in threads {
            if let Some(snap) = self.snapshot_thread(&jni, thread, now_ns) {
                out.push(snap);
            }
            jni.delete_local(thread);
        }
        out
    }
}

fn map_thread_state(bits: jint) -> ThreadState {
    if bits & JVMTI_THREAD_STATE_ALIVE == 0 {
        return if bits & JVMTI_THREAD_STATE_TERMINATED != 0 {
            ThreadState::Terminated
        } else {
            ThreadState::New
        };
    }
    if bits & JVMTI_THREAD_STATE_BLOCKED_ON_MONITOR_ENTER != 0 {
        ThreadState::Blocked
    } else if bits & (JVMTI_THREAD_STATE_WAITING_WITH_TIMEOUT | JVMTI_THREAD_STATE_SLEEPING) != 0 {
        ThreadState::TimedWaiting
    } else if bits & JVMTI_THREAD_STATE_WAITING != 0 {
        ThreadState::Waiting
    } else {
        ThreadState::Runnable
    }
}

/// Stable-enough key for CPU tracking across dumps; JVM TI hands out
/// fresh local refs each time, so the name is what identifies a thread.
fn name_key(name: &str) -> i64 {
    let mut h = DefaultHasher::new();
    name.hash(&mut h);
    h.finish() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_split_into_filter_lists() {
        let (inc, exc) = parse_options("include=com.example.*,org.demo.Main;exclude=com.example.gen.*").unwrap();
        assert_eq!(inc, vec!["com.example.*", "org.demo.Main"]);
        assert_eq!(exc, vec!["com.example.gen.*"]);
    }

    #[test]
    fn empty_and_unknown_options_are_tolerated() {
        let (inc, exc) = parse_options("").unwrap();
        assert!(inc.is_empty() && exc.is_empty());
        let (inc, _) = parse_options("bogus;include=a.B").unwrap();
        assert_eq!(inc, vec!["a.B"]);
    }

    #[test]
    fn thread_state_bit_mapping() {
        assert_eq!(map_thread_state(0), ThreadState::New);
        assert_eq!(map_thread_state(JVMTI_THREAD_STATE_TERMINATED), ThreadState::Terminated);
        let alive = JVMTI_THREAD_STATE_ALIVE;
        assert_eq!(map_thread_state(alive | 0x0004), ThreadState::Runnable);
        assert_eq!(
            map_thread_state(alive | JVMTI_THREAD_STATE_BLOCKED_ON_MONITOR_ENTER),
            ThreadState::Blocked
        );
        assert_eq!(
            map_thread_state(alive | JVMTI_THREAD_STATE_WAITING | JVMTI_THREAD_STATE_SLEEPING),
            ThreadState::TimedWaiting
        );
        assert_eq!(
            map_thread_state(alive | JVMTI_THREAD_STATE_WAITING),
            ThreadState::Waiting
        );
    }
}
