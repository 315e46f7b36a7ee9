// Trimmed JVM TI bindings.
//
// Same approach as the JNI table: the jvmtiInterface_1_ layout follows
// jvmti.h exactly (156 slots as of JDK 21), with typed entries only for
// the functions the agent calls and pointer-sized padding elsewhere.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use std::ffi::c_void;
use std::os::raw::{c_char, c_uchar};

use super::jni::{
    jboolean, jclass, jint, jlong, jmethodID, jobject, jthread, jthreadGroup, JNIEnv,
};

pub type jvmtiError = jint;
pub type jlocation = jlong;

pub const JVMTI_ERROR_NONE: jvmtiError = 0;
pub const JVMTI_ERROR_INVALID_CLASS: jvmtiError = 21;
pub const JVMTI_ERROR_UNMODIFIABLE_CLASS: jvmtiError = 79;
pub const JVMTI_ERROR_NOT_AVAILABLE: jvmtiError = 98;
pub const JVMTI_ERROR_MUST_POSSESS_CAPABILITY: jvmtiError = 99;
pub const JVMTI_ERROR_NULL_POINTER: jvmtiError = 100;
pub const JVMTI_ERROR_ILLEGAL_ARGUMENT: jvmtiError = 103;
pub const JVMTI_ERROR_OUT_OF_MEMORY: jvmtiError = 110;
pub const JVMTI_ERROR_WRONG_PHASE: jvmtiError = 112;
pub const JVMTI_ERROR_UNATTACHED_THREAD: jvmtiError = 115;

pub const JVMTI_VERSION_1_2: jint = 0x30010200;

pub const JVMTI_DISABLE: jint = 0;
pub const JVMTI_ENABLE: jint = 1;

pub const JVMTI_EVENT_VM_INIT: jint = 50;
pub const JVMTI_EVENT_VM_DEATH: jint = 51;
pub const JVMTI_EVENT_CLASS_FILE_LOAD_HOOK: jint = 54;

pub const JVMTI_THREAD_STATE_ALIVE: jint = 0x0001;
pub const JVMTI_THREAD_STATE_TERMINATED: jint = 0x0002;
pub const JVMTI_THREAD_STATE_RUNNABLE: jint = 0x0004;
pub const JVMTI_THREAD_STATE_WAITING_INDEFINITELY: jint = 0x0010;
pub const JVMTI_THREAD_STATE_WAITING_WITH_TIMEOUT: jint = 0x0020;
pub const JVMTI_THREAD_STATE_SLEEPING: jint = 0x0040;
pub const JVMTI_THREAD_STATE_WAITING: jint = 0x0080;
pub const JVMTI_THREAD_STATE_IN_OBJECT_WAIT: jint = 0x0100;
pub const JVMTI_THREAD_STATE_PARKED: jint = 0x0200;
pub const JVMTI_THREAD_STATE_BLOCKED_ON_MONITOR_ENTER: jint = 0x0400;
pub const JVMTI_THREAD_STATE_SUSPENDED: jint = 0x10_0000;

#[repr(C)]
#[derive(Debug)]
pub struct jvmtiThreadInfo {
    pub name: *mut c_char,
    pub priority: jint,
    pub is_daemon: jboolean,
    pub thread_group: jthreadGroup,
    pub context_class_loader: jobject,
}

#[repr(C)]
#[derive(Debug)]
pub struct jvmtiMonitorUsage {
    pub owner: jthread,
    pub entry_count: jint,
    pub waiter_count: jint,
    pub waiters: *mut jthread,
    pub notify_waiter_count: jint,
    pub notify_waiters: *mut jthread,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct jvmtiFrameInfo {
    pub method: jmethodID,
    pub location: jlocation,
}

/// jvmti.h capability bit set. 128 bits; the accessors below cover the
/// capabilities this agent requests, addressed by their position in the
/// jvmtiCapabilities bitfield declaration.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct jvmtiCapabilities {
    pub bits: [u32; 4],
}

impl jvmtiCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_bit(&mut self, index: usize, value: bool) {
        let word = index / 32;
        let bit = 1u32 << (index % 32);
        if value {
            self.bits[word] |= bit;
        } else {
            self.bits[word] &= !bit;
        }
    }

    fn get_bit(&self, index: usize) -> bool {
        self.bits[index / 32] & (1u32 << (index % 32)) != 0
    }

    /* [5] */
    pub fn can_get_owned_monitor_info(&self) -> bool {
        self.get_bit(5)
    }
    pub fn set_can_get_owned_monitor_info(&mut self, value: bool) {
        self.set_bit(5, value);
    }

    /* [6] */
    pub fn can_get_current_contended_monitor(&self) -> bool {
        self.get_bit(6)
    }
    pub fn set_can_get_current_contended_monitor(&mut self, value: bool) {
        self.set_bit(6, value);
    }

    /* [7] */
    pub fn can_get_monitor_info(&self) -> bool {
        self.get_bit(7)
    }
    pub fn set_can_get_monitor_info(&mut self, value: bool) {
        self.set_bit(7, value);
    }

    /* [23] */
    pub fn can_get_thread_cpu_time(&self) -> bool {
        self.get_bit(23)
    }
    pub fn set_can_get_thread_cpu_time(&mut self, value: bool) {
        self.set_bit(23, value);
    }

    /* [26] */
    pub fn can_generate_all_class_hook_events(&self) -> bool {
        self.get_bit(26)
    }
    pub fn set_can_generate_all_class_hook_events(&mut self, value: bool) {
        self.set_bit(26, value);
    }

    /* [37] */
    pub fn can_retransform_classes(&self) -> bool {
        self.get_bit(37)
    }
    pub fn set_can_retransform_classes(&mut self, value: bool) {
        self.set_bit(37, value);
    }
}

pub type JvmtiVMInitFn =
    unsafe extern "system" fn(jvmti: *mut jvmtiEnv, jni: *mut JNIEnv, thread: jthread);
pub type JvmtiVMDeathFn = unsafe extern "system" fn(jvmti: *mut jvmtiEnv, jni: *mut JNIEnv);
pub type JvmtiThreadFn =
    unsafe extern "system" fn(jvmti: *mut jvmtiEnv, jni: *mut JNIEnv, thread: jthread);
pub type JvmtiClassFileLoadHookFn = unsafe extern "system" fn(
    jvmti: *mut jvmtiEnv,
    jni: *mut JNIEnv,
    class_being_redefined: jclass,
    loader: jobject,
    name: *const c_char,
    protection_domain: jobject,
    class_data_len: jint,
    class_data: *const c_uchar,
    new_class_data_len: *mut jint,
    new_class_data: *mut *mut c_uchar,
);

/// Leading prefix of the jvmti.h jvmtiEventCallbacks struct, through the
/// last callback this agent installs. SetEventCallbacks copies
/// `size_of_callbacks` bytes and treats everything past them as NULL, so
/// passing the prefix with `size_of::<jvmtiEventCallbacks>()` is exact.
#[repr(C)]
#[derive(Default)]
pub struct jvmtiEventCallbacks {
    pub VMInit: Option<JvmtiVMInitFn>,
    pub VMDeath: Option<JvmtiVMDeathFn>,
    pub ThreadStart: Option<JvmtiThreadFn>,
    pub ThreadEnd: Option<JvmtiThreadFn>,
    pub ClassFileLoadHook: Option<JvmtiClassFileLoadHookFn>,
}

pub type JvmtiSetEventNotificationModeFn = unsafe extern "system" fn(
    env: *mut jvmtiEnv,
    mode: jint,
    event_type: jint,
    event_thread: jthread,
) -> jvmtiError;
pub type JvmtiGetAllThreadsFn = unsafe extern "system" fn(
    env: *mut jvmtiEnv,
    threads_count: *mut jint,
    threads: *mut *mut jthread,
) -> jvmtiError;
pub type JvmtiGetThreadInfoFn = unsafe extern "system" fn(
    env: *mut jvmtiEnv,
    thread: jthread,
    info: *mut jvmtiThreadInfo,
) -> jvmtiError;
pub type JvmtiGetOwnedMonitorInfoFn = unsafe extern "system" fn(
    env: *mut jvmtiEnv,
    thread: jthread,
    owned_monitor_count: *mut jint,
    owned_monitors: *mut *mut jobject,
) -> jvmtiError;
pub type JvmtiGetCurrentContendedMonitorFn = unsafe extern "system" fn(
    env: *mut jvmtiEnv,
    thread: jthread,
    monitor: *mut jobject,
) -> jvmtiError;
pub type JvmtiGetThreadStateFn = unsafe extern "system" fn(
    env: *mut jvmtiEnv,
    thread: jthread,
    state: *mut jint,
) -> jvmtiError;
pub type JvmtiIsModifiableClassFn = unsafe extern "system" fn(
    env: *mut jvmtiEnv,
    class: jclass,
    is_modifiable: *mut jboolean,
) -> jvmtiError;
pub type JvmtiAllocateFn = unsafe extern "system" fn(
    env: *mut jvmtiEnv,
    size: jlong,
    mem: *mut *mut c_uchar,
) -> jvmtiError;
pub type JvmtiDeallocateFn =
    unsafe extern "system" fn(env: *mut jvmtiEnv, mem: *mut c_uchar) -> jvmtiError;
pub type JvmtiGetClassSignatureFn = unsafe extern "system" fn(
    env: *mut jvmtiEnv,
    class: jclass,
    signature: *mut *mut c_char,
    generic: *mut *mut c_char,
) -> jvmtiError;
pub type JvmtiGetObjectMonitorUsageFn = unsafe extern "system" fn(
    env: *mut jvmtiEnv,
    object: jobject,
    usage: *mut jvmtiMonitorUsage,
) -> jvmtiError;
pub type JvmtiGetMethodNameFn = unsafe extern "system" fn(
    env: *mut jvmtiEnv,
    method: jmethodID,
    name: *mut *mut c_char,
    signature: *mut *mut c_char,
    generic: *mut *mut c_char,
) -> jvmtiError;
pub type JvmtiGetMethodDeclaringClassFn = unsafe extern "system" fn(
    env: *mut jvmtiEnv,
    method: jmethodID,
    declaring_class: *mut jclass,
) -> jvmtiError;
pub type JvmtiGetLoadedClassesFn = unsafe extern "system" fn(
    env: *mut jvmtiEnv,
    class_count: *mut jint,
    classes: *mut *mut jclass,
) -> jvmtiError;
pub type JvmtiGetStackTraceFn = unsafe extern "system" fn(
    env: *mut jvmtiEnv,
    thread: jthread,
    start_depth: jint,
    max_frame_count: jint,
    frames: *mut jvmtiFrameInfo,
    count: *mut jint,
) -> jvmtiError;
pub type JvmtiSetEventCallbacksFn = unsafe extern "system" fn(
    env: *mut jvmtiEnv,
    callbacks: *const jvmtiEventCallbacks,
    size_of_callbacks: jint,
) -> jvmtiError;
pub type JvmtiGetErrorNameFn = unsafe extern "system" fn(
    env: *mut jvmtiEnv,
    error: jvmtiError,
    name: *mut *mut c_char,
) -> jvmtiError;
pub type JvmtiGetThreadCpuTimeFn = unsafe extern "system" fn(
    env: *mut jvmtiEnv,
    thread: jthread,
    nanos: *mut jlong,
) -> jvmtiError;
pub type JvmtiCapabilitiesFn = unsafe extern "system" fn(
    env: *mut jvmtiEnv,
    capabilities: *mut jvmtiCapabilities,
) -> jvmtiError;
pub type JvmtiAddCapabilitiesFn = unsafe extern "system" fn(
    env: *mut jvmtiEnv,
    capabilities: *const jvmtiCapabilities,
) -> jvmtiError;
pub type JvmtiRetransformClassesFn = unsafe extern "system" fn(
    env: *mut jvmtiEnv,
    class_count: jint,
    classes: *const jclass,
) -> jvmtiError;

/// jvmti.h jvmtiInterface_1_, slots 1..=156 (the header numbers them
/// from 1).
#[repr(C)]
pub struct jvmtiInterface_1_ {
    /* 1: reserved */
    pub reserved1: *mut c_void,
    /* 2 */
    pub SetEventNotificationMode: Option<JvmtiSetEventNotificationModeFn>,
    /* 3: GetAllModules */
    pub pad_3: [*mut c_void; 1],
    /* 4 */
    pub GetAllThreads: Option<JvmtiGetAllThreadsFn>,
    /* 5-8: SuspendThread, ResumeThread, StopThread, InterruptThread */
    pub pad_5: [*mut c_void; 4],
    /* 9 */
    pub GetThreadInfo: Option<JvmtiGetThreadInfoFn>,
    /* 10 */
    pub GetOwnedMonitorInfo: Option<JvmtiGetOwnedMonitorInfoFn>,
    /* 11 */
    pub GetCurrentContendedMonitor: Option<JvmtiGetCurrentContendedMonitorFn>,
    /* 12-16: RunAgentThread, thread groups */
    pub pad_12: [*mut c_void; 5],
    /* 17 */
    pub GetThreadState: Option<JvmtiGetThreadStateFn>,
    /* 18-44: frame operations, breakpoints, watched fields */
    pub pad_18: [*mut c_void; 27],
    /* 45 */
    pub IsModifiableClass: Option<JvmtiIsModifiableClassFn>,
    /* 46 */
    pub Allocate: Option<JvmtiAllocateFn>,
    /* 47 */
    pub Deallocate: Option<JvmtiDeallocateFn>,
    /* 48 */
    pub GetClassSignature: Option<JvmtiGetClassSignatureFn>,
    /* 49-58: class status, fields, methods, class loader */
    pub pad_49: [*mut c_void; 10],
    /* 59 */
    pub GetObjectMonitorUsage: Option<JvmtiGetObjectMonitorUsageFn>,
    /* 60-63: field introspection */
    pub pad_60: [*mut c_void; 4],
    /* 64 */
    pub GetMethodName: Option<JvmtiGetMethodNameFn>,
    /* 65 */
    pub GetMethodDeclaringClass: Option<JvmtiGetMethodDeclaringClassFn>,
    /* 66-77: method introspection, local variables, JNI prefix */
    pub pad_66: [*mut c_void; 12],
    /* 78 */
    pub GetLoadedClasses: Option<JvmtiGetLoadedClassesFn>,
    /* 79-103: class loader classes, raw monitors, tags, heap iteration */
    pub pad_79: [*mut c_void; 25],
    /* 104 */
    pub GetStackTrace: Option<JvmtiGetStackTraceFn>,
    /* 105-121: extension mechanism, thread suspension lists */
    pub pad_105: [*mut c_void; 17],
    /* 122 */
    pub SetEventCallbacks: Option<JvmtiSetEventCallbacksFn>,
    /* 123-127: GenerateEvents, extension functions/events */
    pub pad_123: [*mut c_void; 5],
    /* 128 */
    pub GetErrorName: Option<JvmtiGetErrorNameFn>,
    /* 129-136: JLocation format, system properties, phase, timers */
    pub pad_129: [*mut c_void; 8],
    /* 137 */
    pub GetThreadCpuTime: Option<JvmtiGetThreadCpuTimeFn>,
    /* 138-139: GetTimerInfo, GetTime */
    pub pad_138: [*mut c_void; 2],
    /* 140 */
    pub GetPotentialCapabilities: Option<JvmtiCapabilitiesFn>,
    /* 141: reserved */
    pub pad_141: [*mut c_void; 1],
    /* 142 */
    pub AddCapabilities: Option<JvmtiAddCapabilitiesFn>,
    /* 143-151: RelinquishCapabilities, env locals, version,
     * class loader search */
    pub pad_143: [*mut c_void; 9],
    /* 152 */
    pub RetransformClasses: Option<JvmtiRetransformClassesFn>,
    /* 153-156: GetOwnedMonitorStackDepthInfo, GetObjectSize,
     * GetLocalInstance, SetHeapSamplingInterval */
    pub pad_153: [*mut c_void; 4],
}

#[repr(C)]
pub struct jvmtiEnv {
    pub functions: *const jvmtiInterface_1_,
}
