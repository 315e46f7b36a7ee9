//! The probe class the instrumented bytecode calls into.
//!
//! `jvmmon/runtime/Probe` is synthesized here with the crate's own class
//! file writer, defined through JNI on the bootstrap loader (so every
//! application class can link against it) and its six static native
//! `(I)V` methods are bound to the Rust functions below, which feed the
//! measurement store.

use std::ffi::c_void;

use log::info;

use crate::classfile::{ClassFile, ConstantPool, MemberInfo};
use crate::error::{AgentError, ClassFileError};
use crate::ffi::jni::{jclass, jint, JNIEnv, JNINativeMethod};
use crate::monitor::sched::Clock;
use crate::rewriter::{
    PROBE_CLASS, PROBE_DESC, PROBE_ENTER, PROBE_EXIT, PROBE_LOCK_ENTER, PROBE_LOCK_EXIT,
    PROBE_PAUSE_ENTER, PROBE_PAUSE_EXIT,
};

use super::{agent, c_name, Jni};

const ACC_PUBLIC: u16 = 0x0001;
const ACC_FINAL: u16 = 0x0010;
const ACC_SUPER: u16 = 0x0020;
const ACC_STATIC: u16 = 0x0008;
const ACC_NATIVE: u16 = 0x0100;

// Written as major 52 (Java 8): the lowest version every supported
// target VM accepts, and native methods carry no Code attribute to
// verify anyway.
const PROBE_MAJOR: u16 = 52;

/// Serializes the probe class from scratch.
pub fn probe_class_bytes() -> Result<Vec<u8>, ClassFileError> {
    let mut pool = ConstantPool::new();
    let this_class = pool.class(PROBE_CLASS)?;
    let super_class = pool.class("java/lang/Object")?;
    let descriptor_index = pool.utf8(PROBE_DESC)?;

    let mut methods = Vec::new();
    for name in [
        PROBE_ENTER,
        PROBE_EXIT,
        PROBE_PAUSE_ENTER,
        PROBE_PAUSE_EXIT,
        PROBE_LOCK_ENTER,
        PROBE_LOCK_EXIT,
    ] {
        methods.push(MemberInfo {
            access_flags: ACC_PUBLIC | ACC_STATIC | ACC_NATIVE,
            name_index: pool.utf8(name)?,
            descriptor_index,
            attributes: Vec::new(),
        });
    }

    let class = ClassFile {
        minor_version: 0,
        major_version: PROBE_MAJOR,
        constant_pool: pool,
        access_flags: ACC_PUBLIC | ACC_FINAL | ACC_SUPER,
        this_class,
        super_class,
        interfaces: Vec::new(),
        fields: Vec::new(),
        methods,
        attributes: Vec::new(),
    };
    Ok(class.serialize())
}

/// Defines the probe class and binds its natives. Must run on a live
/// Java thread.
pub(crate) fn define_probe_class(jni: &Jni) -> Result<(), AgentError> {
    let bytes = probe_class_bytes()?;
    let class = jni.define_class(c_name(b"jvmmon/runtime/Probe\0"), &bytes)?;

    let natives = [
        native(b"enter\0", probe_enter as *const ()),
        native(b"exit\0", probe_exit as *const ()),
        native(b"pauseEnter\0", probe_pause_enter as *const ()),
        native(b"pauseExit\0", probe_pause_exit as *const ()),
        native(b"lockEnter\0", probe_lock_enter as *const ()),
        native(b"lockExit\0", probe_lock_exit as *const ()),
    ];
    jni.register_natives(class, &natives)?;
    jni.delete_local(class);
    info!("probe class defined and bound");
    Ok(())
}

fn native(name: &'static [u8], f: *const ()) -> JNINativeMethod {
    JNINativeMethod {
        name: c_name(name).as_ptr(),
        signature: c_name(b"(I)V\0").as_ptr(),
        fnPtr: f as *mut c_void,
    }
}

// The natives are the hot path: one store lookup and a few atomic adds
// per call. They must not panic and must not touch JNI.

unsafe extern "system" fn probe_enter(_env: *mut JNIEnv, _class: jclass, id: jint) {
    if let Some(state) = agent() {
        state.profiler.enter(id as u32, state.clock.now_ns());
    }
}

unsafe extern "system" fn probe_exit(_env: *mut JNIEnv, _class: jclass, id: jint) {
    if let Some(state) = agent() {
        state.profiler.exit(id as u32, state.clock.now_ns());
    }
}

unsafe extern "system" fn probe_pause_enter(_env: *mut JNIEnv, _class: jclass, id: jint) {
    if let Some(state) = agent() {
        state.profiler.pause_enter(id as u32, state.clock.now_ns());
    }
}

unsafe extern "system" fn probe_pause_exit(_env: *mut JNIEnv, _class: jclass, id: jint) {
    if let Some(state) = agent() {
        state.profiler.pause_exit(id as u32, state.clock.now_ns());
    }
}

unsafe extern "system" fn probe_lock_enter(_env: *mut JNIEnv, _class: jclass, id: jint) {
    if let Some(state) = agent() {
        state.profiler.lock_enter(id as u32, state.clock.now_ns());
    }
}

unsafe extern "system" fn probe_lock_exit(_env: *mut JNIEnv, _class: jclass, id: jint) {
    if let Some(state) = agent() {
        state.profiler.lock_exit(id as u32, state.clock.now_ns());
    }
}
