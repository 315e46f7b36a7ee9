// Trimmed JNI bindings, Linux/HotSpot.
//
// The vtable layout follows the jni.h function table (236 slots as of
// JDK 24). Only the slots this agent calls are typed; everything else is
// a pointer-sized padding field, so offsets stay exact without carrying
// two hundred unused signatures.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use std::ffi::c_void;
use std::os::raw::c_char;

pub type jint = i32;
pub type jlong = i64;
pub type jbyte = i8;
pub type jboolean = u8;
pub type jchar = u16;
pub type jshort = i16;
pub type jfloat = f32;
pub type jdouble = f64;
pub type jsize = jint;

pub type jobject = *mut c_void;
pub type jclass = jobject;
pub type jstring = jobject;
pub type jarray = jobject;
pub type jobjectArray = jarray;
pub type jthread = jobject;
pub type jthreadGroup = jobject;
pub type jthrowable = jobject;

pub type jmethodID = *mut c_void;
pub type jfieldID = *mut c_void;

#[repr(C)]
#[derive(Copy, Clone)]
pub union jvalue {
    pub z: jboolean,
    pub b: jbyte,
    pub c: jchar,
    pub s: jshort,
    pub i: jint,
    pub j: jlong,
    pub f: jfloat,
    pub d: jdouble,
    pub l: jobject,
}

pub const JNI_OK: jint = 0;
pub const JNI_ERR: jint = -1;
pub const JNI_FALSE: jboolean = 0;
pub const JNI_TRUE: jboolean = 1;
pub const JNI_VERSION_1_8: jint = 0x00010008;

#[repr(C)]
pub struct JNINativeMethod {
    pub name: *const c_char,
    pub signature: *const c_char,
    pub fnPtr: *mut c_void,
}

pub type JniDefineClassFn = unsafe extern "system" fn(
    env: *mut JNIEnv,
    name: *const c_char,
    loader: jobject,
    buf: *const jbyte,
    len: jsize,
) -> jclass;
pub type JniFindClassFn =
    unsafe extern "system" fn(env: *mut JNIEnv, name: *const c_char) -> jclass;
pub type JniExceptionOccurredFn = unsafe extern "system" fn(env: *mut JNIEnv) -> jthrowable;
pub type JniExceptionClearFn = unsafe extern "system" fn(env: *mut JNIEnv);
pub type JniNewGlobalRefFn =
    unsafe extern "system" fn(env: *mut JNIEnv, obj: jobject) -> jobject;
pub type JniDeleteGlobalRefFn = unsafe extern "system" fn(env: *mut JNIEnv, obj: jobject);
pub type JniDeleteLocalRefFn = unsafe extern "system" fn(env: *mut JNIEnv, obj: jobject);
pub type JniGetObjectClassFn =
    unsafe extern "system" fn(env: *mut JNIEnv, obj: jobject) -> jclass;
pub type JniGetMethodIDFn = unsafe extern "system" fn(
    env: *mut JNIEnv,
    class: jclass,
    name: *const c_char,
    sig: *const c_char,
) -> jmethodID;
pub type JniCallObjectMethodAFn = unsafe extern "system" fn(
    env: *mut JNIEnv,
    obj: jobject,
    method: jmethodID,
    args: *const jvalue,
) -> jobject;
pub type JniCallBooleanMethodAFn = unsafe extern "system" fn(
    env: *mut JNIEnv,
    obj: jobject,
    method: jmethodID,
    args: *const jvalue,
) -> jboolean;
pub type JniCallIntMethodAFn = unsafe extern "system" fn(
    env: *mut JNIEnv,
    obj: jobject,
    method: jmethodID,
    args: *const jvalue,
) -> jint;
pub type JniGetStaticMethodIDFn = unsafe extern "system" fn(
    env: *mut JNIEnv,
    class: jclass,
    name: *const c_char,
    sig: *const c_char,
) -> jmethodID;
pub type JniCallStaticObjectMethodAFn = unsafe extern "system" fn(
    env: *mut JNIEnv,
    class: jclass,
    method: jmethodID,
    args: *const jvalue,
) -> jobject;
pub type JniCallStaticVoidMethodAFn = unsafe extern "system" fn(
    env: *mut JNIEnv,
    class: jclass,
    method: jmethodID,
    args: *const jvalue,
);
pub type JniNewStringUTFFn =
    unsafe extern "system" fn(env: *mut JNIEnv, utf: *const c_char) -> jstring;
pub type JniGetStringUTFCharsFn = unsafe extern "system" fn(
    env: *mut JNIEnv,
    string: jstring,
    is_copy: *mut jboolean,
) -> *const c_char;
pub type JniReleaseStringUTFCharsFn =
    unsafe extern "system" fn(env: *mut JNIEnv, string: jstring, chars: *const c_char);
pub type JniGetArrayLengthFn =
    unsafe extern "system" fn(env: *mut JNIEnv, array: jarray) -> jsize;
pub type JniGetObjectArrayElementFn =
    unsafe extern "system" fn(env: *mut JNIEnv, array: jobjectArray, index: jsize) -> jobject;
pub type JniRegisterNativesFn = unsafe extern "system" fn(
    env: *mut JNIEnv,
    class: jclass,
    methods: *const JNINativeMethod,
    count: jint,
) -> jint;
pub type JniExceptionCheckFn = unsafe extern "system" fn(env: *mut JNIEnv) -> jboolean;

/// jni.h JNINativeInterface_, slots 0..=235.
#[repr(C)]
pub struct JNINativeInterface_ {
    /* 0-3: reserved */
    pub reserved: [*mut c_void; 4],
    /* 4: GetVersion */
    pub pad_4: [*mut c_void; 1],
    /* 5 */
    pub DefineClass: Option<JniDefineClassFn>,
    /* 6 */
    pub FindClass: Option<JniFindClassFn>,
    /* 7-14: reflection, superclass, Throw */
    pub pad_7: [*mut c_void; 8],
    /* 15 */
    pub ExceptionOccurred: Option<JniExceptionOccurredFn>,
    /* 16: ExceptionDescribe */
    pub pad_16: [*mut c_void; 1],
    /* 17 */
    pub ExceptionClear: Option<JniExceptionClearFn>,
    /* 18-20: FatalError, local frames */
    pub pad_18: [*mut c_void; 3],
    /* 21 */
    pub NewGlobalRef: Option<JniNewGlobalRefFn>,
    /* 22 */
    pub DeleteGlobalRef: Option<JniDeleteGlobalRefFn>,
    /* 23 */
    pub DeleteLocalRef: Option<JniDeleteLocalRefFn>,
    /* 24-30: IsSameObject, local capacity, AllocObject, NewObject */
    pub pad_24: [*mut c_void; 7],
    /* 31 */
    pub GetObjectClass: Option<JniGetObjectClassFn>,
    /* 32: IsInstanceOf */
    pub pad_32: [*mut c_void; 1],
    /* 33 */
    pub GetMethodID: Option<JniGetMethodIDFn>,
    /* 34-35: CallObjectMethod, CallObjectMethodV */
    pub pad_34: [*mut c_void; 2],
    /* 36 */
    pub CallObjectMethodA: Option<JniCallObjectMethodAFn>,
    /* 37-38: CallBooleanMethod, CallBooleanMethodV */
    pub pad_37: [*mut c_void; 2],
    /* 39 */
    pub CallBooleanMethodA: Option<JniCallBooleanMethodAFn>,
    /* 40-50: Byte/Char/Short triples, CallIntMethod, CallIntMethodV */
    pub pad_40: [*mut c_void; 11],
    /* 51 */
    pub CallIntMethodA: Option<JniCallIntMethodAFn>,
    /* 52-112: remaining Call/CallNonvirtual triples, field access */
    pub pad_52: [*mut c_void; 61],
    /* 113 */
    pub GetStaticMethodID: Option<JniGetStaticMethodIDFn>,
    /* 114-115: CallStaticObjectMethod, CallStaticObjectMethodV */
    pub pad_114: [*mut c_void; 2],
    /* 116 */
    pub CallStaticObjectMethodA: Option<JniCallStaticObjectMethodAFn>,
    /* 117-142: remaining CallStatic triples */
    pub pad_117: [*mut c_void; 26],
    /* 143 */
    pub CallStaticVoidMethodA: Option<JniCallStaticVoidMethodAFn>,
    /* 144-166: static fields, NewString */
    pub pad_144: [*mut c_void; 23],
    /* 167 */
    pub NewStringUTF: Option<JniNewStringUTFFn>,
    /* 168: GetStringUTFLength */
    pub pad_168: [*mut c_void; 1],
    /* 169 */
    pub GetStringUTFChars: Option<JniGetStringUTFCharsFn>,
    /* 170 */
    pub ReleaseStringUTFChars: Option<JniReleaseStringUTFCharsFn>,
    /* 171 */
    pub GetArrayLength: Option<JniGetArrayLengthFn>,
    /* 172: NewObjectArray */
    pub pad_172: [*mut c_void; 1],
    /* 173 */
    pub GetObjectArrayElement: Option<JniGetObjectArrayElementFn>,
    /* 174-214: primitive arrays, regions */
    pub pad_174: [*mut c_void; 41],
    /* 215 */
    pub RegisterNatives: Option<JniRegisterNativesFn>,
    /* 216-227: UnregisterNatives, monitors, string regions, weak refs */
    pub pad_216: [*mut c_void; 12],
    /* 228 */
    pub ExceptionCheck: Option<JniExceptionCheckFn>,
    /* 229-235: direct buffers, GetObjectRefType, GetModule,
     * IsVirtualThread, GetStringUTFLengthAsLong */
    pub pad_229: [*mut c_void; 7],
}

#[repr(C)]
pub struct JNIEnv {
    pub functions: *const JNINativeInterface_,
}

pub type JavaVMDestroyFn = unsafe extern "system" fn(vm: *mut JavaVM) -> jint;
pub type JavaVMAttachFn =
    unsafe extern "system" fn(vm: *mut JavaVM, penv: *mut *mut c_void, args: *mut c_void) -> jint;
pub type JavaVMDetachFn = unsafe extern "system" fn(vm: *mut JavaVM) -> jint;
pub type JavaVMGetEnvFn =
    unsafe extern "system" fn(vm: *mut JavaVM, penv: *mut *mut c_void, version: jint) -> jint;

/// jni.h JNIInvokeInterface_.
#[repr(C)]
pub struct JNIInvokeInterface_ {
    pub reserved: [*mut c_void; 3],
    pub DestroyJavaVM: Option<JavaVMDestroyFn>,
    pub AttachCurrentThread: Option<JavaVMAttachFn>,
    pub DetachCurrentThread: Option<JavaVMDetachFn>,
    pub GetEnv: Option<JavaVMGetEnvFn>,
    pub AttachCurrentThreadAsDaemon: Option<JavaVMAttachFn>,
}

#[repr(C)]
pub struct JavaVM {
    pub functions: *const JNIInvokeInterface_,
}
