//! Raw JNI and JVM TI bindings, hand-trimmed to the surface the agent
//! uses. Everything here is `repr(C)` and mirrors the JDK headers.

pub mod jni;
pub mod jvmti;
