//! Error taxonomy shared across the crate.
//!
//! Each subsystem gets its own enum so callers can match on exactly the
//! failures they can act on. Binaries wrap these in `anyhow` for context.

use thiserror::Error;

/// Malformed method descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed descriptor: {0:?}")]
pub struct DescriptorError(pub String);

/// Structural class file failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClassFileError {
    #[error("unexpected end of class file")]
    UnexpectedEof,
    #[error("invalid magic: {0:#x}")]
    InvalidMagic(u32),
    #[error("invalid constant pool index: {0}")]
    InvalidConstantPoolIndex(u16),
    #[error("invalid constant pool tag: {0}")]
    InvalidConstantPoolTag(u8),
    #[error("invalid UTF-8 in constant pool")]
    InvalidUtf8,
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),
    #[error("constant pool full")]
    ConstantPoolFull,
}

/// Failures of the instrumentation pass.
///
/// Per-method variants make a single method come out un-instrumented;
/// class-level variants fail the whole class.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error(transparent)]
    ClassFile(#[from] ClassFileError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error("unknown opcode {opcode:#04x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },
    #[error("branch target out of 16-bit range after insertion")]
    BranchOutOfRange,
    #[error("unsupported method construct: {0}")]
    Unsupported(&'static str),
    #[error("code size exceeds limit after insertion")]
    CodeTooLarge,
}

/// Filter configuration rejections.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("empty filter pattern")]
    EmptyPattern,
    #[error("filter pattern contains whitespace: {0:?}")]
    PatternWhitespace(String),
}

/// Attach handshake and command failures.
#[derive(Debug, Error)]
pub enum AttachError {
    #[error("no such process: {0}")]
    NoSuchProcess(i32),
    #[error("process {0} did not open an attach socket")]
    NotAttachable(i32),
    #[error("attach handshake rejected: status {0}")]
    HandshakeRejected(i32),
    #[error("agent load failed: {0}")]
    AgentLoadFailure(String),
    #[error("management agent not loaded in target; load the agent first")]
    AgentNotLoaded,
    #[error("self-attach helper failed: {0}")]
    SelfAttach(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Control protocol failures, both client and server side.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("argument count {args} does not match signature count {signature}")]
    SignatureMismatch { args: usize, signature: usize },
    #[error("malformed connector address: {0:?}")]
    BadAddress(String),
    #[error("remote invocation failed: {0}")]
    RemoteInvocationFailure(String),
    #[error("unknown bean: {0:?}")]
    UnknownBean(String),
    #[error("unknown operation {operation:?} on bean {bean:?}")]
    UnknownOperation { bean: String, operation: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// In-process agent failures around the JVM TI and JNI seams.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{func} failed with JVM TI error {code}")]
    Jvmti { func: &'static str, code: i32 },
    #[error("JNI {0} failed")]
    Jni(&'static str),
    #[error("vtable slot {0} is absent")]
    MissingSlot(&'static str),
    #[error("agent already loaded in this process")]
    AlreadyLoaded,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    ClassFile(#[from] ClassFileError),
    #[error(transparent)]
    Control(#[from] ControlError),
}

/// Monitoring layer failures.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("monitoring halted after a poll panic")]
    Halted,
    #[error("operation canceled")]
    Canceled,
    #[error(transparent)]
    Attach(#[from] AttachError),
    #[error(transparent)]
    Control(#[from] ControlError),
}
