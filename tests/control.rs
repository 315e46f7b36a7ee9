//! Control protocol end to end over a loopback unix socket.

use std::sync::Arc;

use serde_json::Value;
use tempfile::tempdir;

use jvmmon::control::{
    invoke_remote_operation, ControlServer, Dispatcher, ProfilerBean,
};
use jvmmon::error::ControlError;
use jvmmon::monitor::threads::{ThreadDumpSource, ThreadSnapshot, ThreadState, ThreadingBean};
use jvmmon::profiler::Profiler;
use jvmmon::rewriter::RewriteConfig;

struct CannedDump(Vec<ThreadSnapshot>);

impl ThreadDumpSource for CannedDump {
    fn dump(&self) -> Vec<ThreadSnapshot> {
        self.0.clone()
    }
}

fn deadlocked_pair() -> Vec<ThreadSnapshot> {
    let mut t1 = ThreadSnapshot::new("T1", ThreadState::Blocked);
    t1.lock_name = Some("java.lang.Object".to_string());
    t1.lock_owner = Some("T2".to_string());
    let mut t2 = ThreadSnapshot::new("T2", ThreadState::Blocked);
    t2.lock_name = Some("java.lang.Object".to_string());
    t2.lock_owner = Some("T1".to_string());
    vec![t1, t2]
}

fn serve(dispatcher: Dispatcher) -> (tempfile::TempDir, String) {
    let dir = tempdir().unwrap();
    let server = ControlServer::bind(dir.path().join("ctl.sock")).unwrap();
    let address = server.spawn(Arc::new(dispatcher));
    (dir, address)
}

#[test]
fn profiler_operations_round_trip() {
    let profiler = Arc::new(Profiler::new(RewriteConfig::default()));
    let mut dispatcher = Dispatcher::new();
    dispatcher.register("Profiler", Arc::new(ProfilerBean::new(profiler.clone())));
    let (_dir, address) = serve(dispatcher);

    let value = invoke_remote_operation(&address, "Profiler", "getMeasurements", &[], &[]).unwrap();
    assert_eq!(value, Value::Array(Vec::new()));

    invoke_remote_operation(
        &address,
        "Profiler",
        "setFilter",
        &["com.example.*".to_string(), "com.example.gen.*".to_string()],
        &["java.lang.String".to_string(), "java.lang.String".to_string()],
    )
    .unwrap();
    assert!(profiler.filter().matches("com/example/Demo"));
    assert!(!profiler.filter().matches("com/example/gen/Stub"));

    // state of a class nobody loaded yet is null
    let state = invoke_remote_operation(
        &address,
        "Profiler",
        "getState",
        &["com/example/Demo".to_string()],
        &["java.lang.String".to_string()],
    )
    .unwrap();
    assert_eq!(state, Value::Null);
}

#[test]
fn thread_dump_marks_deadlocks_on_the_wire() {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register(
        "Threading",
        Arc::new(ThreadingBean::new(Arc::new(CannedDump(deadlocked_pair())))),
    );
    let (_dir, address) = serve(dispatcher);

    let value = invoke_remote_operation(&address, "Threading", "dump", &[], &[]).unwrap();
    let threads = value.as_array().unwrap();
    assert_eq!(threads.len(), 2);
    for t in threads {
        assert_eq!(t["deadlocked"], Value::Bool(true));
    }
}

#[test]
fn unknown_bean_is_one_error_response_not_a_dead_server() {
    let dispatcher = Dispatcher::new();
    let (_dir, address) = serve(dispatcher);

    let err = invoke_remote_operation(&address, "Nope", "anything", &[], &[]).unwrap_err();
    assert!(matches!(err, ControlError::RemoteInvocationFailure(_)));

    // the server survived the bad request
    let err = invoke_remote_operation(&address, "Nope", "again", &[], &[]).unwrap_err();
    assert!(matches!(err, ControlError::RemoteInvocationFailure(_)));
}

#[test]
fn argument_signature_mismatch_never_reaches_the_socket() {
    let err = invoke_remote_operation(
        "jvmmon:unix:/nonexistent/socket",
        "Profiler",
        "setFilter",
        &["a".to_string()],
        &[],
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ControlError::SignatureMismatch { args: 1, signature: 0 }
    ));
}
