//! Command-line behavior of the two helper binaries.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn load_rejects_a_non_numeric_pid() {
    Command::cargo_bin("jvmmon-load")
        .unwrap()
        .args(["abc", "/tmp/libjvmmon.so"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid pid: abc"))
        .stdout(predicate::str::contains("agent loaded").not());
}

#[test]
fn load_rejects_a_negative_pid() {
    Command::cargo_bin("jvmmon-load")
        .unwrap()
        .args(["--", "-5", "/tmp/libjvmmon.so"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid pid: -5"));
}

#[test]
fn load_requires_the_agent_artifact_to_exist() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("libjvmmon.so");
    Command::cargo_bin("jvmmon-load")
        .unwrap()
        .args(["1", missing.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("agent library not found"));
}

#[test]
fn invoke_rejects_mismatched_argument_counts() {
    Command::cargo_bin("jvmmon-invoke")
        .unwrap()
        .args([
            "1",
            "Profiler",
            "setFilter",
            "--args",
            "com.example.*",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("counts must match"));
}

#[test]
fn invoke_rejects_a_non_numeric_pid() {
    Command::cargo_bin("jvmmon-invoke")
        .unwrap()
        .args(["zero", "Profiler", "getMeasurements"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid pid: zero"));
}

#[test]
fn attaching_to_a_missing_process_reports_the_pid() {
    let dir = tempfile::tempdir().unwrap();
    let agent = dir.path().join("libjvmmon.so");
    std::fs::write(&agent, b"not really a library").unwrap();

    // 2^22 is above the default pid_max, so nothing can own it
    Command::cargo_bin("jvmmon-load")
        .unwrap()
        .args(["4194304", agent.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("4194304"));
}
