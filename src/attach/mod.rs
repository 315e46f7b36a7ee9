//! Attaching to a running HotSpot JVM.
//!
//! The handshake mirrors what the JDK's own tooling does on Linux: drop a
//! `.attach_pid<pid>` marker where the target can see it, poke the VM with
//! SIGQUIT, then wait for the attach listener to open its unix socket.
//! [`AttachSession`] detaches in `Drop`, so every exit path out of a
//! bridge operation releases the target exactly once.

pub mod protocol;

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::AttachError;

pub use protocol::CommandReply;

/// System property under which the in-process agent publishes its control
/// socket address.
pub const CONNECTOR_PROPERTY: &str = "jvmmon.connector.address";

const ATTACH_POLLS: u32 = 50;
const ATTACH_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct VirtualMachine;

impl VirtualMachine {
    /// Attaches to `pid`, forcing the attach listener up if it is not
    /// already listening.
    pub fn attach(pid: i32) -> Result<AttachSession, AttachError> {
        let proc_dir = PathBuf::from(format!("/proc/{pid}"));
        if !proc_dir.exists() {
            return Err(AttachError::NoSuchProcess(pid));
        }
        if protocol::socket_exists(pid) {
            return Ok(AttachSession::new(pid, None));
        }

        // The attach file lands in the target's working directory when we
        // can write there, otherwise in /tmp, which the VM also checks.
        let in_cwd = proc_dir.join("cwd").join(format!(".attach_pid{pid}"));
        let marker = match fs::File::create(&in_cwd) {
            Ok(_) => in_cwd,
            Err(_) => {
                let fallback = PathBuf::from(format!("/tmp/.attach_pid{pid}"));
                fs::File::create(&fallback)?;
                fallback
            }
        };
        debug!("attach marker at {}", marker.display());

        // SIGQUIT makes the VM inspect the marker and start its listener.
        let rc = unsafe { libc::kill(pid, libc::SIGQUIT) };
        if rc != 0 {
            let _ = fs::remove_file(&marker);
            return Err(AttachError::NoSuchProcess(pid));
        }

        for _ in 0..ATTACH_POLLS {
            if protocol::socket_exists(pid) {
                return Ok(AttachSession::new(pid, Some(marker)));
            }
            if !proc_dir.exists() {
                let _ = fs::remove_file(&marker);
                return Err(AttachError::NoSuchProcess(pid));
            }
            thread::sleep(ATTACH_POLL_INTERVAL);
        }
        let _ = fs::remove_file(&marker);
        Err(AttachError::NotAttachable(pid))
    }
}

/// A live attach to one JVM. Dropping the session detaches; `detach` can
/// be called early to observe cleanup errors.
pub struct AttachSession {
    pid: i32,
    marker: Option<PathBuf>,
    detached: bool,
    detach_hook: Option<Box<dyn FnOnce() + Send>>,
}

impl AttachSession {
    fn new(pid: i32, marker: Option<PathBuf>) -> Self {
        info!("attached to pid {pid}");
        Self { pid, marker, detached: false, detach_hook: None }
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Registers a callback invoked exactly once when the session detaches,
    /// whether explicitly or in `Drop`.
    pub fn on_detach(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.detach_hook = Some(Box::new(hook));
    }

    /// Loads a native agent library into the target.
    pub fn load(&self, agent_path: &str, options: &str) -> Result<(), AttachError> {
        let reply = protocol::execute(self.pid, "load", &[agent_path, "true", options])?;
        if reply.status != 0 {
            return Err(AttachError::AgentLoadFailure(format!(
                "attach status {}",
                reply.status
            )));
        }
        // The listener echoes the Agent_OnAttach return code.
        let agent_rc = reply.payload.trim();
        if !agent_rc.is_empty() && agent_rc != "0" && !agent_rc.starts_with("return code: 0") {
            return Err(AttachError::AgentLoadFailure(agent_rc.to_string()));
        }
        Ok(())
    }

    /// System properties of the target as key/value pairs.
    pub fn properties(&self) -> Result<HashMap<String, String>, AttachError> {
        let reply = protocol::execute(self.pid, "properties", &[])?;
        if reply.status != 0 {
            return Err(AttachError::HandshakeRejected(reply.status));
        }
        Ok(parse_properties(&reply.payload))
    }

    /// Runs a diagnostic command in the target, as `jcmd` would.
    pub fn jcmd(&self, command: &str) -> Result<String, AttachError> {
        let reply = protocol::execute(self.pid, "jcmd", &[command])?;
        if reply.status != 0 {
            return Err(AttachError::HandshakeRejected(reply.status));
        }
        Ok(reply.payload)
    }

    /// Heap histogram by spawning `jmap -histo` against the target; the
    /// one diagnostic here that goes through an external JDK tool rather
    /// than the attach socket.
    pub fn heap_histogram(&self, live_only: bool) -> Result<String, AttachError> {
        let mut cmd = Command::new("jmap");
        if live_only {
            cmd.arg("-histo:live");
        } else {
            cmd.arg("-histo");
        }
        let output = cmd.arg(self.pid.to_string()).output()?;
        if !output.status.success() {
            return Err(AttachError::AgentLoadFailure(format!(
                "jmap exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Detaches explicitly. Safe to call at most once; `Drop` covers every
    /// other path.
    pub fn detach(mut self) -> Result<(), AttachError> {
        self.detach_impl();
        Ok(())
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    fn detach_impl(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        if let Some(marker) = self.marker.take() {
            let _ = fs::remove_file(marker);
        }
        if let Some(hook) = self.detach_hook.take() {
            hook();
        }
        debug!("detached from pid {}", self.pid);
    }
}

impl Drop for AttachSession {
    fn drop(&mut self) {
        self.detach_impl();
    }
}

fn parse_properties(payload: &str) -> HashMap<String, String> {
    payload
        .lines()
        .filter(|l| !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (unescape_property(k), unescape_property(v)))
        .collect()
}

/// The listener emits java.util.Properties store format; the escapes that
/// actually show up in practice are `\:`, `\=`, `\\` and `\n`.
fn unescape_property(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// A JVM process visible in /proc.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JvmProcess {
    pub pid: i32,
    /// Main class or jar with launcher options stripped.
    pub display: String,
}

/// Scans /proc for attachable JVMs. Diagnostic helpers that are themselves
/// JVMs (jmap, jcmd, jstack) are skipped, like the original tooling does.
pub fn list_candidate_processes() -> Vec<JvmProcess> {
    let Ok(entries) = fs::read_dir("/proc") else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for entry in entries.flatten() {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|n| n.parse::<i32>().ok())
        else {
            continue;
        };
        let Ok(cmdline) = fs::read(entry.path().join("cmdline")) else {
            continue;
        };
        let argv: Vec<&str> = cmdline
            .split(|&b| b == 0)
            .filter(|s| !s.is_empty())
            .filter_map(|s| std::str::from_utf8(s).ok())
            .collect();
        if let Some(display) = jvm_display_name(&argv) {
            out.push(JvmProcess { pid, display });
        }
    }
    out.sort_by_key(|p| p.pid);
    out
}

/// `Some(display)` when argv looks like a java launcher invocation.
fn jvm_display_name(argv: &[&str]) -> Option<String> {
    let launcher = argv.first()?;
    let base = launcher.rsplit('/').next()?;
    if base != "java" {
        return None;
    }
    // skip VM flags; -cp/-classpath/--class-path/--module-path eat a value
    let mut i = 1;
    while i < argv.len() {
        let arg = argv[i];
        if matches!(arg, "-cp" | "-classpath" | "--class-path" | "-p" | "--module-path") {
            i += 2;
            continue;
        }
        if arg == "-jar" {
            return argv.get(i + 1).map(|s| s.to_string());
        }
        if arg.starts_with('-') {
            i += 1;
            continue;
        }
        if matches!(arg, "jmap" | "jcmd" | "jstack" | "jinfo") {
            return None;
        }
        return Some(arg.to_string());
    }
    None
}

/// Loads the agent into a target VM, with self-attach routed through a
/// child process: a VM cannot handshake with itself, so attaching to our
/// own pid delegates to a freshly spawned `jvmmon-load`.
pub struct AgentLoader;

impl AgentLoader {
    pub fn load(pid: i32, agent_path: &str, options: &str) -> Result<(), AttachError> {
        if pid == std::process::id() as i32 {
            return Self::load_via_child(pid, agent_path, options);
        }
        let session = VirtualMachine::attach(pid)?;
        session.load(agent_path, options)?;
        session.detach()
    }

    fn load_via_child(pid: i32, agent_path: &str, options: &str) -> Result<(), AttachError> {
        let helper = helper_binary("jvmmon-load");
        let mut cmd = Command::new(helper);
        cmd.arg(pid.to_string()).arg(agent_path);
        if !options.is_empty() {
            cmd.arg("--options").arg(options);
        }
        let output = cmd.output().map_err(|e| AttachError::SelfAttach(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!("self-attach helper exited with {}: {stderr}", output.status);
            return Err(AttachError::SelfAttach(stderr));
        }
        Ok(())
    }
}

/// Resolves a sibling helper binary next to the current executable,
/// falling back to PATH lookup.
fn helper_binary(name: &str) -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|d| d.join(name)))
        .filter(|p| p.exists())
        .unwrap_or_else(|| PathBuf::from(name))
}

/// Address of the control endpoint the injected agent serves, read from
/// the target's system properties. Idempotent; fails when the agent has
/// not been loaded yet.
pub fn local_connector_address(session: &AttachSession) -> Result<String, AttachError> {
    let props = session.properties()?;
    props
        .get(CONNECTOR_PROPERTY)
        .cloned()
        .ok_or(AttachError::AgentNotLoaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_parsing_unescapes() {
        let props = parse_properties("#comment\njava.home=/opt/jdk\nconn=jvmmon\\:unix\\:/tmp/s\n");
        assert_eq!(props["java.home"], "/opt/jdk");
        assert_eq!(props["conn"], "jvmmon:unix:/tmp/s");
        assert!(!props.contains_key("#comment"));
    }

    #[test]
    fn display_name_skips_flags_and_classpath() {
        let argv = ["/usr/bin/java", "-Xmx2g", "-cp", "a.jar:b.jar", "com.example.Main", "arg"];
        assert_eq!(jvm_display_name(&argv).as_deref(), Some("com.example.Main"));
    }

    #[test]
    fn display_name_handles_jar_launch() {
        let argv = ["java", "-jar", "app.jar", "arg"];
        assert_eq!(jvm_display_name(&argv).as_deref(), Some("app.jar"));
    }

    #[test]
    fn non_java_and_tool_processes_are_rejected() {
        assert_eq!(jvm_display_name(&["/usr/bin/python3", "x.py"]), None);
        assert_eq!(jvm_display_name(&["java", "jmap", "-heap", "1"]), None);
        assert_eq!(jvm_display_name(&["java", "-version"]), None);
    }

    #[test]
    fn detach_hook_fires_exactly_once() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let calls = Arc::new(AtomicU32::new(0));
        {
            let mut session = AttachSession::new(1, None);
            let calls = calls.clone();
            session.on_detach(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            });
            // dropped here
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let calls2 = Arc::new(AtomicU32::new(0));
        let mut session = AttachSession::new(1, None);
        {
            let calls2 = calls2.clone();
            session.on_detach(move || {
                calls2.fetch_add(1, Ordering::SeqCst);
            });
        }
        session.detach().unwrap();
        assert_eq!(calls2.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn attach_to_missing_process_fails_cleanly() {
        // pid 0 never has a /proc entry on Linux
        match VirtualMachine::attach(0) {
            Err(err) => assert!(matches!(err, AttachError::NoSuchProcess(0))),
            Ok(_) => panic!("attach to pid 0 succeeded"),
        }
    }
}
