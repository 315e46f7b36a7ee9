//! Management/control protocol.
//!
//! The injected agent serves a unix socket; one request per connection,
//! newline-delimited JSON both ways. The socket path is published in the
//! target VM's system properties as a `jvmmon:unix:<path>` address, which
//! the bridge reads through the attach `properties` command.
//!
//! Request: `{"bean": ..., "operation": ..., "args": [...], "signature": [...]}`.
//! Response: `{"ok": true, "value": ...}` or `{"ok": false, "error": "..."}`.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ControlError;
use crate::profiler::Profiler;

const ADDRESS_SCHEME: &str = "jvmmon:unix:";
const IO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub bean: String,
    pub operation: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub signature: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn format_address(path: &Path) -> String {
    format!("{ADDRESS_SCHEME}{}", path.display())
}

pub fn parse_address(address: &str) -> Result<PathBuf, ControlError> {
    address
        .strip_prefix(ADDRESS_SCHEME)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| ControlError::BadAddress(address.to_string()))
}

/// Performs exactly one remote operation. The argument list must line up
/// with the signature before any I/O happens; there are no retries.
pub fn invoke_remote_operation(
    address: &str,
    bean: &str,
    operation: &str,
    args: &[String],
    signature: &[String],
) -> Result<Value, ControlError> {
    if args.len() != signature.len() {
        return Err(ControlError::SignatureMismatch {
            args: args.len(),
            signature: signature.len(),
        });
    }
    let path = parse_address(address)?;
    let request = InvokeRequest {
        bean: bean.to_string(),
        operation: operation.to_string(),
        args: args.to_vec(),
        signature: signature.to_vec(),
    };

    let mut stream = UnixStream::connect(&path)?;
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    stream.set_write_timeout(Some(IO_TIMEOUT))?;
    let mut frame = serde_json::to_vec(&request)?;
    frame.push(b'\n');
    stream.write_all(&frame)?;

    let mut line = String::new();
    BufReader::new(stream).read_line(&mut line)?;
    let response: InvokeResponse = serde_json::from_str(&line)?;
    if response.ok {
        Ok(response.value.unwrap_or(Value::Null))
    } else {
        Err(ControlError::RemoteInvocationFailure(
            response.error.unwrap_or_else(|| "unspecified".to_string()),
        ))
    }
}

/// One named operation target.
pub trait Bean: Send + Sync {
    fn invoke(&self, operation: &str, args: &[String]) -> Result<Value, ControlError>;
}

/// Routes requests to registered beans.
#[derive(Default)]
pub struct Dispatcher {
    beans: HashMap<String, Arc<dyn Bean>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, bean: Arc<dyn Bean>) {
        self.beans.insert(name.to_string(), bean);
    }

    pub fn dispatch(&self, request: &InvokeRequest) -> Result<Value, ControlError> {
        if request.args.len() != request.signature.len() {
            return Err(ControlError::SignatureMismatch {
                args: request.args.len(),
                signature: request.signature.len(),
            });
        }
        let bean = self
            .beans
            .get(&request.bean)
            .ok_or_else(|| ControlError::UnknownBean(request.bean.clone()))?;
        bean.invoke(&request.operation, &request.args)
    }
}

/// The in-process control endpoint.
pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
}

impl ControlServer {
    /// Binds a fresh socket. A stale file from a crashed predecessor is
    /// removed first.
    pub fn bind(path: PathBuf) -> Result<Self, ControlError> {
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path)?;
        Ok(Self { listener, path })
    }

    /// Socket path in a directory the current process can write.
    pub fn default_path() -> PathBuf {
        std::env::temp_dir().join(format!(".jvmmon_ctl_{}", std::process::id()))
    }

    pub fn address(&self) -> String {
        format_address(&self.path)
    }

    /// Accept loop. A failed request produces one error response and never
    /// takes the server down; an accept error ends the loop.
    pub fn serve(self, dispatcher: Arc<Dispatcher>) {
        for conn in self.listener.incoming() {
            match conn {
                Ok(stream) => {
                    if let Err(e) = handle_connection(stream, &dispatcher) {
                        debug!("control connection error: {e}");
                    }
                }
                Err(e) => {
                    warn!("control server accept failed: {e}");
                    break;
                }
            }
        }
        let _ = std::fs::remove_file(&self.path);
    }

    /// Spawns the accept loop on a background thread and returns the
    /// published address.
    pub fn spawn(self, dispatcher: Arc<Dispatcher>) -> String {
        let address = self.address();
        std::thread::Builder::new()
            .name("jvmmon-control".to_string())
            .spawn(move || self.serve(dispatcher))
            .map(|_| ())
            .unwrap_or_else(|e| warn!("control server thread failed to start: {e}"));
        address
    }
}

fn handle_connection(stream: UnixStream, dispatcher: &Dispatcher) -> Result<(), ControlError> {
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    stream.set_write_timeout(Some(IO_TIMEOUT))?;
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Ok(());
    }

    let response = match serde_json::from_str::<InvokeRequest>(&line) {
        Ok(request) => match dispatcher.dispatch(&request) {
            Ok(value) => InvokeResponse { ok: true, value: Some(value), error: None },
            Err(e) => InvokeResponse { ok: false, value: None, error: Some(e.to_string()) },
        },
        Err(e) => InvokeResponse {
            ok: false,
            value: None,
            error: Some(format!("malformed request: {e}")),
        },
    };

    let mut stream = reader.into_inner();
    let mut frame = serde_json::to_vec(&response)?;
    frame.push(b'\n');
    stream.write_all(&frame)?;
    Ok(())
}

/// Control surface of the profiler: measurements, reset, filter and
/// per-class state.
pub struct ProfilerBean {
    profiler: Arc<Profiler>,
}

impl ProfilerBean {
    pub fn new(profiler: Arc<Profiler>) -> Self {
        Self { profiler }
    }
}

impl Bean for ProfilerBean {
    fn invoke(&self, operation: &str, args: &[String]) -> Result<Value, ControlError> {
        match operation {
            "getMeasurements" => Ok(serde_json::to_value(self.profiler.measurements())?),
            "reset" => {
                self.profiler.reset_measurements();
                Ok(Value::Null)
            }
            "setFilter" => {
                let includes = split_patterns(args.first());
                let excludes = split_patterns(args.get(1));
                self.profiler
                    .configure_filter(includes, excludes)
                    .map_err(|e| ControlError::RemoteInvocationFailure(e.to_string()))?;
                Ok(Value::Null)
            }
            "getState" => {
                let class = args.first().cloned().unwrap_or_default();
                Ok(serde_json::to_value(self.profiler.class_state(&class))?)
            }
            other => Err(ControlError::UnknownOperation {
                bean: "Profiler".to_string(),
                operation: other.to_string(),
            }),
        }
    }
}

fn split_patterns(arg: Option<&String>) -> Vec<String> {
    arg.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_round_trip() {
        let path = PathBuf::from("/tmp/.jvmmon_ctl_1");
        let addr = format_address(&path);
        assert_eq!(addr, "jvmmon:unix:/tmp/.jvmmon_ctl_1");
        assert_eq!(parse_address(&addr).unwrap(), path);
    }

    #[test]
    fn bad_addresses_are_rejected() {
        for bad in ["", "unix:/tmp/x", "jvmmon:unix:", "service:jmx:rmi"] {
            assert!(matches!(parse_address(bad), Err(ControlError::BadAddress(_))));
        }
    }

    #[test]
    fn signature_mismatch_fails_before_io() {
        // address is unparseable too, but the count check must fire first
        let err = invoke_remote_operation(
            "bogus",
            "Profiler",
            "setFilter",
            &["a".to_string(), "b".to_string()],
            &["java.lang.String".to_string()],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ControlError::SignatureMismatch { args: 2, signature: 1 }
        ));
    }

    #[test]
    fn dispatcher_reports_unknown_targets() {
        let mut d = Dispatcher::new();
        d.register("Profiler", Arc::new(ProfilerBean::new(Arc::new(Profiler::default()))));
        let req = InvokeRequest {
            bean: "Nope".to_string(),
            operation: "x".to_string(),
            args: vec![],
            signature: vec![],
        };
        assert!(matches!(d.dispatch(&req), Err(ControlError::UnknownBean(_))));

        let req = InvokeRequest {
            bean: "Profiler".to_string(),
            operation: "bogus".to_string(),
            args: vec![],
            signature: vec![],
        };
        assert!(matches!(d.dispatch(&req), Err(ControlError::UnknownOperation { .. })));
    }
}
