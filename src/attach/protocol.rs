//! HotSpot attach wire protocol, Linux flavor.
//!
//! One command per connection on the `/tmp/.java_pid<pid>` unix socket.
//! The request is protocol version `1`, the command name and exactly three
//! argument slots, each NUL-terminated. The reply is a decimal status line
//! followed by the command's output.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AttachError;

const PROTOCOL_VERSION: &str = "1";
const ARG_SLOTS: usize = 3;
const IO_TIMEOUT: Duration = Duration::from_secs(10);

pub fn socket_path(pid: i32) -> PathBuf {
    PathBuf::from(format!("/tmp/.java_pid{pid}"))
}

pub fn socket_exists(pid: i32) -> bool {
    socket_path(pid).exists()
}

/// Response to one attach command: the attach listener's own status plus
/// everything it printed after the status line.
#[derive(Debug)]
pub struct CommandReply {
    pub status: i32,
    pub payload: String,
}

pub fn execute(pid: i32, command: &str, args: &[&str]) -> Result<CommandReply, AttachError> {
    execute_on(&socket_path(pid), command, args)
}

pub(crate) fn execute_on(
    path: &std::path::Path,
    command: &str,
    args: &[&str],
) -> Result<CommandReply, AttachError> {
    debug_assert!(args.len() <= ARG_SLOTS);
    let mut stream = UnixStream::connect(path)?;
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    stream.set_write_timeout(Some(IO_TIMEOUT))?;

    let mut request = Vec::new();
    request.extend_from_slice(PROTOCOL_VERSION.as_bytes());
    request.push(0);
    request.extend_from_slice(command.as_bytes());
    request.push(0);
    for i in 0..ARG_SLOTS {
        if let Some(arg) = args.get(i) {
            request.extend_from_slice(arg.as_bytes());
        }
        request.push(0);
    }
    stream.write_all(&request)?;

    let mut response = String::new();
    stream.read_to_string(&mut response)?;

    let (status_line, payload) = match response.split_once('\n') {
        Some((s, p)) => (s, p.to_string()),
        None => (response.as_str(), String::new()),
    };
    let status: i32 = status_line
        .trim()
        .parse()
        .map_err(|_| AttachError::HandshakeRejected(-1))?;
    Ok(CommandReply { status, payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixListener;

    #[test]
    fn request_framing_and_reply_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = Vec::new();
            // request ends when the client is done writing; read until the
            // five expected NULs have arrived
            let mut byte = [0u8; 1];
            while buf.iter().filter(|&&b| b == 0).count() < 5 {
                conn.read_exact(&mut byte).unwrap();
                buf.push(byte[0]);
            }
            conn.write_all(b"0\nkey=value\n").unwrap();
            buf
        });

        let reply = execute_on(&path, "properties", &[]).unwrap();
        assert_eq!(reply.status, 0);
        assert_eq!(reply.payload, "key=value\n");

        let request = server.join().unwrap();
        assert_eq!(request, b"1\0properties\0\0\0\0");
    }

    #[test]
    fn nonzero_status_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = [0u8; 256];
            let _ = conn.read(&mut buf).unwrap();
            conn.write_all(b"101\n").unwrap();
        });
        let reply = execute_on(&path, "load", &["x", "true", ""]).unwrap();
        assert_eq!(reply.status, 101);
        server.join().unwrap();
    }
}
