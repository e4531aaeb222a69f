//! # nvc-rpc
//!
//! Privileged RPC transport: one client paired with one
//! forked helper process over an `AF_UNIX/SOCK_STREAM` socketpair.
//!
//! The wire format is a length-prefixed JSON envelope rather than an
//! ONC/XDR stub dispatcher generated at build time; `serde_json` gives
//! the same "typed call, typed result" shape without a code generator.
//!
//! ```text
//!   [fresh] --fork()-->  [running] --rpc:shutdown--> [drained] --_exit-->  [reaped]
//!                          |                                                 ^
//!                          +--SIGTERM→SIGKILL→waitpid, force-reap------------+
//! ```

use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use serde::{de::DeserializeOwned, Serialize};
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub type Result<T> = std::result::Result<T, RpcError>;

#[derive(thiserror::Error, Debug)]
pub enum RpcError {
    #[error("rpc transport error: {0}")]
    Transport(String),
    #[error("rpc marshalling error: {0}")]
    Marshal(String),
    #[error("remote error (code {code}): {message}")]
    Remote { code: i32, message: String },
}

impl From<RpcError> for nvc_core::NvcError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::Transport(m) => nvc_core::NvcError::RpcTransport(m),
            RpcError::Marshal(m) => nvc_core::NvcError::RpcMarshal(m),
            RpcError::Remote { code, message } => nvc_core::NvcError::RemoteError { code, message },
        }
    }
}

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Reap-poll window before escalating from SIGTERM to SIGKILL.
const REAP_POLL_WINDOW: Duration = Duration::from_millis(10);

#[derive(Serialize, serde::Deserialize)]
struct Envelope {
    method: String,
    payload: serde_json::Value,
}

#[derive(Serialize, serde::Deserialize)]
struct Reply {
    ok: bool,
    payload: serde_json::Value,
    error_code: i32,
    error_message: String,
}

fn write_frame<W: Write>(w: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    let len = bytes.len() as u32;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(bytes)
}

fn read_frame<R: Read>(r: &mut R) -> std::io::Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    r.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// A request handler implemented by a helper process (driver helper or
/// cgroup helper each implement one of these).
pub trait RpcHandler {
    /// Dispatch a single call, returning either a success payload or a
    /// `(code, message)` remote error.
    fn dispatch(
        &mut self,
        method: &str,
        payload: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, (i32, String)>;
}

/// A live handle to a forked helper process, held by the privileged
/// coordinator.
pub struct RpcClient {
    sock: UnixStream,
    child: Pid,
    timeout: Duration,
}

fn ensure_sigpipe_ignored() {
    unsafe {
        let _ = signal::signal(Signal::SIGPIPE, SigHandler::SigIgn);
    }
}

impl RpcClient {
    /// Fork a helper process that serves `handler` in a blocking loop,
    /// and return the client half. The child sets
    /// `PR_SET_PDEATHSIG=SIGTERM` so a crashed coordinator cannot leave
    /// an orphaned helper behind.
    pub fn spawn<H, F>(build_handler: F) -> Result<Self>
    where
        H: RpcHandler,
        F: FnOnce() -> H,
    {
        ensure_sigpipe_ignored();
        let (parent_fd, child_fd) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::empty(),
        )
        .map_err(|e| RpcError::Transport(format!("socketpair: {e}")))?;

        match unsafe { fork() }.map_err(|e| RpcError::Transport(format!("fork: {e}")))? {
            ForkResult::Parent { child } => {
                drop(child_fd);
                let sock = unix_stream_from_owned_fd(parent_fd);
                debug!("spawned rpc helper pid={child}");
                Ok(RpcClient {
                    sock,
                    child,
                    timeout: DEFAULT_TIMEOUT,
                })
            }
            ForkResult::Child => {
                drop(parent_fd);
                unsafe {
                    libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
                }
                let mut handler = build_handler();
                let mut sock = unix_stream_from_owned_fd(child_fd);
                run_service_loop(&mut sock, &mut handler);
                std::process::exit(0);
            }
        }
    }

    /// Set the call timeout (default 10s).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Issue one RPC call, waiting up to `self.timeout` for a reply.
    pub fn call<P: Serialize, R: DeserializeOwned>(&mut self, method: &str, params: &P) -> Result<R> {
        let payload = serde_json::to_value(params).map_err(|e| RpcError::Marshal(e.to_string()))?;
        let envelope = Envelope {
            method: method.to_string(),
            payload,
        };
        let bytes = serde_json::to_vec(&envelope).map_err(|e| RpcError::Marshal(e.to_string()))?;

        self.sock
            .set_write_timeout(Some(self.timeout))
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        write_frame(&mut self.sock, &bytes).map_err(|e| RpcError::Transport(e.to_string()))?;

        self.sock
            .set_read_timeout(Some(self.timeout))
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        let reply_bytes = read_frame(&mut self.sock).map_err(|e| RpcError::Transport(format!("read reply: {e}")))?;
        let reply: Reply = serde_json::from_slice(&reply_bytes).map_err(|e| RpcError::Marshal(e.to_string()))?;

        if reply.ok {
            serde_json::from_value(reply.payload).map_err(|e| RpcError::Marshal(e.to_string()))
        } else {
            Err(RpcError::Remote {
                code: reply.error_code,
                message: reply.error_message,
            })
        }
    }

    /// Graceful shutdown: send a terminal RPC; if the helper doesn't
    /// drain in time, escalate to SIGTERM, a short `POLLRDHUP` wait,
    /// then SIGKILL, then reap.
    pub fn shutdown(mut self) -> Result<()> {
        let _: Result<serde_json::Value> = self.call("shutdown", &serde_json::Value::Null);
        self.force_reap()
    }

    fn force_reap(&mut self) -> Result<()> {
        match waitpid(self.child, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {}
            Ok(_) => return Ok(()),
            Err(_) => return Ok(()),
        }

        let _ = signal::kill(self.child, Signal::SIGTERM);
        std::thread::sleep(REAP_POLL_WINDOW);

        match waitpid(self.child, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {
                warn!("helper pid={} did not exit after SIGTERM, sending SIGKILL", self.child);
                let _ = signal::kill(self.child, Signal::SIGKILL);
                let _ = waitpid(self.child, None);
            }
            _ => {}
        }
        Ok(())
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        let _ = self.force_reap();
    }
}

fn run_service_loop<H: RpcHandler>(sock: &mut UnixStream, handler: &mut H) {
    loop {
        let bytes = match read_frame(sock) {
            Ok(b) => b,
            Err(_) => return, // parent closed the connection
        };
        let envelope: Envelope = match serde_json::from_slice(&bytes) {
            Ok(e) => e,
            Err(e) => {
                let _ = send_reply(sock, Err((-1, format!("bad envelope: {e}"))));
                continue;
            }
        };

        if envelope.method == "shutdown" {
            let _ = send_reply(sock, Ok(serde_json::Value::Null));
            return;
        }

        let result = handler.dispatch(&envelope.method, envelope.payload);
        if send_reply(sock, result).is_err() {
            return;
        }
    }
}

fn send_reply(
    sock: &mut UnixStream,
    result: std::result::Result<serde_json::Value, (i32, String)>,
) -> std::io::Result<()> {
    let reply = match result {
        Ok(payload) => Reply {
            ok: true,
            payload,
            error_code: 0,
            error_message: String::new(),
        },
        Err((code, message)) => Reply {
            ok: false,
            payload: serde_json::Value::Null,
            error_code: code,
            error_message: message,
        },
    };
    let bytes = serde_json::to_vec(&reply).unwrap_or_default();
    write_frame(sock, &bytes)
}

fn unix_stream_from_owned_fd(fd: OwnedFd) -> UnixStream {
    let raw: RawFd = fd.as_raw_fd();
    std::mem::forget(fd);
    unsafe { UnixStream::from_raw_fd(raw) }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;
    impl RpcHandler for EchoHandler {
        fn dispatch(
            &mut self,
            method: &str,
            payload: serde_json::Value,
        ) -> std::result::Result<serde_json::Value, (i32, String)> {
            match method {
                "echo" => Ok(payload),
                "boom" => Err((42, "kaboom".into())),
                _ => Err((-1, format!("unknown method {method}"))),
            }
        }
    }

    #[test]
    fn echo_round_trips_through_the_forked_helper() {
        let mut client = RpcClient::spawn(|| EchoHandler).expect("spawn helper");
        let reply: String = client.call("echo", &"hello".to_string()).expect("call");
        assert_eq!(reply, "hello");
        client.shutdown().expect("shutdown");
    }

    #[test]
    fn remote_error_is_surfaced_with_its_code() {
        let mut client = RpcClient::spawn(|| EchoHandler).expect("spawn helper");
        let err = client.call::<_, serde_json::Value>("boom", &()).unwrap_err();
        match err {
            RpcError::Remote { code, message } => {
                assert_eq!(code, 42);
                assert_eq!(message, "kaboom");
            }
            other => panic!("expected Remote error, got {other:?}"),
        }
        client.shutdown().expect("shutdown");
    }
}
