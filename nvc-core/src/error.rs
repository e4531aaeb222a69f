//! Error taxonomy shared by every crate in the workspace.

use thiserror::Error;

/// The single error type returned by every fallible operation in nvc-rs.
///
/// Each variant corresponds to one row of the error taxonomy table in the
/// specification. Call sites construct the most specific variant available;
/// nothing here is a catch-all "other" bucket.
#[derive(Error, Debug)]
pub enum NvcError {
    #[error("path invalid: {0}")]
    PathInvalid(String),

    #[error("path escapes root: {0}")]
    PathEscape(String),

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("mount operation failed: {0}")]
    Mount(String),

    #[error("existing node type conflicts with requested type at {0}")]
    TypeConflict(String),

    #[error("device mismatch: expected {expected}, found {found}")]
    DeviceMismatch { expected: String, found: String },

    #[error("device cgroup not found: {0}")]
    CgroupNotFound(String),

    #[error("cgroup i/o error: {0}")]
    CgroupIo(String),

    #[error("rpc transport error: {0}")]
    RpcTransport(String),

    #[error("rpc marshalling error: {0}")]
    RpcMarshal(String),

    #[error("remote error (code {code}): {message}")]
    RemoteError { code: i32, message: String },

    #[error("capability operation failed: {0}")]
    Capability(String),

    #[error("seccomp setup failed: {0}")]
    Seccomp(String),

    #[error("exec failed: {0}")]
    ExecFailed(String),

    #[error("ldconfig exited with a nonzero status: {0}")]
    LdconfigFailed(i32),

    #[error("child process killed by signal {0}")]
    KilledBySignal(i32),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

/// The crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, NvcError>;

impl NvcError {
    /// Wrap a std::io::Error with the path that produced it.
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        NvcError::Io {
            path: path.into(),
            source,
        }
    }
}
