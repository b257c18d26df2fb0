use std::io;
use std::path::PathBuf;

/// Everything that can go wrong and still propagate.
///
/// Invariant breaks inside engine callbacks never reach this type; they
/// abort the process on the spot, since the callback runs on a server-owned
/// thread with no caller to report to.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("audio engine: {0}")]
    Engine(#[from] jack::Error),

    #[error("cannot read patch file {path}: {source}")]
    PatchRead { path: PathBuf, source: io::Error },

    #[error("patch parse error: unexpected token {token:?}")]
    PatchToken { token: String },

    #[error("patch parse error: incomplete connection at end of input")]
    PatchTruncated,

    #[error("cannot scan child root {path}: {source}")]
    ChildRoot { path: PathBuf, source: io::Error },

    #[error("cannot install signal handlers: {0}")]
    Signals(io::Error),

    #[error("no such port: {0}")]
    UnknownPort(String),

    #[error("port {port} has unsupported type {port_type:?}")]
    UnsupportedPortType { port: String, port_type: String },

    #[error("port {0} is not exactly one of input/output")]
    AmbiguousDirection(String),

    #[error("event bus closed with producers still expected")]
    BusClosed,
}
