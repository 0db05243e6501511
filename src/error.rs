use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed frame: unsupported opcode, unset FIN or an unmasked client frame.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The peer went away before a close frame was exchanged.
    #[error("connection aborted by peer")]
    ConnectionAbort,

    #[error("session identity mismatch")]
    IdentityMismatch,

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// Raised back to the code driving a progress bar when the browser
    /// asks for the tracked activity to stop.
    #[error("progress bar aborted: {0}")]
    Abort(String),

    #[error("a progress bar is already showing")]
    ProgressBarInUse,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Reading a frame off a socket that the peer dropped shows up as one of
    /// a handful of I/O kinds. Those all mean the same thing to the pump.
    pub(crate) fn from_read(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe => Error::ConnectionAbort,
            _ => Error::Io(err),
        }
    }
}

/// Locks a mutex, recovering the data if another thread panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
