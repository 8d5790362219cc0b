//! Structured error types for threadtrace
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! None of these escape the public capture/resolve API: they are logged and
//! turned into empty results or sentinel symbols at the boundary.

use super::types::Tid;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Failed to list threads of the current process: {0}")]
    ThreadListFailed(String),

    #[error("Failed to rename thread: {0}")]
    RenameFailed(String),

    #[error("Failed to install capture signal handler (errno {0})")]
    SignalInstallFailed(i32),

    #[error("Failed to signal {tid} (errno {errno})")]
    SignalSendFailed { tid: Tid, errno: i32 },

    #[error("{0} did not answer the capture signal in time")]
    CaptureTimedOut(Tid),

    #[error("The dynamic loader reported no executable image")]
    ExecutableNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Nothing cached at {0}")]
    Missing(PathBuf),

    #[error("Cached symbol table is for version \"{stored}\", running \"{current}\"")]
    Stale { stored: String, current: String },

    #[error("Cached symbol table at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cached symbol table at {0} is not sorted by address")]
    Unsorted(PathBuf),

    #[error("Failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
