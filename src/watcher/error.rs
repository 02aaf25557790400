//! Error types for watch setup.
//!
//! Only setup-time failures surface as errors. Steady-state losses
//! (notification buffer overflow, permission errors on nested folders)
//! are accepted data loss and show up as an absence of events, never as
//! an error crossing this boundary.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors returned from `watch` and rebind calls.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    #[error("native watch resources exhausted: {reason}")]
    ResourceExhausted { reason: String },

    #[error("failed to bind watch on {path}: {reason}")]
    BindFailed { path: PathBuf, reason: String },

    #[error("component already disposed")]
    Disposed,
}

impl WatchError {
    /// Map a `notify` setup error onto the taxonomy, keeping the path
    /// the caller asked for rather than whatever notify recorded.
    pub(crate) fn from_notify(path: &Path, error: notify::Error) -> Self {
        match error.kind {
            notify::ErrorKind::PathNotFound => WatchError::DirectoryNotFound {
                path: path.to_path_buf(),
            },
            notify::ErrorKind::MaxFilesWatch => WatchError::ResourceExhausted {
                reason: error.to_string(),
            },
            _ => WatchError::BindFailed {
                path: path.to_path_buf(),
                reason: error.to_string(),
            },
        }
    }
}
