//! Error types for the watch session.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from watcher operations.
///
/// None of these abort a watch session. They are logged and forwarded to
/// the update sink so the builder can report them.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("File system event error for {path}: {details}")]
    EventError { path: PathBuf, details: String },

    #[error("Watch session task failed: {reason}")]
    TaskFailed { reason: String },
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}
