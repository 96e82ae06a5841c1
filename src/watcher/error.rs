//! Error types for the watch/dispatch core.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from watcher operations.
///
/// Tag collisions are not errors: registration reports them through its
/// `false` return, which callers can check without handling a failure.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Unknown file event type: '{name}'")]
    UnknownEvent { name: String },

    #[error("No event types requested for registration")]
    NoEvents,

    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("Watcher is listening; stop it before changing targets or paths")]
    Listening,

    #[error("Watcher is already listening")]
    AlreadyListening,

    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}
