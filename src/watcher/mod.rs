//! Event-watch dispatcher.
//!
//! Turns the raw inotify stream into typed [`FileEvent`]s and runs the
//! targets registered for each one.
//!
//! # Architecture
//!
//! ```text
//! FileWatcher (start / stop / register)
//!   - WatchAdapter: owned path set, bounded-wait polling
//!       - NotifySource (NotifyBackend over notify)
//!   - TargetRegistry: event -> tag -> target
//!         |
//!    RawBatch --decode--> Notification --spawn--> Target threads
//! ```

mod adapter;
mod dispatcher;
mod error;
mod event;
mod registry;
mod target;

pub use adapter::{
    DEFAULT_POLL_INTERVAL, NotifyBackend, NotifySource, PathList, RawBatch, WatchAdapter,
};
pub use dispatcher::{ExecutionMode, FileWatcher, FileWatcherBuilder, ListenerState, StopHandle};
pub use error::WatchError;
pub use event::{FileEvent, RawEventMask};
pub use registry::{EventSelection, TargetRegistry};
pub use target::{Notification, Target, UNKNOWN_TAG};
