//! Directory watcher that routes file events to registered targets, plus
//! the inspection targets the `linkwatch` binary runs.

pub mod cli;
pub mod config;
pub mod inspection;
pub mod logging;
pub mod watcher;

pub use config::Settings;
pub use inspection::{DetectTarget, InspectionLog, JsonInspectionLog, ReloadTarget};
pub use watcher::{
    EventSelection, ExecutionMode, FileEvent, FileWatcher, Notification, StopHandle, Target,
    WatchError,
};
