//! Inspection image handling built on the watcher.
//!
//! Cameras drop images into watched directories; [`DetectTarget`] records
//! each finished image in an [`InspectionLog`] and [`ReloadTarget`] picks up
//! settings changes without a restart.

mod filename;
mod store;
mod targets;

pub use filename::{ParsedName, parse_file_name};
pub use store::{ImageRecord, InspectionLog, JsonInspectionLog, NewImage, StoreError};
pub use targets::{DetectTarget, ReloadTarget, SharedSettings};
