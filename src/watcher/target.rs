//! Callback contract for registered targets.

use std::path::{Path, PathBuf};

use super::FileEvent;

/// Tag used when a target declares no name (e.g. closures).
pub const UNKNOWN_TAG: &str = "<Unknown>";

/// One decoded notification, handed to every matching target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// The inciting event type.
    pub event: FileEvent,
    /// Name of the file the event concerns. Empty when the event is about
    /// the directory itself.
    pub filename: String,
    /// The directory containing the file.
    pub directory: PathBuf,
}

impl Notification {
    pub fn new(
        event: FileEvent,
        filename: impl Into<String>,
        directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            event,
            filename: filename.into(),
            directory: directory.into(),
        }
    }

    /// Full path of the file, or the directory when `filename` is empty.
    pub fn path(&self) -> PathBuf {
        if self.filename.is_empty() {
            self.directory.clone()
        } else {
            self.directory.join(&self.filename)
        }
    }

    /// Whether this notification happened inside `dir`.
    pub fn is_in(&self, dir: &Path) -> bool {
        self.directory == dir
    }
}

/// A unit of behavior invoked when a matching event occurs.
///
/// Targets may run on several threads at once, including concurrently with
/// themselves, and must not assume any ordering relative to sibling targets.
pub trait Target: Send + Sync + 'static {
    /// Handle one notification. Errors are reported by the dispatcher and
    /// never reach other targets.
    fn call(&self, notification: &Notification) -> anyhow::Result<()>;

    /// Declared identifier, used as the default registration tag.
    fn name(&self) -> Option<&str> {
        None
    }
}

impl<F> Target for F
where
    F: Fn(&Notification) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn call(&self, notification: &Notification) -> anyhow::Result<()> {
        self(notification)
    }

    fn name(&self) -> Option<&str> {
        callable_name(std::any::type_name::<F>())
    }
}

/// Derive a declared name from a callable's type name.
///
/// Function items (`crate::module::detect_file`) yield their last path
/// segment; closures have no declared name.
fn callable_name(type_name: &'static str) -> Option<&'static str> {
    if type_name.contains("{{closure}}") {
        return None;
    }
    // Generic arguments may contain `::`; only look before them
    let base = type_name.split('<').next().unwrap_or(type_name);
    base.rsplit("::").next().filter(|name| !name.is_empty())
}
