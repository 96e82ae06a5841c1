//! File event taxonomy and the raw notification codes behind it.
//!
//! Every [`FileEvent`] corresponds to exactly one inotify code. A single
//! filesystem change may set several codes at once (a file written and
//! closed reports `IN_CLOSE_WRITE` alongside whatever else happened), so
//! raw codes travel as a [`RawEventMask`] and are decoded into one
//! `FileEvent` per set bit.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::WatchError;

bitflags! {
    /// Raw inotify event codes as reported by the kernel.
    ///
    /// Flags are declared in ascending bit order; iteration follows that
    /// order, which is the order decoded events are dispatched in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RawEventMask: u32 {
        const ACCESS = 0x0000_0001;
        const MODIFY = 0x0000_0002;
        const ATTRIB = 0x0000_0004;
        const CLOSE_WRITE = 0x0000_0008;
        const CLOSE_NOWRITE = 0x0000_0010;
        const OPEN = 0x0000_0020;
        const MOVED_FROM = 0x0000_0040;
        const MOVED_TO = 0x0000_0080;
        const CREATE = 0x0000_0100;
        const DELETE = 0x0000_0200;
        const DELETE_SELF = 0x0000_0400;
        const MOVE_SELF = 0x0000_0800;
        const IGNORED = 0x0000_8000;
        const ISDIR = 0x4000_0000;
    }
}

/// Domain-level file events, one per raw inotify code.
///
/// [`NotifyBackend`](super::NotifyBackend) never reports [`Read`](Self::Read),
/// [`CloseNoWrite`](Self::CloseNoWrite) or [`Unwatch`](Self::Unwatch); a
/// [`NotifySource`](super::NotifySource) passing raw inotify masks does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileEvent {
    /// A file was accessed (e.g. read or executed).
    Read,
    /// An existing file was changed without being removed.
    Modify,
    /// Metadata (permissions, owner, timestamps) changed but not contents.
    Metadata,
    /// A file opened for writing was closed.
    CloseWrite,
    /// A file was closed without being written.
    CloseNoWrite,
    /// A file was opened.
    Open,
    /// The old name after a file was renamed or moved out.
    Remove,
    /// A file was moved into or renamed inside the directory.
    Add,
    /// A file was created inside the directory.
    Create,
    /// A file was deleted from the directory.
    Delete,
    /// The watched directory itself was deleted.
    DirDeleted,
    /// The watched directory itself was moved.
    DirMoved,
    /// A directory is no longer watched.
    Unwatch,
    /// The subject of the notification is a directory.
    IsDir,
}

impl FileEvent {
    /// Every variant, in raw-code order.
    pub const ALL: [FileEvent; 14] = [
        FileEvent::Read,
        FileEvent::Modify,
        FileEvent::Metadata,
        FileEvent::CloseWrite,
        FileEvent::CloseNoWrite,
        FileEvent::Open,
        FileEvent::Remove,
        FileEvent::Add,
        FileEvent::Create,
        FileEvent::Delete,
        FileEvent::DirDeleted,
        FileEvent::DirMoved,
        FileEvent::Unwatch,
        FileEvent::IsDir,
    ];

    /// The raw code this event is reported under.
    pub const fn raw(self) -> RawEventMask {
        match self {
            FileEvent::Read => RawEventMask::ACCESS,
            FileEvent::Modify => RawEventMask::MODIFY,
            FileEvent::Metadata => RawEventMask::ATTRIB,
            FileEvent::CloseWrite => RawEventMask::CLOSE_WRITE,
            FileEvent::CloseNoWrite => RawEventMask::CLOSE_NOWRITE,
            FileEvent::Open => RawEventMask::OPEN,
            FileEvent::Remove => RawEventMask::MOVED_FROM,
            FileEvent::Add => RawEventMask::MOVED_TO,
            FileEvent::Create => RawEventMask::CREATE,
            FileEvent::Delete => RawEventMask::DELETE,
            FileEvent::DirDeleted => RawEventMask::DELETE_SELF,
            FileEvent::DirMoved => RawEventMask::MOVE_SELF,
            FileEvent::Unwatch => RawEventMask::IGNORED,
            FileEvent::IsDir => RawEventMask::ISDIR,
        }
    }

    /// Map a single raw code back to its event.
    ///
    /// Returns `None` for masks with more than one bit set and for codes
    /// outside the taxonomy.
    pub fn from_raw(code: RawEventMask) -> Option<FileEvent> {
        FileEvent::ALL.into_iter().find(|event| event.raw() == code)
    }

    /// Decode every code in `mask`, in ascending bit order.
    ///
    /// Bits outside the taxonomy are dropped.
    pub fn decode(mask: RawEventMask) -> impl Iterator<Item = FileEvent> {
        mask.iter().filter_map(FileEvent::from_raw)
    }

    /// Upper-snake name, e.g. `CLOSE_WRITE`.
    pub const fn name(self) -> &'static str {
        match self {
            FileEvent::Read => "READ",
            FileEvent::Modify => "MODIFY",
            FileEvent::Metadata => "METADATA",
            FileEvent::CloseWrite => "CLOSE_WRITE",
            FileEvent::CloseNoWrite => "CLOSE_NO_WRITE",
            FileEvent::Open => "OPEN",
            FileEvent::Remove => "REMOVE",
            FileEvent::Add => "ADD",
            FileEvent::Create => "CREATE",
            FileEvent::Delete => "DELETE",
            FileEvent::DirDeleted => "DIR_DELETED",
            FileEvent::DirMoved => "DIR_MOVED",
            FileEvent::Unwatch => "UNWATCH",
            FileEvent::IsDir => "IS_DIR",
        }
    }

    /// The kernel's name for the raw code, e.g. `IN_CLOSE_WRITE`.
    pub const fn raw_name(self) -> &'static str {
        match self {
            FileEvent::Read => "IN_ACCESS",
            FileEvent::Modify => "IN_MODIFY",
            FileEvent::Metadata => "IN_ATTRIB",
            FileEvent::CloseWrite => "IN_CLOSE_WRITE",
            FileEvent::CloseNoWrite => "IN_CLOSE_NOWRITE",
            FileEvent::Open => "IN_OPEN",
            FileEvent::Remove => "IN_MOVED_FROM",
            FileEvent::Add => "IN_MOVED_TO",
            FileEvent::Create => "IN_CREATE",
            FileEvent::Delete => "IN_DELETE",
            FileEvent::DirDeleted => "IN_DELETE_SELF",
            FileEvent::DirMoved => "IN_MOVE_SELF",
            FileEvent::Unwatch => "IN_IGNORED",
            FileEvent::IsDir => "IN_ISDIR",
        }
    }
}

impl fmt::Display for FileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FileEvent {
    type Err = WatchError;

    /// Accepts either the event name (`close_write`) or the raw code name
    /// (`IN_CLOSE_WRITE`), ignoring case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        FileEvent::ALL
            .into_iter()
            .find(|event| event.name() == wanted || event.raw_name() == wanted)
            .ok_or_else(|| WatchError::UnknownEvent {
                name: s.to_string(),
            })
    }
}
