//! Watch adapter over the native notification facility.
//!
//! [`NotifySource`] is the seam to the OS: establish flat or subtree watches
//! and poll for raw batches with a bounded wait. [`NotifyBackend`] implements
//! it on `notify` (inotify on Linux). [`WatchAdapter`] owns the canonical
//! path set and drives a source.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use super::{RawEventMask, WatchError};

/// Default bounded wait for a single poll.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One raw report from the native facility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBatch {
    /// Directory the change happened in.
    pub directory: PathBuf,
    /// File name inside `directory`; empty when the directory itself changed.
    pub filename: String,
    /// Every raw code the change satisfied.
    pub mask: RawEventMask,
}

impl RawBatch {
    pub fn new(
        directory: impl Into<PathBuf>,
        filename: impl Into<String>,
        mask: RawEventMask,
    ) -> Self {
        Self {
            directory: directory.into(),
            filename: filename.into(),
            mask,
        }
    }
}

/// One directory or several, as accepted by `add_path`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PathList(Vec<PathBuf>);

impl PathList {
    pub fn into_vec(self) -> Vec<PathBuf> {
        self.0
    }
}

impl From<PathBuf> for PathList {
    fn from(path: PathBuf) -> Self {
        PathList(vec![path])
    }
}

impl From<&PathBuf> for PathList {
    fn from(path: &PathBuf) -> Self {
        PathList(vec![path.clone()])
    }
}

impl From<&Path> for PathList {
    fn from(path: &Path) -> Self {
        PathList(vec![path.to_path_buf()])
    }
}

impl From<&str> for PathList {
    fn from(path: &str) -> Self {
        PathList(vec![PathBuf::from(path)])
    }
}

impl From<String> for PathList {
    fn from(path: String) -> Self {
        PathList(vec![PathBuf::from(path)])
    }
}

impl<P: Into<PathBuf>> From<Vec<P>> for PathList {
    fn from(paths: Vec<P>) -> Self {
        PathList(paths.into_iter().map(Into::into).collect())
    }
}

impl<P: Into<PathBuf>, const N: usize> From<[P; N]> for PathList {
    fn from(paths: [P; N]) -> Self {
        PathList(paths.into_iter().map(Into::into).collect())
    }
}

/// Native notification facility.
pub trait NotifySource: Send {
    /// Watch a single directory (not its subdirectories).
    fn watch(&mut self, path: &Path) -> Result<(), WatchError>;

    /// Replace any subtree watch with one covering every path in `paths`.
    fn watch_tree(&mut self, paths: &[PathBuf]) -> Result<(), WatchError>;

    /// Wait at most `timeout` for the next batch.
    ///
    /// A timeout with no activity is `Ok(None)`, never an error.
    fn poll(&mut self, timeout: Duration) -> Result<Option<RawBatch>, WatchError>;
}

/// [`NotifySource`] backed by `notify::RecommendedWatcher`.
///
/// notify's inotify watch mask leaves out `IN_ACCESS` and
/// `IN_CLOSE_NOWRITE` and never forwards `IN_IGNORED`, so this backend
/// produces no `READ`, `CLOSE_NO_WRITE` or `UNWATCH` events. notify also
/// splits every inotify event into single-kind events, so the only
/// multi-code batch it yields is `CREATE | ISDIR` (and `DELETE | ISDIR`).
/// Sources that hand over raw masks can report all of them.
pub struct NotifyBackend {
    watcher: RecommendedWatcher,
    event_tx: Sender<notify::Result<Event>>,
    event_rx: Receiver<notify::Result<Event>>,
    /// Directories registered directly, used to recognise self events.
    roots: Vec<PathBuf>,
    /// Batches translated but not yet handed out.
    pending: VecDeque<RawBatch>,
}

impl NotifyBackend {
    pub fn new() -> Result<Self, WatchError> {
        let (event_tx, event_rx) = unbounded();
        let watcher = Self::spawn_watcher(event_tx.clone())?;
        Ok(Self {
            watcher,
            event_tx,
            event_rx,
            roots: Vec::new(),
            pending: VecDeque::new(),
        })
    }

    fn spawn_watcher(tx: Sender<notify::Result<Event>>) -> Result<RecommendedWatcher, WatchError> {
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })?;
        Ok(watcher)
    }

    fn add_root(&mut self, path: &Path) {
        if !self.roots.iter().any(|root| root == path) {
            self.roots.push(path.to_path_buf());
        }
    }

    /// Translate one notify event into raw batches, one per affected path.
    fn translate(&self, event: Event) -> Vec<RawBatch> {
        let Event { kind, paths, .. } = event;
        let mut batches = Vec::with_capacity(paths.len());

        for path in paths {
            let is_root = self.roots.iter().any(|root| *root == path);
            let Some(mask) = raw_mask(&kind, &path, is_root) else {
                continue;
            };
            batches.push(split_path(path, mask, is_root));
        }

        batches
    }
}

impl NotifySource for NotifyBackend {
    fn watch(&mut self, path: &Path) -> Result<(), WatchError> {
        self.watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::PathWatchFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        self.add_root(path);
        crate::debug_event!("adapter", "watching", "{}", path.display());
        Ok(())
    }

    fn watch_tree(&mut self, paths: &[PathBuf]) -> Result<(), WatchError> {
        // Build the replacement completely before dropping the old watcher
        let mut watcher = Self::spawn_watcher(self.event_tx.clone())?;
        for path in paths {
            watcher
                .watch(path, RecursiveMode::Recursive)
                .map_err(|e| WatchError::PathWatchFailed {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
        }

        self.watcher = watcher;
        self.roots = paths.to_vec();
        crate::debug_event!("adapter", "watching tree", "{} roots", paths.len());
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<RawBatch>, WatchError> {
        if let Some(batch) = self.pending.pop_front() {
            return Ok(Some(batch));
        }

        match self.event_rx.recv_timeout(timeout) {
            Ok(Ok(event)) => {
                let batches = self.translate(event);
                self.pending.extend(batches);
                Ok(self.pending.pop_front())
            }
            Ok(Err(e)) => {
                tracing::error!("[adapter] file watch error: {e}");
                Ok(None)
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(WatchError::ChannelClosed),
        }
    }
}

/// Raw codes for a notify event kind on one path.
///
/// `None` for kinds with no inotify counterpart, and for paired renames whose
/// halves notify also reports separately.
fn raw_mask(kind: &EventKind, path: &Path, is_root: bool) -> Option<RawEventMask> {
    let mask = match kind {
        EventKind::Create(CreateKind::Folder) => RawEventMask::CREATE | RawEventMask::ISDIR,
        EventKind::Create(_) => RawEventMask::CREATE,

        EventKind::Remove(_) if is_root => RawEventMask::DELETE_SELF,
        EventKind::Remove(RemoveKind::Folder) => RawEventMask::DELETE | RawEventMask::ISDIR,
        EventKind::Remove(_) => RawEventMask::DELETE,

        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::Both => return None,
            // inotify's IN_MOVE_SELF arrives as a `From` rename of the root
            _ if is_root => RawEventMask::MOVE_SELF,
            RenameMode::From => RawEventMask::MOVED_FROM,
            RenameMode::To => RawEventMask::MOVED_TO,
            RenameMode::Any | RenameMode::Other => {
                if path.symlink_metadata().is_ok() {
                    RawEventMask::MOVED_TO
                } else {
                    RawEventMask::MOVED_FROM
                }
            }
        },
        EventKind::Modify(ModifyKind::Metadata(_)) => RawEventMask::ATTRIB,
        EventKind::Modify(_) => RawEventMask::MODIFY,

        EventKind::Access(AccessKind::Open(_)) => RawEventMask::OPEN,
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => RawEventMask::CLOSE_WRITE,
        EventKind::Access(AccessKind::Close(_)) => RawEventMask::CLOSE_NOWRITE,
        EventKind::Access(_) => RawEventMask::ACCESS,

        EventKind::Any | EventKind::Other => return None,
    };
    Some(mask)
}

/// Split an event path into (directory, filename).
fn split_path(path: PathBuf, mask: RawEventMask, is_root: bool) -> RawBatch {
    if is_root {
        return RawBatch::new(path, String::new(), mask);
    }
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let directory = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| path.clone());
    RawBatch::new(directory, filename, mask)
}

/// Owns the watched path set and the source it is registered with.
pub struct WatchAdapter {
    source: Box<dyn NotifySource>,
    /// Absolute, duplicate-free, in insertion order.
    paths: Vec<PathBuf>,
    recursive: bool,
    poll_interval: Duration,
}

impl WatchAdapter {
    /// Register `paths` with `source`, flat or as subtrees.
    ///
    /// Fails if the source cannot establish any of the watches, e.g. because
    /// a path does not exist.
    pub fn new<I, P>(
        mut source: Box<dyn NotifySource>,
        paths: I,
        recursive: bool,
        poll_interval: Duration,
    ) -> Result<Self, WatchError>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut canonical = Vec::new();
        for path in paths {
            let path = absolute(path.into())?;
            if !canonical.contains(&path) {
                canonical.push(path);
            }
        }

        if recursive {
            source.watch_tree(&canonical)?;
        } else {
            for path in &canonical {
                source.watch(path)?;
            }
        }

        Ok(Self {
            source,
            paths: canonical,
            recursive,
            poll_interval,
        })
    }

    /// Add paths not already watched. Returns the ones actually added.
    ///
    /// In recursive mode the subtree watch is rebuilt over the whole set.
    pub fn add_path(&mut self, paths: impl Into<PathList>) -> Result<Vec<PathBuf>, WatchError> {
        let mut added = Vec::new();
        for path in paths.into().into_vec() {
            let path = absolute(path)?;
            if !self.paths.contains(&path) && !added.contains(&path) {
                added.push(path);
            }
        }

        if added.is_empty() {
            return Ok(added);
        }

        if self.recursive {
            let mut rebuilt = self.paths.clone();
            rebuilt.extend(added.iter().cloned());
            self.source.watch_tree(&rebuilt)?;
            self.paths = rebuilt;
        } else {
            for path in &added {
                self.source.watch(path)?;
                self.paths.push(path.clone());
            }
        }

        crate::log_event!("adapter", "added paths", "{}", added.len());
        Ok(added)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Poll once, waiting at most the poll interval.
    pub fn next_batch(&mut self) -> Result<Option<RawBatch>, WatchError> {
        self.source.poll(self.poll_interval)
    }

    /// Never-ending sequence of poll results. `Ok(None)` items are heartbeats.
    pub fn batches(&mut self) -> impl Iterator<Item = Result<Option<RawBatch>, WatchError>> + '_ {
        std::iter::from_fn(move || Some(self.next_batch()))
    }
}

impl std::fmt::Debug for WatchAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchAdapter")
            .field("paths", &self.paths)
            .field("recursive", &self.recursive)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

fn absolute(path: PathBuf) -> Result<PathBuf, WatchError> {
    std::path::absolute(&path).map_err(|e| WatchError::PathWatchFailed {
        path,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Watch(PathBuf),
        Tree(Vec<PathBuf>),
    }

    #[derive(Clone, Default)]
    struct RecordingSource {
        calls: Arc<Mutex<Vec<Call>>>,
    }

    impl NotifySource for RecordingSource {
        fn watch(&mut self, path: &Path) -> Result<(), WatchError> {
            self.calls.lock().push(Call::Watch(path.to_path_buf()));
            Ok(())
        }

        fn watch_tree(&mut self, paths: &[PathBuf]) -> Result<(), WatchError> {
            self.calls.lock().push(Call::Tree(paths.to_vec()));
            Ok(())
        }

        fn poll(&mut self, _timeout: Duration) -> Result<Option<RawBatch>, WatchError> {
            Ok(None)
        }
    }

    #[test]
    fn test_flat_add_path_registers_only_new_paths() {
        let source = RecordingSource::default();
        let calls = source.calls.clone();
        let mut adapter = WatchAdapter::new(
            Box::new(source),
            ["/srv/a", "/srv/b", "/srv/a"],
            false,
            DEFAULT_POLL_INTERVAL,
        )
        .unwrap();

        assert_eq!(adapter.paths(), [PathBuf::from("/srv/a"), PathBuf::from("/srv/b")]);

        let added = adapter.add_path(["/srv/b", "/srv/c"]).unwrap();
        assert_eq!(added, vec![PathBuf::from("/srv/c")]);

        assert_eq!(
            *calls.lock(),
            vec![
                Call::Watch("/srv/a".into()),
                Call::Watch("/srv/b".into()),
                Call::Watch("/srv/c".into()),
            ]
        );
    }

    #[test]
    fn test_recursive_add_path_rebuilds_full_tree() {
        let source = RecordingSource::default();
        let calls = source.calls.clone();
        let mut adapter =
            WatchAdapter::new(Box::new(source), ["/srv/a"], true, DEFAULT_POLL_INTERVAL).unwrap();

        adapter.add_path(["/srv/b"]).unwrap();
        // Nothing new: no rebuild
        adapter.add_path(["/srv/a"]).unwrap();

        assert_eq!(
            *calls.lock(),
            vec![
                Call::Tree(vec!["/srv/a".into()]),
                Call::Tree(vec!["/srv/a".into(), "/srv/b".into()]),
            ]
        );
    }

    #[test]
    fn test_relative_paths_become_absolute() {
        let adapter = WatchAdapter::new(
            Box::new(RecordingSource::default()),
            ["drop"],
            false,
            DEFAULT_POLL_INTERVAL,
        )
        .unwrap();
        let expected = std::env::current_dir().unwrap().join("drop");
        assert_eq!(adapter.paths(), [expected]);
    }

    #[test]
    fn test_raw_mask_translation() {
        let file = Path::new("/srv/a/img.jpg");
        assert_eq!(
            raw_mask(
                &EventKind::Access(AccessKind::Close(AccessMode::Write)),
                file,
                false
            ),
            Some(RawEventMask::CLOSE_WRITE)
        );
        assert_eq!(
            raw_mask(&EventKind::Create(CreateKind::Folder), file, false),
            Some(RawEventMask::CREATE | RawEventMask::ISDIR)
        );
        assert_eq!(
            raw_mask(&EventKind::Remove(RemoveKind::Any), file, true),
            Some(RawEventMask::DELETE_SELF)
        );
        assert_eq!(
            raw_mask(
                &EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                file,
                false
            ),
            None
        );
        assert_eq!(raw_mask(&EventKind::Other, file, false), None);
    }

    #[test]
    fn test_root_rename_is_a_self_move() {
        let root = Path::new("/srv/a");
        let from = EventKind::Modify(ModifyKind::Name(RenameMode::From));

        assert_eq!(raw_mask(&from, root, true), Some(RawEventMask::MOVE_SELF));
        assert_eq!(
            raw_mask(&from, Path::new("/srv/a/img.jpg"), false),
            Some(RawEventMask::MOVED_FROM)
        );
        assert_eq!(
            raw_mask(
                &EventKind::Modify(ModifyKind::Name(RenameMode::To)),
                Path::new("/srv/a/img.jpg"),
                false
            ),
            Some(RawEventMask::MOVED_TO)
        );
    }

    #[test]
    fn test_close_without_write_and_access_translate() {
        let file = Path::new("/srv/a/img.jpg");
        assert_eq!(
            raw_mask(
                &EventKind::Access(AccessKind::Close(AccessMode::Read)),
                file,
                false
            ),
            Some(RawEventMask::CLOSE_NOWRITE)
        );
        assert_eq!(
            raw_mask(&EventKind::Access(AccessKind::Read), file, false),
            Some(RawEventMask::ACCESS)
        );
    }

    #[test]
    fn test_single_path_forms() {
        let source = RecordingSource::default();
        let calls = source.calls.clone();
        let mut adapter =
            WatchAdapter::new(Box::new(source), ["/srv/a"], true, DEFAULT_POLL_INTERVAL).unwrap();

        // A single path is one root, never split into its components
        let added = adapter.add_path(&PathBuf::from("/srv/new")).unwrap();
        assert_eq!(added, vec![PathBuf::from("/srv/new")]);
        adapter.add_path(Path::new("/srv/other")).unwrap();
        adapter.add_path("/srv/third").unwrap();

        assert_eq!(
            adapter.paths(),
            [
                PathBuf::from("/srv/a"),
                PathBuf::from("/srv/new"),
                PathBuf::from("/srv/other"),
                PathBuf::from("/srv/third"),
            ]
        );
        assert_eq!(
            calls.lock().last(),
            Some(&Call::Tree(adapter.paths().to_vec()))
        );
    }

    #[test]
    fn test_split_path() {
        let batch = split_path(PathBuf::from("/srv/a/img.jpg"), RawEventMask::CREATE, false);
        assert_eq!(batch.directory, PathBuf::from("/srv/a"));
        assert_eq!(batch.filename, "img.jpg");

        let root = split_path(PathBuf::from("/srv/a"), RawEventMask::DELETE_SELF, true);
        assert_eq!(root.directory, PathBuf::from("/srv/a"));
        assert!(root.filename.is_empty());
    }
}
