//! Event loop that decodes raw batches and runs matching targets.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use super::adapter::{
    DEFAULT_POLL_INTERVAL, NotifyBackend, NotifySource, PathList, RawBatch, WatchAdapter,
};
use super::{EventSelection, FileEvent, Notification, Target, TargetRegistry, WatchError};

/// How targets for one notification are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Every target runs on its own thread; the loop moves on immediately.
    #[default]
    Concurrent,
    /// Every target runs on its own thread; the loop waits for all of them
    /// before handling the next notification.
    Synchronous,
}

impl ExecutionMode {
    pub fn from_synchronous(synchronous: bool) -> Self {
        if synchronous {
            ExecutionMode::Synchronous
        } else {
            ExecutionMode::Concurrent
        }
    }
}

/// Lifecycle of a [`FileWatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Listening,
    Stopped,
}

/// Cloneable handle that stops a [`FileWatcher`] from any thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    stop_requested: Arc<AtomicBool>,
}

impl StopHandle {
    /// Signal the loop to exit. `start()` returns within one poll interval.
    ///
    /// A request made while the watcher is not listening is kept and ends
    /// the next `start()` at its first poll.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::Relaxed);
    }
}

/// Watches directories and dispatches file events to registered targets.
///
/// `start()` blocks the calling thread; share the watcher through an `Arc`
/// (or take a [`StopHandle`]) to stop it from elsewhere. Targets and paths
/// can only be changed while the watcher is not listening.
pub struct FileWatcher {
    adapter: Mutex<WatchAdapter>,
    /// Copy of the adapter's path set, readable while the loop holds the adapter.
    watched: RwLock<Vec<PathBuf>>,
    registry: RwLock<TargetRegistry>,
    mode: ExecutionMode,
    listening: AtomicBool,
    /// Cooperative stop signal, consumed when the loop exits. Readers
    /// tolerate one poll interval of staleness.
    stop_requested: Arc<AtomicBool>,
    state: Mutex<ListenerState>,
    failures: Arc<AtomicUsize>,
}

impl FileWatcher {
    /// Create a builder for configuring the watcher.
    pub fn builder() -> FileWatcherBuilder {
        FileWatcherBuilder::new()
    }

    /// Watch `paths` with the native backend.
    pub fn new<I, P>(paths: I, recursive: bool, mode: ExecutionMode) -> Result<Self, WatchError>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self::builder()
            .paths(paths)
            .recursive(recursive)
            .mode(mode)
            .build()
    }

    /// Register a target for the selected events.
    ///
    /// See [`TargetRegistry::register`] for tag defaults and the
    /// all-or-nothing rule. Fails with [`WatchError::Listening`] while the
    /// watcher is running.
    pub fn register_target(
        &self,
        target: impl Target,
        events: impl Into<EventSelection>,
        tag: Option<&str>,
    ) -> Result<bool, WatchError> {
        self.register_shared(Arc::new(target), events, tag)
    }

    /// Register an already shared target.
    pub fn register_shared(
        &self,
        target: Arc<dyn Target>,
        events: impl Into<EventSelection>,
        tag: Option<&str>,
    ) -> Result<bool, WatchError> {
        self.ensure_idle()?;
        self.registry.write().register(target, events.into(), tag)
    }

    /// Remove the target registered under `tag` for `event`.
    pub fn unregister_target(&self, event: FileEvent, tag: &str) -> Result<bool, WatchError> {
        self.ensure_idle()?;
        Ok(self.registry.write().unregister(event, tag))
    }

    /// Tags registered for `event`, in registration order.
    pub fn list_targets(&self, event: FileEvent) -> Vec<String> {
        self.registry.read().list(event)
    }

    /// Add directories to the watch set, skipping ones already present.
    ///
    /// Returns the paths actually added.
    pub fn add_path(&self, paths: impl Into<PathList>) -> Result<Vec<PathBuf>, WatchError> {
        self.ensure_idle()?;
        // The loop holds the adapter for as long as it runs
        let mut adapter = self.adapter.try_lock().ok_or(WatchError::Listening)?;
        let added = adapter.add_path(paths)?;
        *self.watched.write() = adapter.paths().to_vec();
        Ok(added)
    }

    /// Directories currently watched, in the order they were added.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.watched.read().clone()
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn state(&self) -> ListenerState {
        *self.state.lock()
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Relaxed)
    }

    /// Number of target invocations that returned an error or panicked.
    pub fn failure_count(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop_requested: Arc::clone(&self.stop_requested),
        }
    }

    /// Begin listening. Blocks until [`stop`](Self::stop) is called.
    ///
    /// Restarting after a stop is allowed. Targets already running when the
    /// loop exits are not waited for.
    pub fn start(&self) -> Result<(), WatchError> {
        {
            let mut state = self.state.lock();
            if *state == ListenerState::Listening {
                return Err(WatchError::AlreadyListening);
            }
            *state = ListenerState::Listening;
            self.listening.store(true, Ordering::Relaxed);
        }

        crate::log_event!(
            "watcher",
            "started",
            "{} paths, {:?} mode",
            self.watched.read().len(),
            self.mode
        );

        let result = self.listen();

        self.stop_requested.store(false, Ordering::Relaxed);
        self.listening.store(false, Ordering::Relaxed);
        *self.state.lock() = ListenerState::Stopped;

        match &result {
            Ok(()) => crate::log_event!("watcher", "stopped"),
            Err(e) => tracing::error!("[watcher] stopped with error: {e}"),
        }
        result
    }

    /// Signal the loop to exit at its next poll boundary.
    ///
    /// Called before `start()`, the request is kept and that run ends at its
    /// first poll.
    pub fn stop(&self) {
        crate::log_event!("watcher", "stopping");
        self.stop_requested.store(true, Ordering::Relaxed);
    }

    fn ensure_idle(&self) -> Result<(), WatchError> {
        if self.state() == ListenerState::Listening {
            return Err(WatchError::Listening);
        }
        Ok(())
    }

    fn listen(&self) -> Result<(), WatchError> {
        let mut adapter = self.adapter.lock();

        for polled in adapter.batches() {
            if self.stop_requested.load(Ordering::Relaxed) {
                break;
            }

            // Empty polls are heartbeats so the stop signal gets checked
            let Some(batch) = polled? else {
                continue;
            };

            self.dispatch_batch(batch);
        }

        Ok(())
    }

    /// One dispatch per raw code in the batch, in code order.
    fn dispatch_batch(&self, batch: RawBatch) {
        let RawBatch {
            directory,
            filename,
            mask,
        } = batch;

        for event in FileEvent::decode(mask) {
            let notification = Notification::new(event, filename.clone(), directory.clone());
            self.dispatch(notification);
        }
    }

    fn dispatch(&self, notification: Notification) {
        let targets = self.registry.read().targets_for(notification.event);
        if targets.is_empty() {
            crate::debug_event!(
                "watcher",
                "no targets",
                "{} {}",
                notification.event,
                notification.path().display()
            );
            return;
        }

        crate::debug_event!(
            "watcher",
            "dispatch",
            "{} {} -> {} targets",
            notification.event,
            notification.path().display(),
            targets.len()
        );

        let notification = Arc::new(notification);
        let handles: Vec<JoinHandle<()>> = targets
            .into_iter()
            .filter_map(|(tag, target)| {
                spawn_target(
                    tag,
                    target,
                    Arc::clone(&notification),
                    Arc::clone(&self.failures),
                )
            })
            .collect();

        if self.mode == ExecutionMode::Synchronous {
            for handle in handles {
                if handle.join().is_err() {
                    // run_target catches panics; only reachable if logging panicked
                    self.failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("paths", &*self.watched.read())
            .field("registry", &*self.registry.read())
            .field("mode", &self.mode)
            .field("state", &self.state())
            .finish()
    }
}

/// Run one target on its own thread.
fn spawn_target(
    tag: String,
    target: Arc<dyn Target>,
    notification: Arc<Notification>,
    failures: Arc<AtomicUsize>,
) -> Option<JoinHandle<()>> {
    let spawned = thread::Builder::new()
        .name(format!("linkwatch-target-{tag}"))
        .spawn({
            let tag = tag.clone();
            move || {
                if !run_target(&tag, target.as_ref(), &notification) {
                    failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::error!("[{tag}] failed to spawn target thread: {e}");
            None
        }
    }
}

/// Invoke a target, containing errors and panics. Returns `true` on success.
fn run_target(tag: &str, target: &dyn Target, notification: &Notification) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| target.call(notification))) {
        Ok(Ok(())) => {
            crate::debug_event!(tag, "completed", "{}", notification.event);
            true
        }
        Ok(Err(e)) => {
            tracing::error!(
                "[{tag}] target failed on {} {}: {e:#}",
                notification.event,
                notification.path().display()
            );
            false
        }
        Err(payload) => {
            tracing::error!(
                "[{tag}] target panicked on {} {}: {}",
                notification.event,
                notification.path().display(),
                panic_message(payload.as_ref())
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Builder for constructing a [`FileWatcher`].
pub struct FileWatcherBuilder {
    paths: Vec<PathBuf>,
    recursive: bool,
    mode: ExecutionMode,
    poll_interval: Duration,
    source: Option<Box<dyn NotifySource>>,
}

impl FileWatcherBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            paths: Vec::new(),
            recursive: false,
            mode: ExecutionMode::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            source: None,
        }
    }

    /// Add a directory to watch.
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path.into());
        self
    }

    /// Add several directories to watch.
    pub fn paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Watch whole subtrees instead of single directories.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Bounded wait of each poll; also the worst-case stop latency.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Use a custom notification source instead of the native backend.
    pub fn source(mut self, source: impl NotifySource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Build the watcher, establishing every watch.
    pub fn build(self) -> Result<FileWatcher, WatchError> {
        if self.paths.is_empty() {
            return Err(WatchError::InitFailed {
                reason: "At least one path is required".to_string(),
            });
        }

        let source = match self.source {
            Some(source) => source,
            None => Box::new(NotifyBackend::new()?),
        };

        let adapter = WatchAdapter::new(source, self.paths, self.recursive, self.poll_interval)?;
        let watched = adapter.paths().to_vec();

        Ok(FileWatcher {
            adapter: Mutex::new(adapter),
            watched: RwLock::new(watched),
            registry: RwLock::new(TargetRegistry::new()),
            mode: self.mode,
            listening: AtomicBool::new(false),
            stop_requested: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(ListenerState::Idle),
            failures: Arc::new(AtomicUsize::new(0)),
        })
    }
}

impl Default for FileWatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
