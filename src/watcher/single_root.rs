//! Watcher bound to exactly one root directory.
//!
//! Each root holds two backend handles: a non-recursive files-scope
//! handle for filename changes in the immediate directory, and a
//! recursive directories-scope handle so a rename of a nested folder
//! several levels deep is still observed. Raw changes are translated
//! into the domain model and published on six broadcast feeds, in the
//! backend's delivery order, on the backend's delivery thread.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::backend::{BindRequest, NotificationBackend, NotificationHandle, RawEventSink, WatchScope};
use super::error::WatchError;
use super::event::{DirectoryEntry, FileEntry, RawChange, RenameEvent};
use super::path::RootPath;

/// The six per-watcher broadcast feeds.
#[derive(Clone)]
pub(crate) struct WatcherFeeds {
    pub(crate) file_created: broadcast::Sender<FileEntry>,
    pub(crate) file_deleted: broadcast::Sender<FileEntry>,
    pub(crate) file_renamed: broadcast::Sender<RenameEvent<FileEntry>>,
    pub(crate) directory_created: broadcast::Sender<DirectoryEntry>,
    pub(crate) directory_deleted: broadcast::Sender<DirectoryEntry>,
    pub(crate) directory_renamed: broadcast::Sender<RenameEvent<DirectoryEntry>>,
}

impl WatcherFeeds {
    fn new(capacity: usize) -> Self {
        Self {
            file_created: broadcast::channel(capacity).0,
            file_deleted: broadcast::channel(capacity).0,
            file_renamed: broadcast::channel(capacity).0,
            directory_created: broadcast::channel(capacity).0,
            directory_deleted: broadcast::channel(capacity).0,
            directory_renamed: broadcast::channel(capacity).0,
        }
    }

    /// Publish a files-scope raw change. Send errors mean no subscriber
    /// is attached yet, which is fine.
    fn publish_files(&self, change: RawChange) {
        match change {
            RawChange::Created { path } => {
                let _ = self.file_created.send(FileEntry::from_path(path));
            }
            RawChange::Deleted { path } => {
                let _ = self.file_deleted.send(FileEntry::from_path(path));
            }
            RawChange::Renamed { old, new } => {
                let _ = self.file_renamed.send(RenameEvent {
                    old: FileEntry::from_path(old),
                    new: FileEntry::from_path(new),
                });
            }
        }
    }

    /// Publish a directories-scope raw change.
    fn publish_directories(&self, change: RawChange) {
        match change {
            RawChange::Created { path } => {
                let _ = self.directory_created.send(DirectoryEntry::from_path(path));
            }
            RawChange::Deleted { path } => {
                let _ = self.directory_deleted.send(DirectoryEntry::from_path(path));
            }
            RawChange::Renamed { old, new } => {
                let _ = self.directory_renamed.send(RenameEvent {
                    old: DirectoryEntry::from_path(old),
                    new: DirectoryEntry::from_path(new),
                });
            }
        }
    }
}

/// A receiver whose channel is already closed. Returned from subscribe
/// calls on a disposed component so late subscribers see completion
/// instead of a hang.
pub(crate) fn closed_receiver<T: Clone>() -> broadcast::Receiver<T> {
    let (tx, rx) = broadcast::channel(1);
    drop(tx);
    rx
}

#[derive(Default)]
struct HandleState {
    root: Option<RootPath>,
    files: Option<Box<dyn NotificationHandle>>,
    directories: Option<Box<dyn NotificationHandle>>,
}

/// Wraps the native notification handles bound to one root directory.
///
/// Emits one strongly-typed value per raw backend event received while
/// active. The watcher only produces transient event values; it never
/// stores entries or resolves subtrees.
pub struct SingleRootWatcher {
    backend: Arc<dyn NotificationBackend>,
    feeds: Mutex<Option<WatcherFeeds>>,
    state: Mutex<HandleState>,
    watching: AtomicBool,
    disposed: Arc<AtomicBool>,
}

impl SingleRootWatcher {
    pub fn new(backend: Arc<dyn NotificationBackend>, channel_capacity: usize) -> Self {
        Self {
            backend,
            feeds: Mutex::new(Some(WatcherFeeds::new(channel_capacity))),
            state: Mutex::new(HandleState::default()),
            watching: AtomicBool::new(false),
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bind to `path`, severing any prior binding first.
    ///
    /// Fails with [`WatchError::DirectoryNotFound`] if the path does not
    /// exist at call time. Rebinding to the already-bound path is a no-op,
    /// so redundant calls never duplicate event delivery. If the watcher
    /// is started, the new binding is enabled before this returns.
    pub fn set_watching_directory(&self, path: &Path) -> Result<(), WatchError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(WatchError::Disposed);
        }
        if !path.is_dir() {
            return Err(WatchError::DirectoryNotFound {
                path: path.to_path_buf(),
            });
        }

        let root = RootPath::normalize(path);
        let mut state = self.state.lock();

        if state.root.as_ref() == Some(&root) && state.files.is_some() {
            return Ok(());
        }

        // Sever the old binding before the new one exists, so no event
        // from the old root can leak out after rebind.
        if let Some(mut handle) = state.files.take() {
            handle.disable();
        }
        if let Some(mut handle) = state.directories.take() {
            handle.disable();
        }
        state.root = None;

        let feeds = match self.feeds.lock().clone() {
            Some(feeds) => feeds,
            None => return Err(WatchError::Disposed),
        };

        let files_sink: RawEventSink = {
            let feeds = feeds.clone();
            let disposed = Arc::clone(&self.disposed);
            Arc::new(move |change| {
                if disposed.load(Ordering::SeqCst) {
                    return;
                }
                feeds.publish_files(change);
            })
        };
        let directories_sink: RawEventSink = {
            let disposed = Arc::clone(&self.disposed);
            Arc::new(move |change| {
                if disposed.load(Ordering::SeqCst) {
                    return;
                }
                feeds.publish_directories(change);
            })
        };

        let files = self.backend.bind(
            BindRequest {
                path: root.to_path_buf(),
                recursive: false,
                scope: WatchScope::Files,
            },
            files_sink,
        )?;
        let directories = self.backend.bind(
            BindRequest {
                path: root.to_path_buf(),
                recursive: true,
                scope: WatchScope::Directories,
            },
            directories_sink,
        )?;

        state.files = Some(files);
        state.directories = Some(directories);
        state.root = Some(root);

        if self.watching.load(Ordering::SeqCst) {
            enable_handles(&mut state);
        }

        Ok(())
    }

    /// Start delivering notifications. Repeated calls are no-ops; the
    /// bound path is not altered.
    pub fn start_watching(&self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        if self.watching.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.state.lock();
        enable_handles(&mut state);
    }

    /// Stop delivering notifications without unbinding.
    pub fn stop_watching(&self) {
        if !self.watching.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut state = self.state.lock();
        if let Some(handle) = state.files.as_mut() {
            handle.disable();
        }
        if let Some(handle) = state.directories.as_mut() {
            handle.disable();
        }
    }

    /// The currently bound root, if any.
    pub fn root(&self) -> Option<RootPath> {
        self.state.lock().root.clone()
    }

    /// Release the native handles and complete all six feeds.
    ///
    /// Safe to call multiple times. Raw events still buffered in the
    /// backend are dropped at the sink from this point on.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.watching.store(false, Ordering::SeqCst);

        let mut state = self.state.lock();
        if let Some(mut handle) = state.files.take() {
            handle.disable();
        }
        if let Some(mut handle) = state.directories.take() {
            handle.disable();
        }
        state.root = None;
        drop(state);

        // Dropping the watcher's senders (the handles' sink clones went
        // with the handles above) completes the feeds for subscribers.
        self.feeds.lock().take();
    }

    pub fn subscribe_file_created(&self) -> broadcast::Receiver<FileEntry> {
        match self.feeds.lock().as_ref() {
            Some(feeds) => feeds.file_created.subscribe(),
            None => closed_receiver(),
        }
    }

    pub fn subscribe_file_deleted(&self) -> broadcast::Receiver<FileEntry> {
        match self.feeds.lock().as_ref() {
            Some(feeds) => feeds.file_deleted.subscribe(),
            None => closed_receiver(),
        }
    }

    pub fn subscribe_file_renamed(&self) -> broadcast::Receiver<RenameEvent<FileEntry>> {
        match self.feeds.lock().as_ref() {
            Some(feeds) => feeds.file_renamed.subscribe(),
            None => closed_receiver(),
        }
    }

    pub fn subscribe_directory_created(&self) -> broadcast::Receiver<DirectoryEntry> {
        match self.feeds.lock().as_ref() {
            Some(feeds) => feeds.directory_created.subscribe(),
            None => closed_receiver(),
        }
    }

    pub fn subscribe_directory_deleted(&self) -> broadcast::Receiver<DirectoryEntry> {
        match self.feeds.lock().as_ref() {
            Some(feeds) => feeds.directory_deleted.subscribe(),
            None => closed_receiver(),
        }
    }

    pub fn subscribe_directory_renamed(&self) -> broadcast::Receiver<RenameEvent<DirectoryEntry>> {
        match self.feeds.lock().as_ref() {
            Some(feeds) => feeds.directory_renamed.subscribe(),
            None => closed_receiver(),
        }
    }
}

impl Drop for SingleRootWatcher {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn enable_handles(state: &mut HandleState) {
    // Enable failures after a successful bind are tolerated, matching
    // the best-effort contract; the branch just produces no events.
    if let Some(handle) = state.files.as_mut() {
        if let Err(e) = handle.enable() {
            tracing::warn!("[watcher] failed to enable file watch: {e}");
        }
    }
    if let Some(handle) = state.directories.as_mut() {
        if let Err(e) = handle.enable() {
            tracing::warn!("[watcher] failed to enable directory watch: {e}");
        }
    }
}
