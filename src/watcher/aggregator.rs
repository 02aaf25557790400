//! Fan-in of every active root watcher into six public feeds.
//!
//! Consumers subscribe once to the aggregator regardless of how many
//! roots are active underneath. Per accepted root, six forwarding
//! subscriptions republish that watcher's feeds onto the public
//! channels, each behind a distinct-until-changed filter keyed by the
//! event's path identity to collapse the duplicate bursts some OS
//! backends emit for one logical change.
//!
//! Events are republished on whatever task the forwarding subscription
//! runs on; the aggregator preserves per-root order and de-duplicates,
//! but does not force a delivery thread. Consumers needing a specific
//! execution context redirect the feed themselves.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Settings;

use super::backend::NotificationBackend;
use super::dedup::DistinctUntilChanged;
use super::error::WatchError;
use super::event::{DirectoryEntry, FileEntry, RenameEvent};
use super::path::RootPath;
use super::registry::RootRegistry;
use super::single_root::{SingleRootWatcher, closed_receiver};

/// Token for one per-root, per-feed forwarding subscription. Disposing
/// it guarantees the aggregator's channel sees nothing further from
/// that source.
pub(crate) struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn dispose(&self) {
        self.task.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// The six public broadcast senders.
#[derive(Clone)]
pub(crate) struct FanInSenders {
    file_created: broadcast::Sender<FileEntry>,
    file_deleted: broadcast::Sender<FileEntry>,
    file_renamed: broadcast::Sender<RenameEvent<FileEntry>>,
    directory_created: broadcast::Sender<DirectoryEntry>,
    directory_deleted: broadcast::Sender<DirectoryEntry>,
    directory_renamed: broadcast::Sender<RenameEvent<DirectoryEntry>>,
}

impl FanInSenders {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            file_created: broadcast::channel(capacity).0,
            file_deleted: broadcast::channel(capacity).0,
            file_renamed: broadcast::channel(capacity).0,
            directory_created: broadcast::channel(capacity).0,
            directory_deleted: broadcast::channel(capacity).0,
            directory_renamed: broadcast::channel(capacity).0,
        }
    }
}

/// What the registry needs to wire an accepted watcher into the public
/// channels: the senders, the runtime the forwarding tasks run on, and
/// the channel capacity for new watcher feeds.
#[derive(Clone)]
pub(crate) struct FanInWiring {
    senders: FanInSenders,
    runtime: Handle,
    capacity: usize,
}

impl FanInWiring {
    pub(crate) fn new(senders: FanInSenders, runtime: Handle, capacity: usize) -> Self {
        Self {
            senders,
            runtime,
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Subscribe to all six of a watcher's feeds, republishing each
    /// received value onto the matching public channel.
    pub(crate) fn attach(&self, watcher: &SingleRootWatcher) -> Vec<Subscription> {
        vec![
            self.forward(
                watcher.subscribe_file_created(),
                self.senders.file_created.clone(),
                |entry: &FileEntry| entry.path.clone(),
                "file-created",
            ),
            self.forward(
                watcher.subscribe_file_deleted(),
                self.senders.file_deleted.clone(),
                |entry: &FileEntry| entry.path.clone(),
                "file-deleted",
            ),
            self.forward(
                watcher.subscribe_file_renamed(),
                self.senders.file_renamed.clone(),
                |event: &RenameEvent<FileEntry>| event.new.path.clone(),
                "file-renamed",
            ),
            self.forward(
                watcher.subscribe_directory_created(),
                self.senders.directory_created.clone(),
                |entry: &DirectoryEntry| entry.path.clone(),
                "directory-created",
            ),
            self.forward(
                watcher.subscribe_directory_deleted(),
                self.senders.directory_deleted.clone(),
                |entry: &DirectoryEntry| entry.path.clone(),
                "directory-deleted",
            ),
            self.forward(
                watcher.subscribe_directory_renamed(),
                self.senders.directory_renamed.clone(),
                |event: &RenameEvent<DirectoryEntry>| event.new.path.clone(),
                "directory-renamed",
            ),
        ]
    }

    fn forward<T, F>(
        &self,
        mut rx: broadcast::Receiver<T>,
        tx: broadcast::Sender<T>,
        key: F,
        feed: &'static str,
    ) -> Subscription
    where
        T: Clone + Send + 'static,
        F: Fn(&T) -> PathBuf + Send + 'static,
    {
        let task = self.runtime.spawn(async move {
            let mut dedup = DistinctUntilChanged::new();
            loop {
                match rx.recv().await {
                    Ok(value) => {
                        if dedup.accept(key(&value)) {
                            // Send errors mean no subscriber; fine.
                            let _ = tx.send(value);
                        } else {
                            crate::debug_event!("fan-in", "duplicate dropped", "{feed}");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("[fan-in] {feed} lagged by {n} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription { task }
    }
}

/// The public-facing watcher surface: one set of six feeds over every
/// registered root.
///
/// Must be created from within a tokio runtime; the per-root forwarding
/// subscriptions are spawned onto it, so `watch` stays callable from
/// any thread afterward.
pub struct FanInAggregator {
    registry: RootRegistry,
    senders: Mutex<Option<FanInSenders>>,
    disposed: AtomicBool,
}

impl FanInAggregator {
    pub fn new(backend: Arc<dyn NotificationBackend>, settings: &Settings) -> Self {
        let capacity = settings.watcher.channel_capacity;
        let senders = FanInSenders::new(capacity);
        let wiring = FanInWiring::new(senders.clone(), Handle::current(), capacity);
        Self {
            registry: RootRegistry::new(backend, wiring),
            senders: Mutex::new(Some(senders)),
            disposed: AtomicBool::new(false),
        }
    }

    /// Register a root and start watching it. See [`RootRegistry::watch`]
    /// for the overlap-collapse and error contract.
    pub fn watch(&self, path: &Path) -> Result<(), WatchError> {
        self.registry.watch(path)
    }

    /// Stop watching exactly this root. No-op if it is not registered.
    pub fn unwatch(&self, path: &Path) {
        self.registry.unwatch(path);
    }

    /// Drop every registered root. The public feeds stay open.
    pub fn clear(&self) {
        self.registry.clear();
    }

    /// Resume delivery on every registered root.
    pub fn start_watching(&self) {
        self.registry.start_all();
    }

    /// Pause delivery on every registered root without unregistering.
    pub fn stop_watching(&self) {
        self.registry.stop_all();
    }

    /// Snapshot of the registered root paths.
    pub fn roots(&self) -> Vec<RootPath> {
        self.registry.roots()
    }

    /// Sever every per-root subscription and watcher, then complete the
    /// six public feeds. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Order matters: subscriptions and watchers go first so no late
        // in-flight event reaches a completed channel.
        self.registry.dispose();
        self.senders.lock().take();
    }

    pub fn subscribe_file_created(&self) -> broadcast::Receiver<FileEntry> {
        match self.senders.lock().as_ref() {
            Some(senders) => senders.file_created.subscribe(),
            None => closed_receiver(),
        }
    }

    pub fn subscribe_file_deleted(&self) -> broadcast::Receiver<FileEntry> {
        match self.senders.lock().as_ref() {
            Some(senders) => senders.file_deleted.subscribe(),
            None => closed_receiver(),
        }
    }

    pub fn subscribe_file_renamed(&self) -> broadcast::Receiver<RenameEvent<FileEntry>> {
        match self.senders.lock().as_ref() {
            Some(senders) => senders.file_renamed.subscribe(),
            None => closed_receiver(),
        }
    }

    pub fn subscribe_directory_created(&self) -> broadcast::Receiver<DirectoryEntry> {
        match self.senders.lock().as_ref() {
            Some(senders) => senders.directory_created.subscribe(),
            None => closed_receiver(),
        }
    }

    pub fn subscribe_directory_deleted(&self) -> broadcast::Receiver<DirectoryEntry> {
        match self.senders.lock().as_ref() {
            Some(senders) => senders.directory_deleted.subscribe(),
            None => closed_receiver(),
        }
    }

    pub fn subscribe_directory_renamed(&self) -> broadcast::Receiver<RenameEvent<DirectoryEntry>> {
        match self.senders.lock().as_ref() {
            Some(senders) => senders.directory_renamed.subscribe(),
            None => closed_receiver(),
        }
    }
}

impl Drop for FanInAggregator {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::super::backend::WatchScope;
    use super::super::event::RawChange;
    use super::super::mock::MockBackend;
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn aggregator_over(backend: &Arc<MockBackend>) -> FanInAggregator {
        FanInAggregator::new(
            Arc::clone(backend) as Arc<dyn NotificationBackend>,
            &Settings::default(),
        )
    }

    async fn recv<T: Clone>(rx: &mut broadcast::Receiver<T>) -> T {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("feed closed unexpectedly")
    }

    #[tokio::test]
    async fn test_fan_in_from_three_roots() {
        let backend = Arc::new(MockBackend::new());
        let aggregator = aggregator_over(&backend);
        let dirs: Vec<_> = (0..3).map(|_| tempfile::tempdir().unwrap()).collect();
        for dir in &dirs {
            aggregator.watch(dir.path()).unwrap();
        }

        let mut rx = aggregator.subscribe_file_created();
        let target = dirs[1].path().join("IMG_0042.CR3");
        backend.emit(
            dirs[1].path(),
            WatchScope::Files,
            RawChange::Created {
                path: target.clone(),
            },
        );

        // Exactly one emission, tagged with the right path; a marker in
        // another root proves no duplicate followed.
        assert_eq!(recv(&mut rx).await.path, target);
        let marker = dirs[2].path().join("marker.jpg");
        backend.emit(
            dirs[2].path(),
            WatchScope::Files,
            RawChange::Created {
                path: marker.clone(),
            },
        );
        assert_eq!(recv(&mut rx).await.path, marker);
    }

    #[tokio::test]
    async fn test_duplicate_burst_collapses_to_one() {
        let backend = Arc::new(MockBackend::new());
        let aggregator = aggregator_over(&backend);
        let dir = tempfile::tempdir().unwrap();
        aggregator.watch(dir.path()).unwrap();

        let mut rx = aggregator.subscribe_file_created();
        let path = dir.path().join("burst.jpg");
        for _ in 0..3 {
            backend.emit(
                dir.path(),
                WatchScope::Files,
                RawChange::Created { path: path.clone() },
            );
        }
        let marker = dir.path().join("marker.jpg");
        backend.emit(
            dir.path(),
            WatchScope::Files,
            RawChange::Created {
                path: marker.clone(),
            },
        );

        assert_eq!(recv(&mut rx).await.path, path);
        // The burst collapsed: the next public value is the marker.
        assert_eq!(recv(&mut rx).await.path, marker);
    }

    #[tokio::test]
    async fn test_rename_never_splits_into_delete_create() {
        let backend = Arc::new(MockBackend::new());
        let aggregator = aggregator_over(&backend);
        let dir = tempfile::tempdir().unwrap();
        aggregator.watch(dir.path()).unwrap();

        let mut renamed = aggregator.subscribe_file_renamed();
        let mut created = aggregator.subscribe_file_created();
        let mut deleted = aggregator.subscribe_file_deleted();

        backend.emit(
            dir.path(),
            WatchScope::Files,
            RawChange::Renamed {
                old: dir.path().join("x.jpg"),
                new: dir.path().join("y.jpg"),
            },
        );

        let event = recv(&mut renamed).await;
        assert_eq!(event.old.path, dir.path().join("x.jpg"));
        assert_eq!(event.new.path, dir.path().join("y.jpg"));

        let marker = dir.path().join("marker.jpg");
        backend.emit(
            dir.path(),
            WatchScope::Files,
            RawChange::Created {
                path: marker.clone(),
            },
        );
        backend.emit(
            dir.path(),
            WatchScope::Files,
            RawChange::Deleted {
                path: marker.clone(),
            },
        );
        assert_eq!(recv(&mut created).await.path, marker);
        assert_eq!(recv(&mut deleted).await.path, marker);
    }

    #[tokio::test]
    async fn test_clear_stops_delivery_for_good() {
        let backend = Arc::new(MockBackend::new());
        let aggregator = aggregator_over(&backend);
        let dir = tempfile::tempdir().unwrap();
        aggregator.watch(dir.path()).unwrap();

        let mut rx = aggregator.subscribe_file_created();
        aggregator.clear();

        // The orphaned backend may still hold buffered events; none may
        // reach a subscriber.
        let delivered = backend.emit(
            dir.path(),
            WatchScope::Files,
            RawChange::Created {
                path: dir.path().join("ghost.jpg"),
            },
        );
        assert_eq!(delivered, 0);
        assert!(
            timeout(Duration::from_millis(200), rx.recv()).await.is_err(),
            "no event may arrive after clear"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_watch_same_path_single_watcher() {
        let backend = Arc::new(MockBackend::new());
        let aggregator = Arc::new(aggregator_over(&backend));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();

        let threads: Vec<_> = (0..50)
            .map(|_| {
                let aggregator = Arc::clone(&aggregator);
                let path = path.clone();
                std::thread::spawn(move || aggregator.watch(&path).unwrap())
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        // Exactly one watcher (two handles) survives; every handle that
        // was created beyond it has been disposed.
        assert_eq!(aggregator.roots().len(), 1);
        assert_eq!(backend.live_handle_count(), 2);
        assert_eq!(backend.disposed_handle_count(), backend.bind_count() - 2);

        let mut rx = aggregator.subscribe_file_created();
        let target = path.join("one.jpg");
        backend.emit(
            &path,
            WatchScope::Files,
            RawChange::Created {
                path: target.clone(),
            },
        );
        assert_eq!(recv(&mut rx).await.path, target);
    }

    #[tokio::test]
    async fn test_dispose_completes_public_feeds() {
        let backend = Arc::new(MockBackend::new());
        let aggregator = aggregator_over(&backend);
        let dir = tempfile::tempdir().unwrap();
        aggregator.watch(dir.path()).unwrap();

        let mut rx = aggregator.subscribe_file_created();
        aggregator.dispose();
        aggregator.dispose();

        loop {
            match rx.recv().await {
                Err(broadcast::error::RecvError::Closed) => break,
                Err(_) => continue,
                Ok(entry) => panic!("unexpected event after dispose: {entry:?}"),
            }
        }

        let mut late = aggregator.subscribe_directory_created();
        assert!(matches!(
            late.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert!(matches!(
            aggregator.watch(dir.path()),
            Err(WatchError::Disposed)
        ));
    }

    #[tokio::test]
    async fn test_unwatch_keeps_other_roots_flowing() {
        let backend = Arc::new(MockBackend::new());
        let aggregator = aggregator_over(&backend);
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        aggregator.watch(a.path()).unwrap();
        aggregator.watch(b.path()).unwrap();

        aggregator.unwatch(a.path());

        let mut rx = aggregator.subscribe_file_created();
        let delivered = backend.emit(
            a.path(),
            WatchScope::Files,
            RawChange::Created {
                path: a.path().join("gone.jpg"),
            },
        );
        assert_eq!(delivered, 0);

        let target = b.path().join("still.jpg");
        backend.emit(
            b.path(),
            WatchScope::Files,
            RawChange::Created {
                path: target.clone(),
            },
        );
        assert_eq!(recv(&mut rx).await.path, target);
    }
}
