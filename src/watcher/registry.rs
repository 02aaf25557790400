//! Registry of active watch roots.
//!
//! Owns the map from normalized root path to its watcher + subscription
//! bundle and enforces the no-overlap invariant: no root is registered
//! while an ancestor (or descendant) root already is. Watching both a
//! drive root and a subdirectory of it would deliver every event under
//! the subdirectory twice and corrupt consumer state, so overlapping
//! requests collapse to the first registered root.
//!
//! Policy: **first wins**. A later `watch` that is an ancestor of a
//! registered root does NOT upgrade the narrower watch; it is a no-op,
//! matching the collapse in the other direction.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;

use super::aggregator::{FanInWiring, Subscription};
use super::backend::NotificationBackend;
use super::error::WatchError;
use super::path::RootPath;
use super::single_root::SingleRootWatcher;

/// One registered root: its watcher and the fan-in subscriptions wired
/// to it. Created on `watch` acceptance, destroyed on `unwatch`/`clear`.
struct WatchedRoot {
    watcher: Arc<SingleRootWatcher>,
    subscriptions: Vec<Subscription>,
}

impl Drop for WatchedRoot {
    fn drop(&mut self) {
        // Gate the sinks before the subscription tokens go, so nothing
        // new enters the pipeline while the tokens are being severed.
        self.watcher.dispose();
        for subscription in &self.subscriptions {
            subscription.dispose();
        }
    }
}

/// Tracks the active set of watched roots and their watcher lifecycles.
pub struct RootRegistry {
    backend: Arc<dyn NotificationBackend>,
    fan_in: FanInWiring,
    roots: DashMap<RootPath, WatchedRoot>,
    /// Serializes structural changes so the overlap check and the
    /// insert observe a consistent root set even for different keys.
    mutation: Mutex<()>,
    disposed: AtomicBool,
}

impl RootRegistry {
    pub(crate) fn new(backend: Arc<dyn NotificationBackend>, fan_in: FanInWiring) -> Self {
        Self {
            backend,
            fan_in,
            roots: DashMap::new(),
            mutation: Mutex::new(()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Register `path` and start watching it.
    ///
    /// No-op if the path is already registered or overlaps a registered
    /// root in either direction (first wins). Fails with
    /// [`WatchError::DirectoryNotFound`] if the path does not exist at
    /// call time; never retried internally.
    pub fn watch(&self, path: &Path) -> Result<(), WatchError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(WatchError::Disposed);
        }
        if !path.is_dir() {
            return Err(WatchError::DirectoryNotFound {
                path: path.to_path_buf(),
            });
        }

        let root = RootPath::normalize(path);
        let _guard = self.mutation.lock();

        if let Some(existing) = self.find_overlap(&root) {
            crate::debug_event!("registry", "collapsed", "{root} overlaps {existing}");
            return Ok(());
        }

        // Bind before inserting; a half-built watcher that loses the
        // insert is disposed without ever being started.
        let watcher = Arc::new(SingleRootWatcher::new(
            Arc::clone(&self.backend),
            self.fan_in.capacity(),
        ));
        watcher.set_watching_directory(root.as_path())?;

        match self.roots.entry(root.clone()) {
            Entry::Occupied(_) => {
                watcher.dispose();
            }
            Entry::Vacant(slot) => {
                let subscriptions = self.fan_in.attach(&watcher);
                slot.insert(WatchedRoot {
                    watcher: Arc::clone(&watcher),
                    subscriptions,
                });
                watcher.start_watching();
                crate::log_event!("registry", "watching", "{root}");
            }
        }
        Ok(())
    }

    /// Remove exactly this key, severing its subscriptions and disposing
    /// its watcher. No-op (and no error) if the key is not registered;
    /// descendants and ancestors of it are untouched.
    pub fn unwatch(&self, path: &Path) {
        let root = RootPath::normalize(path);
        let _guard = self.mutation.lock();
        if self.roots.remove(&root).is_some() {
            crate::log_event!("registry", "unwatched", "{root}");
        }
    }

    /// Dispose every registered entry, leaving the registry empty.
    pub fn clear(&self) {
        let _guard = self.mutation.lock();
        let count = self.roots.len();
        self.roots.clear();
        if count > 0 {
            crate::log_event!("registry", "cleared", "{count} roots");
        }
    }

    /// Start every registered watcher without altering the set.
    pub fn start_all(&self) {
        for entry in self.roots.iter() {
            entry.value().watcher.start_watching();
        }
    }

    /// Stop every registered watcher without altering the set.
    pub fn stop_all(&self) {
        for entry in self.roots.iter() {
            entry.value().watcher.stop_watching();
        }
    }

    /// Snapshot of the registered root paths.
    pub fn roots(&self) -> Vec<RootPath> {
        self.roots.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Idempotent; further `watch` calls fail with `Disposed`.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.clear();
    }

    fn find_overlap(&self, root: &RootPath) -> Option<RootPath> {
        self.roots
            .iter()
            .map(|entry| entry.key().clone())
            .find(|registered| registered.overlaps(root))
    }
}

impl Drop for RootRegistry {
    fn drop(&mut self) {
        self.dispose();
    }
}
