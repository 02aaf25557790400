//! In-memory notification backend for deterministic tests.
//!
//! Records every bind and lets tests inject raw changes as if the OS
//! had delivered them, plus count handle disposals to prove nothing
//! leaks. Paths still have to exist on disk (tests use tempdirs), so
//! the existence contract matches the production backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::backend::{
    BindRequest, NotificationBackend, NotificationHandle, RawEventSink, WatchScope,
};
use super::error::WatchError;
use super::event::RawChange;

struct MockBind {
    path: PathBuf,
    recursive: bool,
    scope: WatchScope,
    // Shared with the handle so dropping the handle releases the sink,
    // mirroring the production contract ("dropping it releases the
    // native resource"). Keeping the sink alive past the handle would
    // pin the watcher's broadcast senders and never close its feeds.
    sink: Arc<Mutex<Option<RawEventSink>>>,
    enabled: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
}

/// Snapshot of one recorded bind, for assertions.
#[derive(Debug, Clone)]
pub(crate) struct BindInfo {
    pub(crate) path: PathBuf,
    pub(crate) recursive: bool,
    pub(crate) scope: WatchScope,
    pub(crate) enabled: bool,
    pub(crate) alive: bool,
}

pub(crate) struct MockBackend {
    binds: Mutex<Vec<MockBind>>,
    bind_count: AtomicUsize,
    disposed_handles: Arc<AtomicUsize>,
    fail_binds: AtomicBool,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self {
            binds: Mutex::new(Vec::new()),
            bind_count: AtomicUsize::new(0),
            disposed_handles: Arc::new(AtomicUsize::new(0)),
            fail_binds: AtomicBool::new(false),
        }
    }

    /// Make every subsequent bind fail with `ResourceExhausted`.
    pub(crate) fn set_fail_binds(&self, fail: bool) {
        self.fail_binds.store(fail, Ordering::SeqCst);
    }

    /// Deliver a raw change to every live, enabled bind matching the
    /// root and scope, returning how many sinks received it.
    pub(crate) fn emit(&self, root: &Path, scope: WatchScope, change: RawChange) -> usize {
        let binds = self.binds.lock();
        let mut delivered = 0;
        for bind in binds.iter() {
            if bind.alive.load(Ordering::SeqCst)
                && bind.enabled.load(Ordering::SeqCst)
                && bind.scope == scope
                && bind.path == root
            {
                if let Some(sink) = bind.sink.lock().as_ref() {
                    sink(change.clone());
                    delivered += 1;
                }
            }
        }
        delivered
    }

    pub(crate) fn bind_count(&self) -> usize {
        self.bind_count.load(Ordering::SeqCst)
    }

    pub(crate) fn disposed_handle_count(&self) -> usize {
        self.disposed_handles.load(Ordering::SeqCst)
    }

    pub(crate) fn live_handle_count(&self) -> usize {
        self.binds
            .lock()
            .iter()
            .filter(|bind| bind.alive.load(Ordering::SeqCst))
            .count()
    }

    pub(crate) fn bind_info(&self) -> Vec<BindInfo> {
        self.binds
            .lock()
            .iter()
            .map(|bind| BindInfo {
                path: bind.path.clone(),
                recursive: bind.recursive,
                scope: bind.scope,
                enabled: bind.enabled.load(Ordering::SeqCst),
                alive: bind.alive.load(Ordering::SeqCst),
            })
            .collect()
    }
}

impl NotificationBackend for MockBackend {
    fn bind(
        &self,
        request: BindRequest,
        sink: RawEventSink,
    ) -> Result<Box<dyn NotificationHandle>, WatchError> {
        if self.fail_binds.load(Ordering::SeqCst) {
            return Err(WatchError::ResourceExhausted {
                reason: "mock handle limit".to_string(),
            });
        }
        if !request.path.is_dir() {
            return Err(WatchError::DirectoryNotFound { path: request.path });
        }

        let enabled = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicBool::new(true));
        let sink = Arc::new(Mutex::new(Some(sink)));

        self.binds.lock().push(MockBind {
            path: request.path,
            recursive: request.recursive,
            scope: request.scope,
            sink: Arc::clone(&sink),
            enabled: Arc::clone(&enabled),
            alive: Arc::clone(&alive),
        });
        self.bind_count.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockHandle {
            sink,
            enabled,
            alive,
            disposed_handles: Arc::clone(&self.disposed_handles),
        }))
    }
}

struct MockHandle {
    sink: Arc<Mutex<Option<RawEventSink>>>,
    enabled: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    disposed_handles: Arc<AtomicUsize>,
}

impl NotificationHandle for MockHandle {
    fn enable(&mut self) -> Result<(), WatchError> {
        self.enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disable(&mut self) {
        self.enabled.store(false, Ordering::SeqCst);
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        self.enabled.store(false, Ordering::SeqCst);
        // Release the sink so the watcher's broadcast senders it captured
        // can drop, matching the real backend's handle-drop teardown.
        self.sink.lock().take();
        self.disposed_handles.fetch_add(1, Ordering::SeqCst);
    }
}
