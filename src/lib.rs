//! Multi-root filesystem change watching for photo-culling workflows.
//!
//! The application points panes at arbitrary directories and mounts or
//! removes drives at runtime; this crate keeps its preview lists and
//! timeline in sync with the live filesystem. Callers `watch` any number
//! of roots, overlapping roots collapse to the first registered
//! ancestor, and every consumer subscribes once to six unified feeds:
//! file created/deleted/renamed and directory created/deleted/renamed.
//!
//! Feeds are best-effort, not exactly-once: OS notification buffers can
//! overflow silently, and inaccessible nested folders produce no events.

pub mod config;
pub mod logging;
pub mod watcher;

pub use config::Settings;
pub use watcher::{
    BindRequest, DirectoryEntry, DistinctUntilChanged, FanInAggregator, FileEntry,
    NotificationBackend, NotificationHandle, NotifyBackend, RawChange, RawEventSink, RenameEvent,
    RootPath, RootRegistry, SingleRootWatcher, WatchError, WatchScope,
};
