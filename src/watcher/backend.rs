//! Notification backend seam and the `notify`-based implementation.
//!
//! The OS-level directory notification primitive is an external
//! collaborator: the rest of the watcher only sees [`NotificationBackend`]
//! and [`NotificationHandle`]. The production [`NotifyBackend`] binds one
//! `notify::RecommendedWatcher` per handle and translates raw notify
//! events into [`RawChange`] records, on notify's own callback thread.
//!
//! Backends are best-effort: bursts exceeding the OS buffer are silent
//! loss, and permission errors on nested folders during recursive setup
//! are swallowed by the primitive, so an inaccessible branch simply
//! produces no events.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};

use super::error::WatchError;
use super::event::RawChange;

/// What a handle reports on: filename changes in the immediate directory,
/// or directory-name changes (callers bind those recursively).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchScope {
    Files,
    Directories,
}

/// One bind request: a root, a recursion mode, and a scope.
#[derive(Debug, Clone)]
pub struct BindRequest {
    pub path: PathBuf,
    pub recursive: bool,
    pub scope: WatchScope,
}

/// Callback invoked once per raw change, on an arbitrary backend thread.
pub type RawEventSink = Arc<dyn Fn(RawChange) + Send + Sync>;

/// A source of raw filesystem change notifications.
pub trait NotificationBackend: Send + Sync {
    /// Bind to a root. Fails with [`WatchError::DirectoryNotFound`] if the
    /// path is absent at bind time. The returned handle starts disabled;
    /// dropping it releases the native resource.
    fn bind(
        &self,
        request: BindRequest,
        sink: RawEventSink,
    ) -> Result<Box<dyn NotificationHandle>, WatchError>;
}

/// One bound native notification handle.
pub trait NotificationHandle: Send {
    /// Start delivering notifications. Repeated calls are no-ops.
    fn enable(&mut self) -> Result<(), WatchError>;

    /// Stop delivering notifications. Repeated calls are no-ops.
    fn disable(&mut self);
}

/// Production backend over `notify::RecommendedWatcher`.
#[derive(Debug, Default)]
pub struct NotifyBackend;

impl NotifyBackend {
    pub fn new() -> Self {
        Self
    }
}

impl NotificationBackend for NotifyBackend {
    fn bind(
        &self,
        request: BindRequest,
        sink: RawEventSink,
    ) -> Result<Box<dyn NotificationHandle>, WatchError> {
        if !request.path.is_dir() {
            return Err(WatchError::DirectoryNotFound { path: request.path });
        }

        let scope = request.scope;
        let mut renames = RenameTracker::default();
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for change in translate(scope, &mut renames, event) {
                    sink(change);
                }
            }
            Err(e) => {
                // Mid-stream errors are accepted loss, not propagated.
                tracing::warn!("[backend] watch stream error: {e}");
            }
        })
        .map_err(|e| WatchError::from_notify(&request.path, e))?;

        Ok(Box::new(NotifyHandle {
            watcher,
            path: request.path,
            mode: if request.recursive {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            },
            enabled: false,
        }))
    }
}

struct NotifyHandle {
    watcher: notify::RecommendedWatcher,
    path: PathBuf,
    mode: RecursiveMode,
    enabled: bool,
}

impl NotificationHandle for NotifyHandle {
    fn enable(&mut self) -> Result<(), WatchError> {
        if self.enabled {
            return Ok(());
        }
        self.watcher
            .watch(&self.path, self.mode)
            .map_err(|e| WatchError::from_notify(&self.path, e))?;
        self.enabled = true;
        Ok(())
    }

    fn disable(&mut self) {
        if self.enabled {
            let _ = self.watcher.unwatch(&self.path);
            self.enabled = false;
        }
    }
}

/// Pairs split rename halves by notify's tracker id.
///
/// Unpaired halves are dropped when the table grows past its cap; a
/// `From` whose `To` never arrives is outside the watched tree anyway.
#[derive(Default)]
struct RenameTracker {
    pending: HashMap<usize, PathBuf>,
}

const RENAME_TABLE_CAP: usize = 64;

fn translate(scope: WatchScope, renames: &mut RenameTracker, event: Event) -> Vec<RawChange> {
    let tracker = event.tracker();
    match event.kind {
        EventKind::Create(kind) => {
            let Some(path) = event.paths.into_iter().next() else {
                return Vec::new();
            };
            if create_matches_scope(scope, kind, &path) {
                vec![RawChange::Created { path }]
            } else {
                Vec::new()
            }
        }
        EventKind::Remove(kind) => {
            let Some(path) = event.paths.into_iter().next() else {
                return Vec::new();
            };
            if remove_matches_scope(scope, kind) {
                vec![RawChange::Deleted { path }]
            } else {
                Vec::new()
            }
        }
        EventKind::Modify(ModifyKind::Name(mode)) => {
            let mut paths = event.paths.into_iter();
            match mode {
                RenameMode::Both => match (paths.next(), paths.next()) {
                    (Some(old), Some(new)) if path_matches_scope(scope, &new) => {
                        vec![RawChange::Renamed { old, new }]
                    }
                    _ => Vec::new(),
                },
                RenameMode::From => {
                    if let (Some(id), Some(path)) = (tracker, paths.next()) {
                        if renames.pending.len() >= RENAME_TABLE_CAP {
                            renames.pending.clear();
                        }
                        renames.pending.insert(id, path);
                    }
                    Vec::new()
                }
                RenameMode::To => {
                    let Some(new) = paths.next() else {
                        return Vec::new();
                    };
                    if !path_matches_scope(scope, &new) {
                        return Vec::new();
                    }
                    match tracker.and_then(|id| renames.pending.remove(&id)) {
                        Some(old) => vec![RawChange::Renamed { old, new }],
                        // Moved in from outside the watched tree.
                        None => vec![RawChange::Created { path: new }],
                    }
                }
                // `Any` is the catch-all some platforms emit with both
                // paths supplied; treat it as a complete rename.
                _ => match (paths.next(), paths.next()) {
                    (Some(old), Some(new)) if path_matches_scope(scope, &new) => {
                        vec![RawChange::Renamed { old, new }]
                    }
                    _ => Vec::new(),
                },
            }
        }
        _ => Vec::new(),
    }
}

fn create_matches_scope(scope: WatchScope, kind: CreateKind, path: &std::path::Path) -> bool {
    match scope {
        WatchScope::Files => {
            matches!(kind, CreateKind::File)
                || (matches!(kind, CreateKind::Any) && path.is_file())
        }
        WatchScope::Directories => {
            matches!(kind, CreateKind::Folder)
                || (matches!(kind, CreateKind::Any) && path.is_dir())
        }
    }
}

fn remove_matches_scope(scope: WatchScope, kind: RemoveKind) -> bool {
    // A removed path cannot be stat'ed, so ambiguous kinds are dropped.
    match scope {
        WatchScope::Files => matches!(kind, RemoveKind::File),
        WatchScope::Directories => matches!(kind, RemoveKind::Folder),
    }
}

fn path_matches_scope(scope: WatchScope, path: &std::path::Path) -> bool {
    match scope {
        WatchScope::Files => path.is_file(),
        WatchScope::Directories => path.is_dir(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_bind_missing_directory_fails() {
        let backend = NotifyBackend::new();
        let result = backend.bind(
            BindRequest {
                path: PathBuf::from("/no/such/directory/cullwatch"),
                recursive: false,
                scope: WatchScope::Files,
            },
            Arc::new(|_| {}),
        );
        assert!(matches!(
            result,
            Err(WatchError::DirectoryNotFound { .. })
        ));
    }

    #[test]
    fn test_translate_folder_create_filtered_from_file_scope() {
        let mut renames = RenameTracker::default();
        let event = Event::new(EventKind::Create(CreateKind::Folder))
            .add_path(PathBuf::from("/photos/new"));
        assert!(translate(WatchScope::Files, &mut renames, event).is_empty());
    }

    #[test]
    fn test_translate_file_remove() {
        let mut renames = RenameTracker::default();
        let event = Event::new(EventKind::Remove(RemoveKind::File))
            .add_path(PathBuf::from("/photos/x.jpg"));
        assert_eq!(
            translate(WatchScope::Files, &mut renames, event),
            vec![RawChange::Deleted {
                path: PathBuf::from("/photos/x.jpg")
            }]
        );
    }

    #[test]
    fn test_translate_pairs_split_rename_by_tracker() {
        let dir = tempfile::tempdir().unwrap();
        let new_path = dir.path().join("y.jpg");
        std::fs::write(&new_path, b"jpeg").unwrap();

        let mut renames = RenameTracker::default();
        let from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(PathBuf::from("/photos/x.jpg"))
            .set_tracker(7);
        assert!(translate(WatchScope::Files, &mut renames, from).is_empty());

        let to = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path(new_path.clone())
            .set_tracker(7);
        assert_eq!(
            translate(WatchScope::Files, &mut renames, to),
            vec![RawChange::Renamed {
                old: PathBuf::from("/photos/x.jpg"),
                new: new_path,
            }]
        );
    }

    #[test]
    fn test_translate_unpaired_to_becomes_create() {
        let dir = tempfile::tempdir().unwrap();
        let new_path = dir.path().join("moved-in.jpg");
        std::fs::write(&new_path, b"jpeg").unwrap();

        let mut renames = RenameTracker::default();
        let to = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path(new_path.clone())
            .set_tracker(9);
        assert_eq!(
            translate(WatchScope::Files, &mut renames, to),
            vec![RawChange::Created { path: new_path }]
        );
    }

    #[test]
    fn test_path_scope_check_against_real_entries() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.jpg");
        std::fs::write(&file, b"jpeg").unwrap();

        assert!(path_matches_scope(WatchScope::Files, &file));
        assert!(!path_matches_scope(WatchScope::Directories, &file));
        assert!(path_matches_scope(WatchScope::Directories, dir.path()));
        assert!(!path_matches_scope(WatchScope::Files, Path::new("/nope")));
    }
}
