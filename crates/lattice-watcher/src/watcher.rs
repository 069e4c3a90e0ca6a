//! Filesystem watcher
//!
//! Registers one non-recursive watch per directory so the skip list works at
//! registration time, mirrors new directories as they appear, and translates
//! notify's event kinds into the engine's watch events.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::Result;
use lattice_core::{is_skipped_dir, is_supported_path, is_under_skipped_dir};
use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Events emitted by the file watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Supported file created.
    Created(PathBuf),
    /// Directory created; the engine registers a watch for it.
    DirCreated(PathBuf),
    /// Supported file written.
    Modified(PathBuf),
    /// File removed.
    Removed(PathBuf),
    /// File renamed away; the path no longer exists.
    Renamed(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Created(p)
            | WatchEvent::DirCreated(p)
            | WatchEvent::Modified(p)
            | WatchEvent::Removed(p)
            | WatchEvent::Renamed(p) => p,
        }
    }
}

/// Watches a source tree and pushes [`WatchEvent`]s into a channel.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FileWatcher {
    /// Create a watcher delivering events through `tx`. No watches are
    /// registered until [`FileWatcher::start`].
    pub fn new(root: impl AsRef<Path>, tx: mpsc::UnboundedSender<WatchEvent>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => translate(event, &tx),
                    Err(e) => error!("watch error: {e}"),
                }
            })?;

        Ok(FileWatcher { watcher, root })
    }

    /// Walk the tree and register a watch on every directory not in the skip
    /// list. Individual watch failures log and continue; only a failure on
    /// the root itself is fatal. Returns the number of watched directories.
    pub fn start(&mut self) -> Result<usize> {
        let root = self.root.clone();
        self.watcher.watch(&root, RecursiveMode::NonRecursive)?;
        let mut watched = 1;

        let mut queue = VecDeque::new();
        queue.push_back(root);
        while let Some(dir) = queue.pop_front() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("cannot read directory {}: {e}", dir.display());
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                let name = entry.file_name();
                if name.to_str().map(is_skipped_dir).unwrap_or(false) {
                    continue;
                }
                match self.watcher.watch(&path, RecursiveMode::NonRecursive) {
                    Ok(()) => watched += 1,
                    Err(e) => {
                        warn!("failed to watch {}: {e}", path.display());
                        continue;
                    }
                }
                queue.push_back(path);
            }
        }

        debug!(dirs = watched, root = %self.root.display(), "watch registration complete");
        Ok(watched)
    }

    /// Add a watch for a directory created after start. Skip-listed names are
    /// ignored, and failures log and continue.
    pub fn watch_new_directory(&mut self, path: &Path) {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if is_skipped_dir(name) {
            return;
        }
        if let Err(e) = self.watcher.watch(path, RecursiveMode::NonRecursive) {
            warn!("failed to watch new directory {}: {e}", path.display());
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Translate one notify event into zero or more watch events.
fn translate(event: notify::Event, tx: &mpsc::UnboundedSender<WatchEvent>) {
    for path in event.paths {
        if is_under_skipped_dir(&path) {
            continue;
        }

        let out = match event.kind {
            EventKind::Create(_) => {
                if path.is_dir() {
                    Some(WatchEvent::DirCreated(path))
                } else if is_supported_path(&path) {
                    Some(WatchEvent::Created(path))
                } else {
                    None
                }
            }
            // Rename events arrive as metadata modifications; whether the
            // path survived decides modify versus remove.
            EventKind::Modify(ModifyKind::Name(_)) => {
                if path.exists() {
                    if is_supported_path(&path) {
                        Some(WatchEvent::Modified(path))
                    } else {
                        None
                    }
                } else {
                    Some(WatchEvent::Renamed(path))
                }
            }
            EventKind::Modify(_) => {
                if is_supported_path(&path) && path.is_file() {
                    Some(WatchEvent::Modified(path))
                } else {
                    None
                }
            }
            EventKind::Remove(_) => Some(WatchEvent::Removed(path)),
            _ => None,
        };

        if let Some(out) = out {
            if tx.send(out).is_err() {
                debug!("watch event receiver dropped");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Duration};

    #[tokio::test]
    async fn watcher_creation() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let watcher = FileWatcher::new(dir.path(), tx);
        assert!(watcher.is_ok());
    }

    #[tokio::test]
    async fn start_registers_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/components")).unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/react")).unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut watcher = FileWatcher::new(dir.path(), tx).unwrap();
        let watched = watcher.start().unwrap();

        // Root, src, src/components; node_modules and below excluded.
        assert_eq!(watched, 3);
    }

    #[tokio::test]
    async fn write_event_is_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.ts");
        std::fs::write(&file, "export function f() {}").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = FileWatcher::new(dir.path(), tx).unwrap();
        watcher.start().unwrap();

        std::fs::write(&file, "export function f() { return 1 }").unwrap();
        sleep(Duration::from_millis(200)).await;

        // Platform backends differ in what they coalesce; accept any event
        // for the path we touched.
        if let Ok(event) = rx.try_recv() {
            assert_eq!(event.path(), file);
        }
    }

    #[test]
    fn unsupported_files_are_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.md");
        std::fs::write(&file, "x").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let event = notify::Event {
            kind: EventKind::Modify(ModifyKind::Data(notify::event::DataChange::Content)),
            paths: vec![file],
            attrs: Default::default(),
        };
        translate(event, &tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn skipped_paths_are_filtered() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let event = notify::Event {
            kind: EventKind::Remove(notify::event::RemoveKind::File),
            paths: vec![PathBuf::from("/p/node_modules/react/index.js")],
            attrs: Default::default(),
        };
        translate(event, &tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn removal_passes_without_extension_filter() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let event = notify::Event {
            kind: EventKind::Remove(notify::event::RemoveKind::File),
            paths: vec![PathBuf::from("/p/src/a.ts")],
            attrs: Default::default(),
        };
        translate(event, &tx);
        assert_eq!(
            rx.try_recv().unwrap(),
            WatchEvent::Removed(PathBuf::from("/p/src/a.ts"))
        );
    }
}
