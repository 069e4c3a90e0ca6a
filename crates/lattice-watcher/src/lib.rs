//! Filesystem watcher and revision-control scanner

pub mod scm;
pub mod watcher;

pub use scm::{GitScanner, ScmChange, ScmStatus};
pub use watcher::{FileWatcher, WatchEvent};
