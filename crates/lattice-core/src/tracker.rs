//! Content fingerprints persisted across restarts
//!
//! A fingerprint is a blake3 digest of the file bytes plus the mtime observed
//! at the last successful processing. Together they answer "has this path
//! changed?" without reparsing, and they survive restarts through a JSON
//! state file at the tree root.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::UNIX_EPOCH;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Name of the state file written at the watched root.
pub const STATE_FILE: &str = ".goparse_state.json";

/// Answer from [`FileTracker::has_changed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    Changed,
    Unchanged,
    /// The file no longer exists on disk.
    Missing,
}

/// One persisted fingerprint record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    pub path: String,
    pub hash: String,
    /// Seconds since epoch of the mtime at last successful processing.
    pub modified: i64,
}

/// Tracks per-file fingerprints under a reader-writer lock.
#[derive(Debug)]
pub struct FileTracker {
    states: RwLock<HashMap<String, FileState>>,
    state_path: PathBuf,
}

impl FileTracker {
    pub fn new(root: &Path) -> Self {
        FileTracker {
            states: RwLock::new(HashMap::new()),
            state_path: root.join(STATE_FILE),
        }
    }

    /// Load persisted state. A missing file is not an error; the caller is
    /// expected to treat any other failure as non-fatal and start empty.
    pub fn load(&self) -> anyhow::Result<()> {
        let data = match std::fs::read(&self.state_path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("reading {}", self.state_path.display()))
            }
        };

        let records: Vec<FileState> = serde_json::from_slice(&data)
            .with_context(|| format!("decoding {}", self.state_path.display()))?;

        let mut states = self.states.write().expect("tracker lock poisoned");
        for record in records {
            states.insert(record.path.clone(), record);
        }
        debug!(count = states.len(), "loaded fingerprint state");
        Ok(())
    }

    /// Persist current state. Snapshots under the read lock, writes outside
    /// it.
    pub fn save(&self) -> anyhow::Result<()> {
        let records: Vec<FileState> = {
            let states = self.states.read().expect("tracker lock poisoned");
            states.values().cloned().collect()
        };

        let data = serde_json::to_vec_pretty(&records)?;
        std::fs::write(&self.state_path, data)
            .with_context(|| format!("writing {}", self.state_path.display()))?;
        Ok(())
    }

    /// Compare the file on disk with the stored fingerprint.
    ///
    /// Returns `Changed` when no record exists or the digest differs, and
    /// `Missing` when the file is gone. The decision is digest-only: a bare
    /// mtime bump with identical bytes reports `Unchanged`, which is what
    /// keeps touched-but-unedited files out of the pipeline. I/O errors
    /// other than not-found propagate.
    pub fn has_changed(&self, path: &Path) -> std::io::Result<ChangeStatus> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ChangeStatus::Missing)
            }
            Err(e) => return Err(e),
        };
        let hash = digest(&bytes);

        let states = self.states.read().expect("tracker lock poisoned");
        match states.get(&key(path)) {
            Some(prior) if prior.hash == hash => Ok(ChangeStatus::Unchanged),
            _ => Ok(ChangeStatus::Changed),
        }
    }

    /// Recompute and commit the fingerprint for `path`.
    pub fn update_state(&self, path: &Path) -> std::io::Result<()> {
        let meta = std::fs::metadata(path)?;
        let modified = mtime_secs(&meta)?;
        let bytes = std::fs::read(path)?;
        let hash = digest(&bytes);

        let mut states = self.states.write().expect("tracker lock poisoned");
        states.insert(
            key(path),
            FileState {
                path: key(path),
                hash,
                modified,
            },
        );
        Ok(())
    }

    /// Forget a path. Idempotent.
    pub fn remove_state(&self, path: &Path) {
        let mut states = self.states.write().expect("tracker lock poisoned");
        states.remove(&key(path));
    }

    pub fn contains(&self, path: &Path) -> bool {
        let states = self.states.read().expect("tracker lock poisoned");
        states.contains_key(&key(path))
    }

    /// All tracked paths, sorted for stable listings.
    pub fn paths(&self) -> Vec<String> {
        let states = self.states.read().expect("tracker lock poisoned");
        let mut paths: Vec<String> = states.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        let states = self.states.read().expect("tracker lock poisoned");
        states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut states = self.states.write().expect("tracker lock poisoned");
        states.clear();
    }
}

fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn mtime_secs(meta: &std::fs::Metadata) -> std::io::Result<i64> {
    let modified = meta.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0))
}

/// Digest over the file body only. Path and mtime stay out of the hash so
/// moves and touches do not look like edits.
fn digest(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}
