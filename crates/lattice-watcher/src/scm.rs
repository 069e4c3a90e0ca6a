//! Revision-control scanner
//!
//! Complements the filesystem watcher with a periodic git poll: when HEAD has
//! not moved it reports working-copy changes, when it has moved it reports
//! the name-status diff between the old and new head. Duplicate reports with
//! the watcher are expected and absorbed by the engine's change gate.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use git2::{Delta, Oid, Repository, StatusOptions};

/// Canonical status of a changed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScmStatus {
    Added,
    Modified,
    Removed,
}

/// One path-level change reported by the scanner. Paths are absolute.
#[derive(Debug, Clone)]
pub struct ScmChange {
    pub path: PathBuf,
    pub status: ScmStatus,
}

/// Polls a git working copy for changes since the last poll.
pub struct GitScanner {
    repo: Repository,
    workdir: PathBuf,
    last_head: Oid,
}

impl GitScanner {
    /// Open the repository at `root`. Fails when `root` is not a working
    /// copy or has no commits yet; callers treat that as "scanner disabled".
    pub fn new(root: &Path) -> Result<Self> {
        let repo = Repository::open(root)
            .with_context(|| format!("not a git repository: {}", root.display()))?;
        let workdir = repo
            .workdir()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| root.to_path_buf());
        let last_head = head_oid(&repo)?;
        Ok(GitScanner {
            repo,
            workdir,
            last_head,
        })
    }

    /// Paths changed since the previous call. Advances the stored head when
    /// it has moved.
    pub fn changed_files(&mut self) -> Result<Vec<ScmChange>> {
        let head = head_oid(&self.repo)?;
        if head == self.last_head {
            return self.working_copy_changes();
        }
        let changes = self.commit_range_changes(self.last_head, head)?;
        self.last_head = head;
        Ok(changes)
    }

    fn working_copy_changes(&self) -> Result<Vec<ScmChange>> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let statuses = self.repo.statuses(Some(&mut opts))?;

        let mut changes = Vec::new();
        for entry in statuses.iter() {
            let Some(path) = entry.path() else { continue };
            let status = entry.status();
            let mapped = if status.is_wt_new() || status.is_index_new() {
                ScmStatus::Added
            } else if status.is_wt_modified() || status.is_index_modified() {
                ScmStatus::Modified
            } else if status.is_wt_deleted() || status.is_index_deleted() {
                ScmStatus::Removed
            } else if status.is_wt_renamed() || status.is_index_renamed() {
                // Without rename detection the old path shows up as deleted
                // on its own, so the new path counts as an add.
                ScmStatus::Added
            } else {
                continue;
            };
            changes.push(ScmChange {
                path: self.workdir.join(path),
                status: mapped,
            });
        }
        Ok(changes)
    }

    fn commit_range_changes(&self, old: Oid, new: Oid) -> Result<Vec<ScmChange>> {
        let old_tree = self.repo.find_commit(old)?.tree()?;
        let new_tree = self.repo.find_commit(new)?.tree()?;
        let diff = self
            .repo
            .diff_tree_to_tree(Some(&old_tree), Some(&new_tree), None)?;

        let mut changes = Vec::new();
        for delta in diff.deltas() {
            let new_path = delta.new_file().path().map(|p| self.workdir.join(p));
            let old_path = delta.old_file().path().map(|p| self.workdir.join(p));
            match delta.status() {
                Delta::Added => {
                    if let Some(path) = new_path {
                        changes.push(ScmChange {
                            path,
                            status: ScmStatus::Added,
                        });
                    }
                }
                Delta::Modified => {
                    if let Some(path) = new_path {
                        changes.push(ScmChange {
                            path,
                            status: ScmStatus::Modified,
                        });
                    }
                }
                Delta::Deleted => {
                    if let Some(path) = old_path {
                        changes.push(ScmChange {
                            path,
                            status: ScmStatus::Removed,
                        });
                    }
                }
                // Renames split into a remove of the old path and an add of
                // the new one.
                Delta::Renamed => {
                    if let Some(path) = old_path {
                        changes.push(ScmChange {
                            path,
                            status: ScmStatus::Removed,
                        });
                    }
                    if let Some(path) = new_path {
                        changes.push(ScmChange {
                            path,
                            status: ScmStatus::Added,
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(changes)
    }
}

fn head_oid(repo: &Repository) -> Result<Oid> {
    Ok(repo.head()?.peel_to_commit()?.id())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit_all(repo: &Repository, message: &str) {
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        // add_all stages new and modified entries; update_all stages removals.
        index.update_all(["*"].iter(), None).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap();
    }

    #[test]
    fn non_repository_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(GitScanner::new(dir.path()).is_err());
    }

    #[test]
    fn reports_working_copy_and_committed_changes() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        std::fs::write(dir.path().join("a.ts"), "export function f() {}").unwrap();
        commit_all(&repo, "init");

        let mut scanner = GitScanner::new(dir.path()).unwrap();
        assert!(scanner.changed_files().unwrap().is_empty());

        // Untracked file shows up as an add while HEAD is unchanged.
        std::fs::write(dir.path().join("b.ts"), "export function g() {}").unwrap();
        let changes = scanner.changed_files().unwrap();
        assert!(changes
            .iter()
            .any(|c| c.path.ends_with("b.ts") && c.status == ScmStatus::Added));

        // After a commit the head diff reports the same path once.
        commit_all(&repo, "add b");
        let changes = scanner.changed_files().unwrap();
        assert!(changes
            .iter()
            .any(|c| c.path.ends_with("b.ts") && c.status == ScmStatus::Added));

        // Head stored; a clean tree reports nothing.
        assert!(scanner.changed_files().unwrap().is_empty());
    }

    #[test]
    fn reports_deletions_between_commits() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        std::fs::write(dir.path().join("a.ts"), "x").unwrap();
        std::fs::write(dir.path().join("b.ts"), "y").unwrap();
        commit_all(&repo, "init");

        let mut scanner = GitScanner::new(dir.path()).unwrap();

        std::fs::remove_file(dir.path().join("b.ts")).unwrap();
        commit_all(&repo, "drop b");

        let changes = scanner.changed_files().unwrap();
        assert!(changes
            .iter()
            .any(|c| c.path.ends_with("b.ts") && c.status == ScmStatus::Removed));
    }
}
