//! Git-backed snapshot stack for undoing destructive actions.
//!
//! Each snapshot is a commit of the whole workspace tree, written from a
//! private index and stored under `refs/tether/snapshots/<seq>`. The stack is
//! ordered by sequence number; undo pops the highest one.
//!
//! Paths the caller is about to touch are staged with `git add -f`, so a
//! gitignored file can still be restored. They are kept as `Tether-Path:`
//! lines in the commit body for the matching undo.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::io::git::Git;

pub const REF_PREFIX: &str = "refs/tether/snapshots/";
const PATH_TRAILER: &str = "Tether-Path: ";

/// A restorable capture of the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub id: String,
    pub message: String,
    pub created_at: String,
    #[serde(skip)]
    pub reference: String,
}

/// Capture and restore workspace state.
pub trait Snapshotter {
    /// Push a new snapshot of the current workspace.
    ///
    /// `paths` (workspace-relative) are captured even when ignored.
    fn snapshot(&self, message: &str, paths: &[String]) -> Result<Snapshot>;
    /// Pop the most recent snapshot and restore the workspace to it.
    fn undo(&self) -> Result<Snapshot>;
    /// Snapshots, most recent first.
    fn list(&self) -> Result<Vec<Snapshot>>;
    /// Drop every snapshot without touching the workspace. Returns how many were removed.
    fn clear(&self) -> Result<usize>;
}

/// Snapshot stack stored in the workspace's git repository.
#[derive(Debug, Clone)]
pub struct GitSnapshots {
    git: Git,
    toplevel: PathBuf,
    workspace: PathBuf,
    excludes: Vec<String>,
}

impl GitSnapshots {
    /// Open the stack for `workspace`, initializing a repository if there is none.
    ///
    /// `log_dir` is never captured or restored.
    #[instrument(skip_all, fields(workspace = %workspace.display()))]
    pub fn open(workspace: &Path, log_dir: &Path) -> Result<Self> {
        let git = Git::new(workspace);
        if !git.is_repo()? {
            info!("workspace is not a git repository, initializing one for snapshots");
            git.init()?;
        }
        let toplevel = git.toplevel()?;
        let excludes = log_dir
            .strip_prefix(workspace)
            .ok()
            .or_else(|| log_dir.is_relative().then_some(log_dir))
            .filter(|relative| !relative.as_os_str().is_empty())
            .map(|relative| vec![relative.to_string_lossy().into_owned()])
            .unwrap_or_default();
        let workspace = fs::canonicalize(workspace)
            .with_context(|| format!("resolve workspace {}", workspace.display()))?;
        Ok(Self {
            git,
            toplevel,
            workspace,
            excludes,
        })
    }

    fn private_index(&self) -> Result<PrivateIndex> {
        let path = self
            .git
            .git_dir()?
            .join(format!("tether-index-{}", std::process::id()));
        PrivateIndex::fresh(path)
    }

    /// Write the current workspace, plus any `forced` paths, into a tree object.
    fn capture_tree(&self, forced: &[String]) -> Result<String> {
        let index = self.private_index()?;
        let git = self.git.with_index_file(&index.path);
        git.add_all(&self.excludes)?;
        let forced: Vec<String> = forced
            .iter()
            .filter(|path| !self.is_excluded(path))
            .cloned()
            .collect();
        git.add_forced(&forced)?;
        git.write_tree()
    }

    fn is_excluded(&self, path: &str) -> bool {
        self.excludes
            .iter()
            .any(|excluded| Path::new(path).starts_with(excluded))
    }

    /// Make the workspace match `target`, given it currently matches `current`.
    ///
    /// Paths missing from `target` go first, so a file that replaced a
    /// directory (or the reverse) does not block the checkout.
    fn restore(&self, target: &str, current: &str) -> Result<()> {
        for relative in self.git.added_paths(target, current)? {
            let path = self.toplevel.join(&relative);
            remove_node(&path)?;
            self.prune_empty_parents(&path);
        }
        let index = self.private_index()?;
        let git = self.git.with_index_file(&index.path);
        git.read_tree(target)?;
        git.checkout_index_all()?;
        Ok(())
    }

    fn forced_paths(&self, reference: &str) -> Result<Vec<String>> {
        Ok(self
            .git
            .commit_body(reference)?
            .lines()
            .filter_map(|line| line.strip_prefix(PATH_TRAILER))
            .map(|path| path.trim().to_string())
            .filter(|path| !path.is_empty())
            .collect())
    }

    fn prune_empty_parents(&self, removed: &Path) {
        let mut current = removed.parent();
        while let Some(dir) = current {
            if dir == self.workspace || !dir.starts_with(&self.workspace) {
                break;
            }
            if fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
    }

    fn next_sequence(&self) -> Result<u32> {
        let highest = self
            .git
            .list_refs(REF_PREFIX)?
            .iter()
            .filter_map(|entry| entry.name.strip_prefix(REF_PREFIX)?.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        Ok(highest + 1)
    }
}

impl Snapshotter for GitSnapshots {
    #[instrument(skip_all)]
    fn snapshot(&self, message: &str, paths: &[String]) -> Result<Snapshot> {
        let tree = self.capture_tree(paths).context("capture workspace tree")?;
        let parent = self.git.resolve("HEAD")?;
        let commit = self
            .git
            .commit_tree(&tree, parent.as_deref(), &commit_message(message, paths))
            .context("commit snapshot")?;
        let reference = format!("{REF_PREFIX}{:06}", self.next_sequence()?);
        self.git.update_ref(&reference, &commit)?;
        debug!(%reference, %commit, "snapshot created");
        self.list()?
            .into_iter()
            .find(|snapshot| snapshot.reference == reference)
            .ok_or_else(|| anyhow!("snapshot {reference} vanished after creation"))
    }

    #[instrument(skip_all)]
    fn undo(&self) -> Result<Snapshot> {
        let latest = self
            .list()?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no snapshots to undo"))?;
        let target = format!("{}^{{tree}}", latest.reference);
        let forced = self.forced_paths(&latest.reference)?;
        let safety = self
            .capture_tree(&forced)
            .context("capture safety point")?;

        if let Err(err) = self.restore(&target, &safety) {
            warn!(err = %err, "restore failed, rolling back to safety point");
            if let Err(rollback) = self.restore(&safety, &target) {
                return Err(err.context(format!("rollback to safety point failed: {rollback:#}")));
            }
            return Err(err.context(format!("restore snapshot {}", latest.id)));
        }

        self.git.delete_ref(&latest.reference)?;
        info!(id = %latest.id, "snapshot restored");
        Ok(latest)
    }

    fn list(&self) -> Result<Vec<Snapshot>> {
        Ok(self
            .git
            .list_refs(REF_PREFIX)?
            .into_iter()
            .map(|entry| Snapshot {
                id: entry.short_sha,
                message: entry.subject,
                created_at: entry.committed_at,
                reference: entry.name,
            })
            .collect())
    }

    #[instrument(skip_all)]
    fn clear(&self) -> Result<usize> {
        let refs = self.git.list_refs(REF_PREFIX)?;
        for entry in &refs {
            self.git.delete_ref(&entry.name)?;
        }
        info!(count = refs.len(), "snapshots cleared");
        Ok(refs.len())
    }
}

/// Subject line, then one trailer per forced path.
fn commit_message(message: &str, paths: &[String]) -> String {
    let subject = message.lines().collect::<Vec<_>>().join(" ");
    let trailers: Vec<String> = paths
        .iter()
        .filter(|path| !path.contains('\n'))
        .map(|path| format!("{PATH_TRAILER}{path}"))
        .collect();
    if trailers.is_empty() {
        subject
    } else {
        format!("{subject}\n\n{}", trailers.join("\n"))
    }
}

/// Remove a file, symlink or directory tree; a missing path is fine.
fn remove_node(path: &Path) -> Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err).with_context(|| format!("inspect {}", path.display())),
    };
    let removed = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    removed.with_context(|| format!("remove {}", path.display()))
}

/// Index file private to one operation; removed on drop.
struct PrivateIndex {
    path: PathBuf,
}

impl PrivateIndex {
    fn fresh(path: PathBuf) -> Result<Self> {
        if path.exists() {
            fs::remove_file(&path).with_context(|| format!("remove stale {}", path.display()))?;
        }
        Ok(Self { path })
    }
}

impl Drop for PrivateIndex {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
