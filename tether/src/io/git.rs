//! Git adapter used by the snapshot manager.
//!
//! Snapshots are built with plumbing commands against a private index file,
//! so the user's index, HEAD, branches and stash are never touched. We keep a
//! small, explicit wrapper around `git` subprocess calls.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

const AUTHOR_NAME: &str = "tether";
const AUTHOR_EMAIL: &str = "tether@localhost";

/// One entry from `git for-each-ref`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefEntry {
    pub name: String,
    pub short_sha: String,
    pub committed_at: String,
    pub subject: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    index_file: Option<PathBuf>,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            index_file: None,
        }
    }

    /// Same repository, but commands read and write `index_file` instead of the real index.
    pub fn with_index_file(&self, index_file: impl Into<PathBuf>) -> Self {
        Self {
            workdir: self.workdir.clone(),
            index_file: Some(index_file.into()),
        }
    }

    pub fn is_repo(&self) -> Result<bool> {
        let output = self.run(&["rev-parse", "--is-inside-work-tree"])?;
        Ok(output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "true")
    }

    #[instrument(skip_all)]
    pub fn init(&self) -> Result<()> {
        debug!(workdir = %self.workdir.display(), "initializing git repository");
        self.run_checked(&["init", "--quiet"])?;
        Ok(())
    }

    pub fn toplevel(&self) -> Result<PathBuf> {
        let out = self.run_capture(&["rev-parse", "--show-toplevel"])?;
        Ok(PathBuf::from(out.trim()))
    }

    pub fn git_dir(&self) -> Result<PathBuf> {
        let out = self.run_capture(&["rev-parse", "--absolute-git-dir"])?;
        Ok(PathBuf::from(out.trim()))
    }

    /// Resolve a revision to a full SHA, or `None` when it does not exist.
    pub fn resolve(&self, rev: &str) -> Result<Option<String>> {
        let output = self.run(&["rev-parse", "--verify", "--quiet", rev])?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }

    /// Stage every file under the workdir (respects .gitignore), minus `excludes`.
    pub fn add_all(&self, excludes: &[String]) -> Result<()> {
        let mut args = vec!["add", "-A", "--", "."];
        let patterns: Vec<String> = excludes
            .iter()
            .map(|path| format!(":(exclude){path}"))
            .collect();
        args.extend(patterns.iter().map(String::as_str));
        self.run_checked(&args)?;
        Ok(())
    }

    /// Stage `paths` even when .gitignore would skip them. Missing paths are ignored.
    pub fn add_forced(&self, paths: &[String]) -> Result<()> {
        let existing: Vec<&str> = paths
            .iter()
            .filter(|path| self.workdir.join(path).symlink_metadata().is_ok())
            .map(String::as_str)
            .collect();
        if existing.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "-f", "--"];
        args.extend(existing);
        self.run_checked(&args)?;
        Ok(())
    }

    pub fn write_tree(&self) -> Result<String> {
        Ok(self.run_capture(&["write-tree"])?.trim().to_string())
    }

    pub fn commit_tree(&self, tree: &str, parent: Option<&str>, message: &str) -> Result<String> {
        let name = format!("user.name={AUTHOR_NAME}");
        let email = format!("user.email={AUTHOR_EMAIL}");
        let mut args = vec!["-c", name.as_str(), "-c", email.as_str(), "commit-tree", tree];
        if let Some(parent) = parent {
            args.extend(["-p", parent]);
        }
        args.extend(["-m", message]);
        Ok(self.run_capture(&args)?.trim().to_string())
    }

    pub fn update_ref(&self, name: &str, sha: &str) -> Result<()> {
        self.run_checked(&["update-ref", name, sha])?;
        Ok(())
    }

    pub fn delete_ref(&self, name: &str) -> Result<()> {
        self.run_checked(&["update-ref", "-d", name])?;
        Ok(())
    }

    /// Message body of `rev`, without the subject line.
    pub fn commit_body(&self, rev: &str) -> Result<String> {
        self.run_capture(&["log", "-1", "--format=%b", rev])
    }

    /// Refs under `prefix`, newest refname first.
    pub fn list_refs(&self, prefix: &str) -> Result<Vec<RefEntry>> {
        let out = self.run_capture(&[
            "for-each-ref",
            "--sort=-refname",
            "--format=%(refname)%09%(objectname:short)%09%(committerdate:iso-strict)%09%(contents:subject)",
            prefix,
        ])?;
        out.lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_ref_line)
            .collect()
    }

    /// Load `treeish` into the index.
    pub fn read_tree(&self, treeish: &str) -> Result<()> {
        self.run_checked(&["read-tree", treeish])?;
        Ok(())
    }

    /// Write every index entry to the worktree, overwriting local content.
    pub fn checkout_index_all(&self) -> Result<()> {
        self.run_checked(&["checkout-index", "--all", "--force"])?;
        Ok(())
    }

    /// Paths (relative to the repository top level) present in `to` but not in `from`.
    pub fn added_paths(&self, from: &str, to: &str) -> Result<Vec<String>> {
        let output = self.run_checked(&[
            "diff-tree",
            "-r",
            "-z",
            "--name-only",
            "--no-renames",
            "--diff-filter=A",
            from,
            to,
        ])?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .split('\0')
            .filter(|path| !path.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.workdir);
        if let Some(index_file) = &self.index_file {
            cmd.env("GIT_INDEX_FILE", index_file);
        }
        cmd.output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_ref_line(line: &str) -> Result<RefEntry> {
    let mut fields = line.splitn(4, '\t');
    let (Some(name), Some(short_sha), Some(committed_at)) =
        (fields.next(), fields.next(), fields.next())
    else {
        return Err(anyhow!("unexpected for-each-ref line: '{line}'"));
    };
    Ok(RefEntry {
        name: name.to_string(),
        short_sha: short_sha.to_string(),
        committed_at: committed_at.to_string(),
        subject: fields.next().unwrap_or_default().to_string(),
    })
}
