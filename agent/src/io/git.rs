//! Git adapter for the poll loop.
//!
//! The agent never checks out files; it reads everything it needs (diffs,
//! blob sizes, blob contents) straight from the object database through a
//! small, explicit wrapper around `git` subprocess calls.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::changes::{Change, parse_name_status};

/// Repository operations the scheduler and pipeline depend on.
///
/// Commits are identified by full object ids. `before = None` in
/// [`RepoAccess::diff_trees`] stands for the empty tree (first run).
pub trait RepoAccess {
    /// Fetch remote updates for the monitored branch.
    fn fetch(&self) -> Result<()>;
    /// Resolve the monitored branch tip to a commit id.
    fn resolve_tip(&self) -> Result<String>;
    /// Ordered changes between two commits' trees.
    fn diff_trees(&self, before: Option<&str>, after: &str) -> Result<Vec<Change>>;
    /// Size in bytes of the file at `path` in `commit`.
    fn blob_size(&self, commit: &str, path: &str) -> Result<u64>;
    /// Contents of the file at `path` in `commit`.
    fn read_blob(&self, commit: &str, path: &str) -> Result<Vec<u8>>;
    /// Repository-relative paths of all files under `dir` in `commit`.
    fn list_files(&self, commit: &str, dir: &str) -> Result<Vec<String>>;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Fail unless `workdir` is inside a git repository.
    #[instrument(skip_all)]
    pub fn ensure_repository(&self) -> Result<()> {
        let git_dir = self.run_capture(&["rev-parse", "--git-dir"])?;
        debug!(git_dir = %git_dir.trim(), "opened repository");
        Ok(())
    }

    /// Resolve a fully qualified ref to a commit id, `None` if it does not exist.
    pub fn resolve_ref(&self, refname: &str) -> Result<Option<String>> {
        let spec = format!("{refname}^{{commit}}");
        let out = self.run(&["rev-parse", "--verify", "--quiet", &spec])?;
        if !out.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&out.stdout).trim().to_string()))
    }

    #[instrument(skip_all, fields(remote = remote, branch = branch))]
    pub fn fetch(&self, remote: &str, branch: &str) -> Result<()> {
        debug!("fetching");
        self.run_checked(&["fetch", "--quiet", remote, branch])?;
        Ok(())
    }

    /// Object id of the empty tree in this repository's hash format.
    pub fn empty_tree(&self) -> Result<String> {
        Ok(self.run_capture(&["mktree"])?.trim().to_string())
    }

    /// Name-status diff between two tree-ish objects, rename detection off.
    #[instrument(skip_all, fields(before = before, after = after))]
    pub fn diff_tree(&self, before: &str, after: &str) -> Result<Vec<Change>> {
        let out = self.run_checked(&[
            "diff-tree",
            "-r",
            "-z",
            "--name-status",
            "--no-renames",
            before,
            after,
        ])?;
        let changes = parse_name_status(&out.stdout)?;
        debug!(count = changes.len(), "diffed trees");
        Ok(changes)
    }

    pub fn blob_size(&self, commit: &str, path: &str) -> Result<u64> {
        let spec = format!("{commit}:{path}");
        let out = self.run_capture(&["cat-file", "-s", &spec])?;
        out.trim()
            .parse::<u64>()
            .with_context(|| format!("parse blob size for {spec}"))
    }

    pub fn read_blob(&self, commit: &str, path: &str) -> Result<Vec<u8>> {
        let spec = format!("{commit}:{path}");
        Ok(self.run_checked(&["cat-file", "blob", &spec])?.stdout)
    }

    pub fn list_files(&self, commit: &str, dir: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let out = self.run_checked(&["ls-tree", "-r", "-z", "--name-only", commit, "--", &prefix])?;
        Ok(String::from_utf8_lossy(&out.stdout)
            .split('\0')
            .filter(|path| !path.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
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
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

/// The monitored repository: a [`Git`] handle plus the branch (and optional
/// remote) being tracked.
#[derive(Debug, Clone)]
pub struct GitRepo {
    git: Git,
    remote: Option<String>,
    branch: String,
}

impl GitRepo {
    pub fn new(git: Git, remote: Option<&str>, branch: impl Into<String>) -> Self {
        Self {
            git,
            remote: remote.map(str::to_string),
            branch: branch.into(),
        }
    }

    /// Refs tried in order when resolving the tip.
    fn tip_candidates(&self) -> Vec<String> {
        let mut refs = Vec::new();
        if let Some(remote) = &self.remote {
            refs.push(format!("refs/remotes/{remote}/{}", self.branch));
        }
        refs.push(format!("refs/heads/{}", self.branch));
        refs
    }
}

impl RepoAccess for GitRepo {
    fn fetch(&self) -> Result<()> {
        match &self.remote {
            Some(remote) => self.git.fetch(remote, &self.branch),
            None => Ok(()),
        }
    }

    fn resolve_tip(&self) -> Result<String> {
        for refname in self.tip_candidates() {
            if let Some(commit) = self.git.resolve_ref(&refname)? {
                debug!(refname = %refname, commit = %commit, "resolved branch tip");
                return Ok(commit);
            }
        }
        warn!(branch = %self.branch, "branch reference not found");
        Err(anyhow!("cannot resolve branch '{}'", self.branch))
    }

    fn diff_trees(&self, before: Option<&str>, after: &str) -> Result<Vec<Change>> {
        let before = match before {
            Some(commit) => commit.to_string(),
            None => self.git.empty_tree()?,
        };
        self.git.diff_tree(&before, after)
    }

    fn blob_size(&self, commit: &str, path: &str) -> Result<u64> {
        self.git.blob_size(commit, path)
    }

    fn read_blob(&self, commit: &str, path: &str) -> Result<Vec<u8>> {
        self.git.read_blob(commit, path)
    }

    fn list_files(&self, commit: &str, dir: &str) -> Result<Vec<String>> {
        self.git.list_files(commit, dir)
    }
}
