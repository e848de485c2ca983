//! Transient on-disk copies of artifact content.
//!
//! Plugins operate on real files, but the agent never checks out the
//! monitored branch. Content is read from the object database into a
//! temporary directory that is removed when the [`Workspace`] is dropped.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;
use tracing::debug;

use crate::io::git::RepoAccess;

/// Materialized artifact content, owned by one pipeline step.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    /// Absolute path of the artifact's primary file inside `dir`.
    target: PathBuf,
}

impl Workspace {
    /// Write `content` as the single file `file_name`.
    pub fn single_file(file_name: &str, content: &[u8]) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("gitops-artifact-")
            .tempdir()
            .context("create transient workspace")?;
        let target = dir.path().join(safe_relative(file_name)?);
        fs::write(&target, content).with_context(|| format!("write {}", target.display()))?;
        debug!(target = %target.display(), bytes = content.len(), "materialized artifact");
        Ok(Self { dir, target })
    }

    /// Copy every file under `context_dir` at `commit`, preserving layout
    /// relative to `context_dir`. `primary` is the repository path of the
    /// artifact file and must lie inside `context_dir`.
    pub fn subtree(
        repo: &dyn RepoAccess,
        commit: &str,
        context_dir: &str,
        primary: &str,
    ) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("gitops-context-")
            .tempdir()
            .context("create transient build context")?;
        let prefix = format!("{}/", context_dir.trim_end_matches('/'));
        let files = repo.list_files(commit, context_dir)?;
        for path in &files {
            let relative = path
                .strip_prefix(&prefix)
                .ok_or_else(|| anyhow!("{path} is outside {context_dir}"))?;
            let dest = dir.path().join(safe_relative(relative)?);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            let content = repo.read_blob(commit, path)?;
            fs::write(&dest, content).with_context(|| format!("write {}", dest.display()))?;
        }
        let primary_relative = primary
            .strip_prefix(&prefix)
            .ok_or_else(|| anyhow!("{primary} is outside {context_dir}"))?;
        let target = dir.path().join(safe_relative(primary_relative)?);
        if !target.is_file() {
            return Err(anyhow!("{primary} missing from build context at {commit}"));
        }
        debug!(context = %dir.path().display(), files = files.len(), "materialized build context");
        Ok(Self { dir, target })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn target(&self) -> &Path {
        &self.target
    }
}

/// Reject absolute paths and `..` so materialized files stay inside the workspace.
fn safe_relative(path: &str) -> Result<PathBuf> {
    let candidate = Path::new(path);
    if candidate
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(anyhow!("unsafe artifact path '{path}'"));
    }
    Ok(candidate.to_path_buf())
}
