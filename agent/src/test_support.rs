//! Test-only helpers: an in-memory repository, scripted plugins, and real
//! git fixture repositories.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::changes::{Change, ChangeAction};
use crate::core::types::ArtifactKind;
use crate::io::assets::AssetStore;
use crate::io::git::{Git, RepoAccess};
use crate::io::plugins::{ArtifactError, ArtifactPlugin, ExecutionRequest, PhaseOutcome};

type Tree = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Default)]
struct MemoryState {
    commits: Vec<(String, Tree)>,
    fail_fetch: bool,
    fail_diff: bool,
    fetches: usize,
}

/// In-memory [`RepoAccess`] with a linear history on a single branch.
#[derive(Debug, Default)]
pub struct MemoryRepo {
    state: Mutex<MemoryState>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or overwrite files on top of the current tip. Returns the commit id.
    pub fn commit(&self, files: &[(&str, &str)]) -> String {
        self.commit_with(|tree| {
            for (path, content) in files {
                tree.insert((*path).to_string(), content.as_bytes().to_vec());
            }
        })
    }

    /// Remove files from the current tip. Returns the commit id.
    pub fn delete(&self, paths: &[&str]) -> String {
        self.commit_with(|tree| {
            for path in paths {
                tree.remove(*path);
            }
        })
    }

    fn commit_with(&self, edit: impl FnOnce(&mut Tree)) -> String {
        let mut state = self.lock();
        let mut tree = state
            .commits
            .last()
            .map(|(_, tree)| tree.clone())
            .unwrap_or_default();
        edit(&mut tree);
        let id = format!("commit-{}", state.commits.len() + 1);
        state.commits.push((id.clone(), tree));
        id
    }

    pub fn set_fetch_failure(&self, fail: bool) {
        self.lock().fail_fetch = fail;
    }

    pub fn set_diff_failure(&self, fail: bool) {
        self.lock().fail_diff = fail;
    }

    pub fn fetches(&self) -> usize {
        self.lock().fetches
    }

    fn tree(&self, commit: &str) -> Result<Tree> {
        self.lock()
            .commits
            .iter()
            .find(|(id, _)| id == commit)
            .map(|(_, tree)| tree.clone())
            .ok_or_else(|| anyhow!("unknown commit {commit}"))
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RepoAccess for MemoryRepo {
    fn fetch(&self) -> Result<()> {
        let mut state = self.lock();
        state.fetches += 1;
        if state.fail_fetch {
            return Err(anyhow!("fetch failed: network unreachable"));
        }
        Ok(())
    }

    fn resolve_tip(&self) -> Result<String> {
        self.lock()
            .commits
            .last()
            .map(|(id, _)| id.clone())
            .ok_or_else(|| anyhow!("branch has no commits"))
    }

    fn diff_trees(&self, before: Option<&str>, after: &str) -> Result<Vec<Change>> {
        if self.lock().fail_diff {
            return Err(anyhow!("diff failed: corrupt object"));
        }
        let old = match before {
            Some(commit) => self.tree(commit)?,
            None => Tree::new(),
        };
        let new = self.tree(after)?;
        let mut paths: Vec<&String> = old.keys().chain(new.keys()).collect();
        paths.sort();
        paths.dedup();
        Ok(paths
            .into_iter()
            .filter_map(|path| match (old.get(path), new.get(path)) {
                (None, Some(_)) => Some(Change::new(ChangeAction::Insert, path.clone())),
                (Some(_), None) => Some(Change::new(ChangeAction::Delete, path.clone())),
                (Some(a), Some(b)) if a != b => {
                    Some(Change::new(ChangeAction::Modify, path.clone()))
                }
                _ => None,
            })
            .collect())
    }

    fn blob_size(&self, commit: &str, path: &str) -> Result<u64> {
        Ok(self.read_blob(commit, path)?.len() as u64)
    }

    fn read_blob(&self, commit: &str, path: &str) -> Result<Vec<u8>> {
        self.tree(commit)?
            .remove(path)
            .ok_or_else(|| anyhow!("{path} not found at {commit}"))
    }

    fn list_files(&self, commit: &str, dir: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        Ok(self
            .tree(commit)?
            .into_keys()
            .filter(|path| path.starts_with(&prefix))
            .collect())
    }
}

/// One recorded plugin invocation. Validate records the materialized file
/// name, execute records the artifact name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginCall {
    Validate(String),
    Execute(String),
}

/// Plugin that records its invocations and returns scripted outcomes.
#[derive(Debug)]
pub struct ScriptedPlugin {
    kind: ArtifactKind,
    calls: Arc<Mutex<Vec<PluginCall>>>,
    validation_error: Option<ArtifactError>,
    execution_failures: BTreeMap<String, ArtifactError>,
    assets: Option<AssetStore>,
}

impl ScriptedPlugin {
    pub fn passing(kind: ArtifactKind) -> Self {
        Self {
            kind,
            calls: Arc::new(Mutex::new(Vec::new())),
            validation_error: None,
            execution_failures: BTreeMap::new(),
            assets: None,
        }
    }

    pub fn failing_validation(kind: ArtifactKind, error: ArtifactError) -> Self {
        Self {
            validation_error: Some(error),
            ..Self::passing(kind)
        }
    }

    /// Fail execution for the artifact named `name`.
    pub fn fail_execution_of(mut self, name: &str, error: ArtifactError) -> Self {
        self.execution_failures.insert(name.to_string(), error);
        self
    }

    pub fn with_assets(mut self, assets: AssetStore) -> Self {
        self.assets = Some(assets);
        self
    }

    /// Shared handle to the call log; stays valid after the plugin is boxed.
    pub fn calls(&self) -> Arc<Mutex<Vec<PluginCall>>> {
        Arc::clone(&self.calls)
    }

    fn record(&self, call: PluginCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

impl ArtifactPlugin for ScriptedPlugin {
    fn kind(&self) -> ArtifactKind {
        self.kind
    }

    fn validate(&self, path: &Path) -> PhaseOutcome {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.record(PluginCall::Validate(name.clone()));
        match &self.validation_error {
            Some(err) => PhaseOutcome::failed(format!("validating {name}\n"), err.clone()),
            None => PhaseOutcome::ok(format!("validated {name}\n")),
        }
    }

    fn execute(&self, _path: &Path, request: &ExecutionRequest<'_>) -> PhaseOutcome {
        self.record(PluginCall::Execute(request.name.to_string()));
        match self.execution_failures.get(request.name) {
            Some(err) => PhaseOutcome::failed(format!("executing {}\n", request.name), err.clone()),
            None => PhaseOutcome::ok(format!("executed {}\n", request.name)),
        }
    }

    fn assets(&self) -> Option<&AssetStore> {
        self.assets.as_ref()
    }
}

/// Temporary git repository on branch `main` with commit helpers.
pub struct TestRepo {
    dir: TempDir,
    git: Git,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp repo dir")?;
        let setup: [&[&str]; 4] = [
            &["init", "--quiet", "--initial-branch=main"],
            &["config", "user.name", "Test"],
            &["config", "user.email", "test@example.com"],
            &["config", "commit.gpgsign", "false"],
        ];
        for args in setup {
            let status = Command::new("git")
                .args(args)
                .current_dir(dir.path())
                .status()
                .with_context(|| format!("spawn git {}", args.join(" ")))?;
            if !status.success() {
                return Err(anyhow!("git {} failed", args.join(" ")));
            }
        }
        let git = Git::new(dir.path());
        Ok(Self { dir, git })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_file(&self, rel: &str, contents: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    pub fn remove_file(&self, rel: &str) -> Result<()> {
        let path = self.dir.path().join(rel);
        fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))
    }

    /// Stage everything and commit. Returns the new HEAD commit id.
    pub fn commit_all(&self, message: &str) -> Result<String> {
        self.git.add_all()?;
        self.git.commit_staged(message)?;
        self.head()
    }

    pub fn commit_files(&self, files: &[(&str, &str)], message: &str) -> Result<String> {
        for (rel, contents) in files {
            self.write_file(rel, contents)?;
        }
        self.commit_all(message)
    }

    pub fn head(&self) -> Result<String> {
        self.git
            .resolve_ref("HEAD")?
            .ok_or_else(|| anyhow!("HEAD does not resolve"))
    }
}
