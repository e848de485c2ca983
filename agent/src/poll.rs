//! Poll loop: detect new commits on the monitored branch and run a pass.
//!
//! Each tick fetches, resolves the branch tip, and compares it with the last
//! processed commit. Any difference runs one pipeline pass over the tree diff,
//! after which the tip becomes the last processed commit even if artifacts
//! failed. Fetch, resolve, and diff failures skip the tick.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::io::atomic::write_json_atomic;
use crate::io::config::AgentConfig;
use crate::io::git::{Git, GitRepo, RepoAccess};
use crate::pipeline::{PassSummary, Pipeline};

/// Conditions that stop the agent at startup.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("cannot load configuration {path}: {detail}")]
    ConfigLoad { path: PathBuf, detail: String },
    #[error("cannot open repository {path}: {detail}")]
    RepositoryAccess { path: PathBuf, detail: String },
    #[error("cannot resolve branch '{branch}': {detail}")]
    BranchResolution { branch: String, detail: String },
}

/// What happened during one tick.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// The tip equals the last processed commit.
    NoChange { commit: String },
    Processed { commit: String, summary: PassSummary },
    FetchFailed(String),
    ResolveFailed(String),
    DiffFailed(String),
}

/// Persisted between runs at `<state_dir>/poll_state.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollState {
    pub last_processed_commit: Option<String>,
}

pub fn load_poll_state(path: &Path) -> Result<PollState> {
    match fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents)
            .with_context(|| format!("parse poll state {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(PollState::default()),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}

/// Open the repository and check the monitored branch resolves.
///
/// A failed startup fetch is only a warning; the local ref may still resolve.
#[instrument(skip_all, fields(root = %root.display(), branch = %cfg.branch))]
pub fn open_monitored_repo(root: &Path, cfg: &AgentConfig) -> Result<GitRepo, FatalError> {
    let git = Git::new(root);
    git.ensure_repository()
        .map_err(|err| FatalError::RepositoryAccess {
            path: root.to_path_buf(),
            detail: format!("{err:#}"),
        })?;
    let repo = GitRepo::new(git, cfg.remote(), cfg.branch.clone());
    if let Err(err) = repo.fetch() {
        warn!(error = %format!("{err:#}"), "startup fetch failed, using local refs");
    }
    let tip = repo
        .resolve_tip()
        .map_err(|err| FatalError::BranchResolution {
            branch: cfg.branch.clone(),
            detail: format!("{err:#}"),
        })?;
    info!(tip = %tip, "monitoring branch");
    Ok(repo)
}

/// Sequential tick driver. Owns the repository handle and the pipeline.
pub struct Poller<R: RepoAccess> {
    repo: R,
    pipeline: Pipeline,
    state_path: PathBuf,
    last_processed: Option<String>,
    interval: Duration,
}

impl<R: RepoAccess> Poller<R> {
    /// Resume from the persisted poll state, if any.
    pub fn new(repo: R, pipeline: Pipeline, state_path: PathBuf, interval: Duration) -> Result<Self> {
        let state = load_poll_state(&state_path)?;
        if let Some(commit) = &state.last_processed_commit {
            info!(commit = %commit, "resuming after last processed commit");
        }
        Ok(Self {
            repo,
            pipeline,
            state_path,
            last_processed: state.last_processed_commit,
            interval,
        })
    }

    pub fn last_processed(&self) -> Option<&str> {
        self.last_processed.as_deref()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    #[instrument(skip_all)]
    pub fn tick(&mut self) -> TickOutcome {
        if let Err(err) = self.repo.fetch() {
            let detail = format!("{err:#}");
            warn!(error = %detail, "fetch failed, retrying next tick");
            return TickOutcome::FetchFailed(detail);
        }
        let tip = match self.repo.resolve_tip() {
            Ok(tip) => tip,
            Err(err) => {
                let detail = format!("{err:#}");
                warn!(error = %detail, "cannot resolve branch tip, retrying next tick");
                return TickOutcome::ResolveFailed(detail);
            }
        };
        if self.last_processed.as_deref() == Some(tip.as_str()) {
            debug!(commit = %tip, "no new commits");
            return TickOutcome::NoChange { commit: tip };
        }

        let changes = match self.repo.diff_trees(self.last_processed.as_deref(), &tip) {
            Ok(changes) => changes,
            Err(err) => {
                let detail = format!("{err:#}");
                warn!(error = %detail, "diff failed, retrying next tick");
                return TickOutcome::DiffFailed(detail);
            }
        };
        info!(
            from = self.last_processed.as_deref().unwrap_or("(empty tree)"),
            to = %tip,
            changes = changes.len(),
            "processing new commit"
        );
        let summary = self.pipeline.run_pass(&self.repo, &tip, &changes);

        self.last_processed = Some(tip.clone());
        let state = PollState {
            last_processed_commit: self.last_processed.clone(),
        };
        if let Err(err) = write_json_atomic(&self.state_path, &state) {
            error!(error = %format!("{err:#}"), "failed to persist poll state");
        }
        TickOutcome::Processed {
            commit: tip,
            summary,
        }
    }

    /// Tick until `max_ticks` is reached (forever when `None`), sleeping the
    /// configured interval between ticks.
    pub fn run<F: FnMut(&TickOutcome)>(&mut self, max_ticks: Option<u64>, mut on_tick: F) -> u64 {
        let mut ticks = 0u64;
        loop {
            let outcome = self.tick();
            ticks += 1;
            on_tick(&outcome);
            if max_ticks.is_some_and(|max| ticks >= max) {
                return ticks;
            }
            thread::sleep(self.interval);
        }
    }
}
