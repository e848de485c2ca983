//! Per-artifact processing: size check, validate, execute, record.
//!
//! The pipeline is written once against [`ArtifactPlugin`]; shell scripts and
//! container builds differ only in the plugin that handles them and in how
//! their content is materialized.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::changes::Change;
use crate::core::classifier::{ClassifierRules, plan_artifacts};
use crate::core::types::{ArtifactKind, ArtifactRef, PhaseResult, PhaseResults};
use crate::io::artifact_log::{ArtifactLog, write_artifact_log};
use crate::io::assets::{AssetStore, RunRecord, duration_ms};
use crate::io::config::AgentConfig;
use crate::io::git::RepoAccess;
use crate::io::plugins::{
    ArtifactError, ArtifactPlugin, ContainerPlugin, ExecutionRequest, PhaseOutcome, ShellPlugin,
};
use crate::io::status_store::StatusStore;
use crate::io::workspace::Workspace;

/// Settings that shape every pass, resolved from [`AgentConfig`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub status_path: PathBuf,
    pub log_dir: PathBuf,
    pub max_artifact_bytes: u64,
    pub allow_privilege_escalation: bool,
    pub user: String,
    pub container_dir: String,
}

impl PipelineSettings {
    pub fn from_config(cfg: &AgentConfig, repo_root: &Path) -> Self {
        Self {
            status_path: cfg.status_path(repo_root),
            log_dir: cfg.log_dir_in(repo_root),
            max_artifact_bytes: cfg.max_artifact_bytes,
            allow_privilege_escalation: cfg.shell.allow_privilege_escalation,
            user: cfg.user.clone(),
            container_dir: cfg.container.directory.clone(),
        }
    }
}

/// Terminal state of one artifact in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactOutcome {
    /// Script already succeeded in an earlier pass, or no plugin handles the kind.
    Skipped,
    Succeeded,
    ValidationFailed(ArtifactError),
    ExecutionFailed(ArtifactError),
}

/// Outcomes of one pass over a commit's change set, in processing order.
#[derive(Debug, Clone, Default)]
pub struct PassSummary {
    pub results: Vec<(ArtifactRef, ArtifactOutcome)>,
}

impl PassSummary {
    pub fn count(&self, pred: impl Fn(&ArtifactOutcome) -> bool) -> usize {
        self.results.iter().filter(|(_, outcome)| pred(outcome)).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| *o == ArtifactOutcome::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                ArtifactOutcome::ValidationFailed(_) | ArtifactOutcome::ExecutionFailed(_)
            )
        })
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| *o == ArtifactOutcome::Skipped)
    }

    pub fn outcome(&self, identifier: &str) -> Option<&ArtifactOutcome> {
        self.results
            .iter()
            .find(|(artifact, _)| artifact.identifier == identifier)
            .map(|(_, outcome)| outcome)
    }
}

/// Sequential artifact processor. The poll loop is its only caller.
pub struct Pipeline {
    store: Arc<StatusStore>,
    plugins: Vec<Box<dyn ArtifactPlugin>>,
    settings: PipelineSettings,
}

impl Pipeline {
    /// Wire the configured plugins around a status store loaded from disk.
    pub fn from_config(cfg: &AgentConfig, repo_root: &Path) -> Result<Self> {
        let store = Arc::new(StatusStore::load(&cfg.status_path(repo_root))?);
        let limits = cfg.tool_limits();
        let mut plugins: Vec<Box<dyn ArtifactPlugin>> = Vec::new();
        if cfg.shell.enabled {
            let assets = AssetStore::new(cfg.shell_assets_dir(repo_root));
            plugins.push(Box::new(ShellPlugin::new(&cfg.shell, limits, assets)));
        }
        if cfg.container.enabled {
            plugins.push(Box::new(ContainerPlugin::new(&cfg.container, limits)?));
        }
        debug!(plugins = plugins.len(), "pipeline assembled");
        Ok(Self::new(
            store,
            plugins,
            PipelineSettings::from_config(cfg, repo_root),
        ))
    }

    pub fn new(
        store: Arc<StatusStore>,
        plugins: Vec<Box<dyn ArtifactPlugin>>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            plugins,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<StatusStore> {
        &self.store
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Classifiers are active exactly for the kinds that have a plugin.
    pub fn rules(&self) -> ClassifierRules {
        ClassifierRules {
            shell: self.plugin(ArtifactKind::Shell).is_some(),
            container: self.plugin(ArtifactKind::Container).is_some(),
            container_dir: self.settings.container_dir.clone(),
        }
    }

    fn plugin(&self, kind: ArtifactKind) -> Option<&dyn ArtifactPlugin> {
        self.plugins
            .iter()
            .find(|plugin| plugin.kind() == kind)
            .map(Box::as_ref)
    }

    /// Process every qualifying change of `commit`. Never aborts early.
    #[instrument(skip_all, fields(commit = commit, changes = changes.len()))]
    pub fn run_pass(&self, repo: &dyn RepoAccess, commit: &str, changes: &[Change]) -> PassSummary {
        let planned = plan_artifacts(changes, &self.rules());
        debug!(artifacts = planned.len(), "planned artifacts");
        let mut summary = PassSummary::default();
        for artifact in planned {
            let outcome = self.process(repo, commit, &artifact);
            summary.results.push((artifact, outcome));
        }
        info!(
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            skipped = summary.skipped(),
            "pass complete"
        );
        summary
    }

    /// Drive one artifact to a terminal state.
    #[instrument(skip_all, fields(identifier = %artifact.identifier, kind = artifact.kind.as_str()))]
    pub fn process(
        &self,
        repo: &dyn RepoAccess,
        commit: &str,
        artifact: &ArtifactRef,
    ) -> ArtifactOutcome {
        // Scripts run at most once; containers rebuild on every qualifying change.
        if artifact.kind == ArtifactKind::Shell
            && self
                .store
                .get(&artifact.identifier)
                .is_some_and(|status| status.succeeded())
        {
            info!("already succeeded, skipping");
            return ArtifactOutcome::Skipped;
        }
        let Some(plugin) = self.plugin(artifact.kind) else {
            warn!("no plugin for artifact kind, skipping");
            return ArtifactOutcome::Skipped;
        };

        self.store.update(&artifact.identifier, PhaseResults::DISCOVERED);
        self.persist_status(artifact);

        if let Err(err) = self.check_size(repo, commit, artifact) {
            return self.fail_validation(artifact, PhaseOutcome::failed(String::new(), err));
        }

        let content = match repo.read_blob(commit, &artifact.path) {
            Ok(content) => content,
            Err(err) => {
                let err = ArtifactError::Materialize {
                    detail: format!("{err:#}"),
                };
                return self.fail_validation(artifact, PhaseOutcome::failed(String::new(), err));
            }
        };
        let workspace = match materialize(repo, commit, artifact, &content) {
            Ok(workspace) => workspace,
            Err(err) => {
                return self.fail_validation(artifact, PhaseOutcome::failed(String::new(), err));
            }
        };

        let validation = plugin.validate(workspace.target());
        if !validation.succeeded() {
            drop(workspace);
            self.record_asset(plugin, artifact, commit, &validation, false, Duration::ZERO, &content);
            return self.fail_validation(artifact, validation);
        }
        self.store.amend(&artifact.identifier, PhaseResults::VALIDATED);
        self.persist_status(artifact);

        let request = ExecutionRequest {
            name: &artifact.name,
            allow_privilege_escalation: self.settings.allow_privilege_escalation,
        };
        let started = Instant::now();
        let execution = plugin.execute(workspace.target(), &request);
        let elapsed = started.elapsed();
        drop(workspace);

        let run = if execution.succeeded() {
            PhaseResult::Success
        } else {
            PhaseResult::Failure
        };
        self.store
            .amend(&artifact.identifier, PhaseResults::executed(run));
        self.persist_status(artifact);
        self.record_asset(plugin, artifact, commit, &execution, true, elapsed, &content);
        self.write_log(
            artifact,
            &ArtifactLog {
                lint: Some(validation.log_text()),
                execution: Some(execution.log_text()),
            },
        );

        match execution.error {
            None => {
                info!(elapsed_ms = duration_ms(elapsed), "artifact succeeded");
                ArtifactOutcome::Succeeded
            }
            Some(err) => {
                warn!(error = %err, "execution failed");
                ArtifactOutcome::ExecutionFailed(err)
            }
        }
    }

    fn check_size(
        &self,
        repo: &dyn RepoAccess,
        commit: &str,
        artifact: &ArtifactRef,
    ) -> Result<(), ArtifactError> {
        let size = repo
            .blob_size(commit, &artifact.path)
            .map_err(|err| ArtifactError::Materialize {
                detail: format!("{err:#}"),
            })?;
        let limit = self.settings.max_artifact_bytes;
        if size > limit {
            return Err(ArtifactError::TooLarge { size, limit });
        }
        debug!(size, limit, "size check passed");
        Ok(())
    }

    fn fail_validation(&self, artifact: &ArtifactRef, validation: PhaseOutcome) -> ArtifactOutcome {
        self.store
            .amend(&artifact.identifier, PhaseResults::VALIDATION_FAILED);
        self.persist_status(artifact);
        self.write_log(
            artifact,
            &ArtifactLog {
                lint: Some(validation.log_text()),
                execution: None,
            },
        );
        let err = validation.error.unwrap_or(ArtifactError::Lint {
            detail: "validation failed".to_string(),
        });
        warn!(error = %err, "validation failed");
        ArtifactOutcome::ValidationFailed(err)
    }

    fn persist_status(&self, artifact: &ArtifactRef) {
        if let Err(err) = self.store.persist(&self.settings.status_path) {
            warn!(identifier = %artifact.identifier, error = %format!("{err:#}"), "failed to persist status");
        }
    }

    fn write_log(&self, artifact: &ArtifactRef, log: &ArtifactLog) {
        match write_artifact_log(&self.settings.log_dir, &artifact.identifier, log) {
            Ok(path) => debug!(path = %path.display(), "artifact log written"),
            Err(err) => {
                warn!(identifier = %artifact.identifier, error = %format!("{err:#}"), "failed to write artifact log");
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record_asset(
        &self,
        plugin: &dyn ArtifactPlugin,
        artifact: &ArtifactRef,
        commit: &str,
        last_phase: &PhaseOutcome,
        lint_passed: bool,
        duration: Duration,
        content: &[u8],
    ) {
        let Some(assets) = plugin.assets() else {
            return;
        };
        let status = if last_phase.succeeded() {
            PhaseResult::Success
        } else {
            PhaseResult::Failure
        };
        let run = RunRecord {
            user: &self.settings.user,
            commit,
            event: &last_phase.output,
            lint_passed,
            duration,
            status,
            content,
        };
        if let Err(err) = assets.record_run(&artifact.identifier, &run) {
            warn!(identifier = %artifact.identifier, error = %format!("{err:#}"), "failed to write asset record");
        }
    }
}

/// Copy the artifact's content into a fresh transient workspace.
fn materialize(
    repo: &dyn RepoAccess,
    commit: &str,
    artifact: &ArtifactRef,
    content: &[u8],
) -> Result<Workspace, ArtifactError> {
    let workspace = match artifact.kind {
        ArtifactKind::Shell => Workspace::single_file(&artifact.name, content),
        ArtifactKind::Container => {
            let context_dir = artifact
                .path
                .rsplit_once('/')
                .map_or("", |(dir, _)| dir);
            Workspace::subtree(repo, commit, context_dir, &artifact.path)
        }
    };
    workspace.map_err(|err| ArtifactError::Materialize {
        detail: format!("{err:#}"),
    })
}
