//! Poll-level lifecycle tests.
//!
//! These drive `Poller::tick` over a real git repository (or the in-memory
//! repository where tool calls must be observed) and check the status store,
//! asset records, and artifact logs a pass leaves behind.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use gitops_agent::core::types::{ArtifactKind, PhaseResult};
use gitops_agent::io::artifact_log::log_path;
use gitops_agent::io::assets::AssetStore;
use gitops_agent::io::config::{AgentConfig, ContainerConfig, ShellConfig};
use gitops_agent::io::git::GitRepo;
use gitops_agent::io::plugins::ArtifactPlugin;
use gitops_agent::io::status_store::StatusStore;
use gitops_agent::pipeline::{ArtifactOutcome, Pipeline, PipelineSettings};
use gitops_agent::poll::{Poller, TickOutcome, open_monitored_repo};
use gitops_agent::test_support::{MemoryRepo, ScriptedPlugin, TestRepo};

const MIB: u64 = 1024 * 1024;

/// Local-only config with tool stand-ins, keeping state outside the worktree.
fn config(state: &Path) -> AgentConfig {
    AgentConfig {
        remote: String::new(),
        state_dir: state.join("state"),
        log_dir: state.join("logs"),
        user: "ops".to_string(),
        shell: ShellConfig {
            linter: vec![
                "bash".to_string(),
                "-c".to_string(),
                "exit 0".to_string(),
                "lint".to_string(),
            ],
            ..ShellConfig::default()
        },
        ..AgentConfig::default()
    }
}

fn real_poller(repo: &TestRepo, cfg: &AgentConfig) -> Poller<GitRepo> {
    let monitored = open_monitored_repo(repo.path(), cfg).expect("open repo");
    let pipeline = Pipeline::from_config(cfg, repo.path()).expect("pipeline");
    Poller::new(
        monitored,
        pipeline,
        cfg.poll_state_path(repo.path()),
        Duration::ZERO,
    )
    .expect("poller")
}

fn expect_processed(outcome: TickOutcome) -> gitops_agent::pipeline::PassSummary {
    match outcome {
        TickOutcome::Processed { summary, .. } => summary,
        other => panic!("expected a processed commit, got {other:?}"),
    }
}

/// Engine that records its argv and fails while `fail_flag` exists.
fn flaky_engine(dir: &Path, fail_flag: &Path) -> PathBuf {
    let path = dir.join("engine");
    let script = format!(
        "#!/bin/bash\necho \"$*\" >> '{log}'\nif [ -e '{flag}' ]; then echo 'build step failed' >&2; exit 1; fi\n",
        log = dir.join("calls.log").display(),
        flag = fail_flag.display(),
    );
    fs::write(&path, script).expect("write engine");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

/// Containers enabled with image prefix `acme/` and tag `v1`.
fn container_config(state: &Path, engine: &Path) -> AgentConfig {
    AgentConfig {
        container: ContainerConfig {
            enabled: true,
            engine: engine.display().to_string(),
            linter: vec![
                "bash".to_string(),
                "-c".to_string(),
                "exit 0".to_string(),
                "lint".to_string(),
            ],
            image_prefix: "acme/".to_string(),
            default_tag: "v1".to_string(),
            ..ContainerConfig::default()
        },
        ..config(state)
    }
}

fn builds(state: &Path) -> Vec<String> {
    fs::read_to_string(state.join("calls.log"))
        .expect("calls")
        .lines()
        .filter(|l| l.starts_with("build"))
        .map(str::to_string)
        .collect()
}

#[test]
fn new_script_runs_once_and_modification_is_ignored() {
    let repo = TestRepo::new().expect("repo");
    let state = tempfile::tempdir().expect("state");
    let cfg = config(state.path());
    repo.commit_files(&[("deploy.sh", "echo deployed\n")], "add deploy script")
        .expect("commit");
    let mut poller = real_poller(&repo, &cfg);

    let summary = expect_processed(poller.tick());
    assert_eq!(summary.outcome("deploy.sh"), Some(&ArtifactOutcome::Succeeded));

    let store = poller.pipeline().store().clone();
    let status = store.get("deploy.sh").expect("status");
    assert_eq!(status.generation, 1);
    assert_eq!(status.overall_status, PhaseResult::Success);

    let asset = AssetStore::new(cfg.shell_assets_dir(repo.path()))
        .load("deploy.sh")
        .expect("load asset")
        .expect("asset record");
    assert_eq!(asset.generation, 1);
    assert_eq!(asset.user, "ops");
    assert!(asset.event.contains("deployed"));

    let log = fs::read_to_string(log_path(&cfg.log_dir_in(repo.path()), "deploy.sh"))
        .expect("log");
    assert!(log.contains("--- LINT OUTPUT ---"));
    assert!(log.contains("deployed"));

    // Modified scripts are not new scripts.
    repo.commit_files(&[("deploy.sh", "echo changed\n")], "edit deploy script")
        .expect("commit");
    let summary = expect_processed(poller.tick());
    assert!(summary.results.is_empty());
    assert_eq!(store.get("deploy.sh").expect("status").generation, 1);

    // Restarting from disk sees the same history.
    let reloaded = StatusStore::load(&cfg.status_path(repo.path())).expect("reload");
    assert_eq!(reloaded.get("deploy.sh").expect("status").generation, 1);
    assert!(matches!(poller.tick(), TickOutcome::NoChange { .. }));
}

#[test]
fn invalid_script_stays_pending_with_syntax_error_logged() {
    let repo = TestRepo::new().expect("repo");
    let state = tempfile::tempdir().expect("state");
    let cfg = config(state.path());
    repo.commit_files(&[("broken.sh", "true &&\n")], "add broken script")
        .expect("commit");
    let mut poller = real_poller(&repo, &cfg);

    let summary = expect_processed(poller.tick());
    assert!(matches!(
        summary.outcome("broken.sh"),
        Some(ArtifactOutcome::ValidationFailed(_))
    ));

    let status = poller.pipeline().store().get("broken.sh").expect("status");
    assert_eq!(status.lint_status, PhaseResult::Failure);
    assert_eq!(status.run_status, PhaseResult::Pending);
    assert_eq!(status.overall_status, PhaseResult::Failure);

    let log = fs::read_to_string(log_path(&cfg.log_dir_in(repo.path()), "broken.sh"))
        .expect("log");
    assert!(log.contains("syntax error"), "log was: {log}");
    assert!(log.contains("(not run)"));
}

#[test]
fn failed_container_build_is_rebuilt_when_modified() {
    let repo = TestRepo::new().expect("repo");
    let state = tempfile::tempdir().expect("state");
    let fail_flag = state.path().join("fail-build");
    fs::write(&fail_flag, "").expect("flag");
    let cfg = container_config(state.path(), &flaky_engine(state.path(), &fail_flag));
    repo.commit_files(
        &[
            ("Containers/webapp/Dockerfile", "FROM alpine\nCOPY app.txt /\n"),
            ("Containers/webapp/app.txt", "v1\n"),
        ],
        "add webapp",
    )
    .expect("commit");
    let mut poller = real_poller(&repo, &cfg);

    let summary = expect_processed(poller.tick());
    assert!(matches!(
        summary.outcome("container:webapp"),
        Some(ArtifactOutcome::ExecutionFailed(_))
    ));
    let store = poller.pipeline().store().clone();
    let status = store.get("container:webapp").expect("status");
    assert_eq!(status.generation, 1);
    assert_eq!(status.run_status, PhaseResult::Failure);

    fs::remove_file(&fail_flag).expect("clear flag");
    repo.commit_files(
        &[("Containers/webapp/Dockerfile", "FROM alpine:3\nCOPY app.txt /\n")],
        "bump base image",
    )
    .expect("commit");
    let summary = expect_processed(poller.tick());
    assert_eq!(
        summary.outcome("container:webapp"),
        Some(&ArtifactOutcome::Succeeded)
    );
    let status = store.get("container:webapp").expect("status");
    assert_eq!(status.generation, 2);
    assert_eq!(status.overall_status, PhaseResult::Success);

    let builds = builds(state.path());
    assert_eq!(builds.len(), 2);
    assert!(builds.iter().all(|l| l.contains("-t acme/webapp:v1")));
}

#[test]
fn built_container_is_rebuilt_when_modified() {
    let repo = TestRepo::new().expect("repo");
    let state = tempfile::tempdir().expect("state");
    let never = state.path().join("never-fail");
    let cfg = container_config(state.path(), &flaky_engine(state.path(), &never));
    repo.commit_files(&[("Containers/webapp/Dockerfile", "FROM alpine\n")], "add webapp")
        .expect("commit");
    let mut poller = real_poller(&repo, &cfg);

    let summary = expect_processed(poller.tick());
    assert_eq!(
        summary.outcome("container:webapp"),
        Some(&ArtifactOutcome::Succeeded)
    );

    repo.commit_files(
        &[("Containers/webapp/Dockerfile", "FROM alpine:3\n")],
        "bump base image",
    )
    .expect("commit");
    let summary = expect_processed(poller.tick());
    assert_eq!(
        summary.outcome("container:webapp"),
        Some(&ArtifactOutcome::Succeeded)
    );

    let status = poller
        .pipeline()
        .store()
        .get("container:webapp")
        .expect("status");
    assert_eq!(status.generation, 2);
    assert_eq!(status.overall_status, PhaseResult::Success);
    let builds = builds(state.path());
    assert_eq!(builds.len(), 2);
    assert!(builds.iter().all(|l| l.contains("-t acme/webapp:v1")));
}

#[test]
fn oversized_artifact_fails_before_any_tool_runs() {
    let state = tempfile::tempdir().expect("state");
    let repo = MemoryRepo::new();
    let big = "#".repeat((11 * MIB) as usize);
    repo.commit(&[("huge.sh", big.as_str()), ("small.sh", "echo ok\n")]);

    let shell = ScriptedPlugin::passing(ArtifactKind::Shell);
    let calls = shell.calls();
    let settings = PipelineSettings {
        status_path: state.path().join("status.json"),
        log_dir: state.path().join("logs"),
        max_artifact_bytes: 10 * MIB,
        allow_privilege_escalation: false,
        user: String::new(),
        container_dir: "Containers".to_string(),
    };
    let plugins: Vec<Box<dyn ArtifactPlugin>> = vec![Box::new(shell)];
    let pipeline = Pipeline::new(Arc::new(StatusStore::new()), plugins, settings);
    let mut poller = Poller::new(
        repo,
        pipeline,
        state.path().join("poll_state.json"),
        Duration::ZERO,
    )
    .expect("poller");

    let summary = expect_processed(poller.tick());
    assert!(matches!(
        summary.outcome("huge.sh"),
        Some(ArtifactOutcome::ValidationFailed(_))
    ));
    assert_eq!(summary.outcome("small.sh"), Some(&ArtifactOutcome::Succeeded));

    let store = poller.pipeline().store();
    let huge = store.get("huge.sh").expect("status");
    assert_eq!(huge.lint_status, PhaseResult::Failure);
    assert_eq!(huge.run_status, PhaseResult::Pending);

    // Only the small script reached the plugin.
    let calls = calls.lock().expect("calls");
    assert_eq!(calls.len(), 2);
}
