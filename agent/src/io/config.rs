//! Agent configuration stored under `.gitops/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::io::atomic::write_atomic;
use crate::io::process::ToolLimits;

/// 10 MiB.
pub const DEFAULT_MAX_ARTIFACT_BYTES: u64 = 10 * 1024 * 1024;

/// Default seconds between polls.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Agent configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values documented in `AgentConfig::default`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Branch whose tip is monitored.
    pub branch: String,

    /// Remote to fetch from. Empty means local-only (no fetch).
    pub remote: String,

    pub poll_interval_secs: u64,

    /// Holds `status.json`, `poll_state.json` and `assets/`. Relative to the repository root.
    pub state_dir: PathBuf,

    /// Per-artifact log files. Relative to the repository root.
    pub log_dir: PathBuf,

    /// Recorded in asset records.
    pub user: String,

    /// Artifacts larger than this fail without invoking any tool.
    pub max_artifact_bytes: u64,

    /// Wall-clock limit for every external tool invocation.
    pub tool_timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes per stream.
    pub output_limit_bytes: usize,

    pub shell: ShellConfig,
    pub container: ContainerConfig,
    pub viewer: ViewerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShellConfig {
    pub enabled: bool,
    /// Run scripts through the `escalation` wrapper (e.g. `sudo`).
    pub allow_privilege_escalation: bool,
    pub interpreter: String,
    /// Linter argv; the script path is appended.
    pub linter: Vec<String>,
    /// Linter exit codes above this value are fatal.
    pub lint_fatal_above: i32,
    pub escalation: Vec<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_privilege_escalation: false,
            interpreter: "bash".to_string(),
            linter: vec!["shellcheck".to_string(), "-s".to_string(), "bash".to_string()],
            lint_fatal_above: 1,
            escalation: vec!["sudo".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContainerConfig {
    pub enabled: bool,
    /// Top-level directory scanned for `<name>/Dockerfile` (case-insensitive).
    pub directory: String,
    /// Container engine binary (`docker`, `podman`).
    pub engine: String,
    pub linter: Vec<String>,
    /// Linter output matching this regex is a fatal finding.
    pub lint_error_pattern: String,
    pub image_prefix: String,
    pub default_tag: String,
    /// Start the image after a successful build.
    pub auto_run: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: "Containers".to_string(),
            engine: "docker".to_string(),
            linter: vec!["hadolint".to_string()],
            lint_error_pattern: r"\berror:".to_string(),
            image_prefix: String::new(),
            default_tag: "latest".to_string(),
            auto_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ViewerConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1".to_string(),
            port: 9099,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            branch: "main".to_string(),
            remote: "origin".to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            state_dir: PathBuf::from(".gitops"),
            log_dir: PathBuf::from(".gitops/logs"),
            user: String::new(),
            max_artifact_bytes: DEFAULT_MAX_ARTIFACT_BYTES,
            tool_timeout_secs: 600,
            output_limit_bytes: 1_000_000,
            shell: ShellConfig::default(),
            container: ContainerConfig::default(),
            viewer: ViewerConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.branch.trim().is_empty() {
            return Err(anyhow!("branch must be non-empty"));
        }
        if self.poll_interval_secs == 0 {
            return Err(anyhow!("poll_interval_secs must be > 0"));
        }
        if self.max_artifact_bytes == 0 {
            return Err(anyhow!("max_artifact_bytes must be > 0"));
        }
        if self.tool_timeout_secs == 0 {
            return Err(anyhow!("tool_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.shell.interpreter.trim().is_empty() {
            return Err(anyhow!("shell.interpreter must be non-empty"));
        }
        if is_empty_argv(&self.shell.linter) {
            return Err(anyhow!("shell.linter must be a non-empty array"));
        }
        if self.shell.allow_privilege_escalation && is_empty_argv(&self.shell.escalation) {
            return Err(anyhow!(
                "shell.escalation must be a non-empty array when privilege escalation is allowed"
            ));
        }
        if self.container.engine.trim().is_empty() {
            return Err(anyhow!("container.engine must be non-empty"));
        }
        if is_empty_argv(&self.container.linter) {
            return Err(anyhow!("container.linter must be a non-empty array"));
        }
        if self.container.directory.trim().is_empty() || self.container.directory.contains('/') {
            return Err(anyhow!("container.directory must be a single path component"));
        }
        if self.container.default_tag.trim().is_empty() {
            return Err(anyhow!("container.default_tag must be non-empty"));
        }
        self.container.lint_error_regex()?;
        Ok(())
    }

    /// Remote to fetch from, if any.
    pub fn remote(&self) -> Option<&str> {
        let remote = self.remote.trim();
        (!remote.is_empty()).then_some(remote)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn tool_limits(&self) -> ToolLimits {
        ToolLimits {
            timeout: Duration::from_secs(self.tool_timeout_secs),
            output_limit_bytes: self.output_limit_bytes,
        }
    }

    pub fn state_dir_in(&self, root: &Path) -> PathBuf {
        root.join(&self.state_dir)
    }

    pub fn log_dir_in(&self, root: &Path) -> PathBuf {
        root.join(&self.log_dir)
    }

    pub fn status_path(&self, root: &Path) -> PathBuf {
        self.state_dir_in(root).join("status.json")
    }

    pub fn poll_state_path(&self, root: &Path) -> PathBuf {
        self.state_dir_in(root).join("poll_state.json")
    }

    pub fn shell_assets_dir(&self, root: &Path) -> PathBuf {
        self.state_dir_in(root).join("assets").join("shell")
    }
}

impl ContainerConfig {
    pub fn lint_error_regex(&self) -> Result<Regex> {
        Regex::new(&self.lint_error_pattern)
            .with_context(|| format!("invalid container.lint_error_pattern '{}'", self.lint_error_pattern))
    }
}

fn is_empty_argv(argv: &[String]) -> bool {
    argv.first().is_none_or(|program| program.trim().is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AgentConfig::default());
        assert_eq!(cfg.max_artifact_bytes, 10 * 1024 * 1024);
        assert_eq!(cfg.poll_interval(), Duration::from_secs(10));
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = AgentConfig {
            branch: "production".to_string(),
            container: ContainerConfig {
                enabled: true,
                image_prefix: "acme/".to_string(),
                default_tag: "v1".to_string(),
                ..ContainerConfig::default()
            },
            ..AgentConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "branch = \"release\"\nremote = \"\"\n\n[container]\nenabled = true\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.branch, "release");
        assert_eq!(cfg.remote(), None);
        assert!(cfg.container.enabled);
        assert_eq!(cfg.container.default_tag, "latest");
        assert!(cfg.shell.enabled);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "branch = [").expect("write");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn rejects_zero_interval_and_bad_pattern() {
        let cfg = AgentConfig {
            poll_interval_secs: 0,
            ..AgentConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = AgentConfig {
            container: ContainerConfig {
                lint_error_pattern: "(".to_string(),
                ..ContainerConfig::default()
            },
            ..AgentConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
