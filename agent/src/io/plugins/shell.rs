//! Shell script plugin: `bash -n` syntax check, linter, then interpretation.

use std::path::Path;
use std::process::Command;

use tracing::{debug, info, instrument, warn};

use super::{
    ArtifactError, ArtifactPlugin, ExecutionRequest, PhaseOutcome, ToolRun, append_output,
    first_line, run_tool, timed_out, tool_name,
};
use crate::core::lint::{LintPolicy, LintSeverity, classify_lint};
use crate::core::types::ArtifactKind;
use crate::io::assets::AssetStore;
use crate::io::config::ShellConfig;
use crate::io::process::{ToolLimits, command_from_argv};

/// Target for privilege-escalated executions, kept apart from ordinary run logs.
pub const AUDIT_TARGET: &str = "gitops_agent::audit";

#[derive(Debug, Clone)]
pub struct ShellPlugin {
    interpreter: String,
    linter: Vec<String>,
    lint_policy: LintPolicy,
    escalation: Vec<String>,
    limits: ToolLimits,
    assets: AssetStore,
}

impl ShellPlugin {
    pub fn new(config: &ShellConfig, limits: ToolLimits, assets: AssetStore) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            linter: config.linter.clone(),
            lint_policy: LintPolicy::ExitCodeAbove(config.lint_fatal_above),
            escalation: config.escalation.clone(),
            limits,
            assets,
        }
    }

    fn syntax_check(&self, path: &Path, output: &mut String) -> Result<(), ArtifactError> {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg("-n").arg(path);
        let tool = tool_name(&cmd);
        match run_tool(cmd, self.limits) {
            ToolRun::Unavailable(detail) => Err(ArtifactError::ToolUnavailable { tool, detail }),
            ToolRun::Finished(out) if out.timed_out => Err(timed_out(tool, self.limits)),
            ToolRun::Finished(out) => {
                let text = out.combined();
                append_output(output, &text);
                if !out.success() {
                    return Err(ArtifactError::Syntax {
                        detail: first_line(&text),
                    });
                }
                output.push_str("Syntax check passed.\n");
                Ok(())
            }
        }
    }

    fn lint(&self, path: &Path, output: &mut String) -> Result<(), ArtifactError> {
        let mut cmd =
            command_from_argv(&self.linter).map_err(|err| ArtifactError::ToolUnavailable {
                tool: "linter".to_string(),
                detail: format!("{err:#}"),
            })?;
        cmd.arg(path);
        let tool = tool_name(&cmd);
        match run_tool(cmd, self.limits) {
            ToolRun::Unavailable(detail) => Err(ArtifactError::ToolUnavailable { tool, detail }),
            ToolRun::Finished(out) if out.timed_out => Err(timed_out(tool, self.limits)),
            ToolRun::Finished(out) => {
                let text = out.combined();
                append_output(output, &text);
                match classify_lint(&self.lint_policy, out.exit_code(), &text) {
                    LintSeverity::Fatal => Err(ArtifactError::Lint {
                        detail: first_line(&text),
                    }),
                    LintSeverity::Advisory => {
                        warn!(path = %path.display(), exit_code = ?out.exit_code(), "lint warnings");
                        output.push_str("Linting completed.\n");
                        Ok(())
                    }
                    LintSeverity::Clean => {
                        output.push_str("Linting completed.\n");
                        Ok(())
                    }
                }
            }
        }
    }

    fn command_for(&self, path: &Path, escalate: bool) -> Command {
        let wrapped = escalate.then(|| command_from_argv(&self.escalation).ok()).flatten();
        let mut cmd = match wrapped {
            Some(mut wrapper) => {
                wrapper.arg(&self.interpreter);
                wrapper
            }
            None => Command::new(&self.interpreter),
        };
        cmd.arg(path);
        cmd
    }
}

impl ArtifactPlugin for ShellPlugin {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Shell
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    fn validate(&self, path: &Path) -> PhaseOutcome {
        if !path.is_file() {
            return PhaseOutcome::failed(
                String::new(),
                ArtifactError::NotFound {
                    path: path.display().to_string(),
                },
            );
        }
        let mut output = String::new();
        let checks = self
            .syntax_check(path, &mut output)
            .and_then(|()| self.lint(path, &mut output));
        match checks {
            Ok(()) => {
                debug!("validation passed");
                PhaseOutcome::ok(output)
            }
            Err(err) => {
                warn!(error = %err, "validation failed");
                PhaseOutcome::failed(output, err)
            }
        }
    }

    #[instrument(skip_all, fields(name = request.name))]
    fn execute(&self, path: &Path, request: &ExecutionRequest<'_>) -> PhaseOutcome {
        let escalate = request.allow_privilege_escalation && !self.escalation.is_empty();
        if escalate {
            warn!(
                target: AUDIT_TARGET,
                script = request.name,
                wrapper = %self.escalation.join(" "),
                "executing script with privilege escalation"
            );
        } else {
            info!(script = request.name, "executing script");
        }
        let cmd = self.command_for(path, escalate);
        let tool = tool_name(&cmd);
        match run_tool(cmd, self.limits) {
            ToolRun::Unavailable(detail) => {
                PhaseOutcome::failed(String::new(), ArtifactError::ToolUnavailable { tool, detail })
            }
            ToolRun::Finished(out) => {
                let text = out.combined();
                if out.timed_out {
                    return PhaseOutcome::failed(text, timed_out(tool, self.limits));
                }
                if !out.success() {
                    warn!(exit_code = ?out.exit_code(), "script failed");
                    return PhaseOutcome::failed(
                        text,
                        ArtifactError::Execution {
                            exit_code: out.exit_code(),
                        },
                    );
                }
                PhaseOutcome::ok(text)
            }
        }
    }

    fn assets(&self) -> Option<&AssetStore> {
        Some(&self.assets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;
    use tracing_subscriber::fmt::MakeWriter;

    /// In-memory tracing sink shared with the subscriber under test.
    #[derive(Clone, Default)]
    struct LogSink(Arc<Mutex<Vec<u8>>>);

    impl LogSink {
        fn lines(&self) -> Vec<String> {
            let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner);
            String::from_utf8_lossy(&bytes)
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    impl Write for LogSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for LogSink {
        type Writer = LogSink;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    /// Execute with a capturing subscriber; returns the audit WARN lines.
    fn audit_lines(plugin: &ShellPlugin, path: &Path, escalate: bool) -> Vec<String> {
        let sink = LogSink::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(sink.clone())
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::INFO)
            .finish();
        let request = ExecutionRequest {
            name: "deploy.sh",
            allow_privilege_escalation: escalate,
        };
        let outcome = tracing::subscriber::with_default(subscriber, || plugin.execute(path, &request));
        assert!(outcome.succeeded(), "{outcome:?}");
        sink.lines()
            .into_iter()
            .filter(|line| line.contains("WARN") && line.contains(AUDIT_TARGET))
            .collect()
    }

    fn limits() -> ToolLimits {
        ToolLimits {
            timeout: Duration::from_secs(10),
            output_limit_bytes: 100_000,
        }
    }

    /// Linter stand-in: runs `script` with the checked file as `$1`.
    fn plugin_with_linter(script: &str, assets: &Path) -> ShellPlugin {
        let config = ShellConfig {
            linter: vec![
                "bash".to_string(),
                "-c".to_string(),
                script.to_string(),
                "lint".to_string(),
            ],
            escalation: vec!["env".to_string(), "ESCALATED=1".to_string()],
            ..ShellConfig::default()
        };
        ShellPlugin::new(&config, limits(), AssetStore::new(assets))
    }

    fn script(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("deploy.sh");
        fs::write(&path, body).expect("write script");
        path
    }

    #[test]
    fn valid_script_passes_both_checks() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plugin = plugin_with_linter("exit 0", temp.path());
        let outcome = plugin.validate(&script(temp.path(), "echo hello\n"));
        assert!(outcome.succeeded(), "{outcome:?}");
        assert!(outcome.output.contains("Syntax check passed."));
        assert!(outcome.output.contains("Linting completed."));
    }

    #[test]
    fn syntax_error_stops_before_lint() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plugin = plugin_with_linter("echo LINTER-RAN; exit 0", temp.path());
        let outcome = plugin.validate(&script(temp.path(), "true &&\n"));
        assert!(matches!(outcome.error, Some(ArtifactError::Syntax { .. })));
        assert!(outcome.output.contains("syntax error"));
        assert!(!outcome.output.contains("LINTER-RAN"));
    }

    #[test]
    fn advisory_lint_keeps_output_and_passes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plugin = plugin_with_linter("echo \"SC2164: warning in $1\"; exit 1", temp.path());
        let outcome = plugin.validate(&script(temp.path(), "cd /tmp\n"));
        assert!(outcome.succeeded());
        assert!(outcome.output.contains("SC2164"));
    }

    #[test]
    fn lint_exit_above_threshold_is_fatal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plugin = plugin_with_linter("echo broken; exit 2", temp.path());
        let outcome = plugin.validate(&script(temp.path(), "echo hi\n"));
        assert!(matches!(outcome.error, Some(ArtifactError::Lint { .. })));
        assert!(outcome.output.contains("Syntax check passed."));
        assert!(outcome.output.contains("broken"));
    }

    #[test]
    fn missing_linter_is_fatal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = ShellConfig {
            linter: vec!["definitely-not-a-linter-xyz".to_string()],
            ..ShellConfig::default()
        };
        let plugin = ShellPlugin::new(&config, limits(), AssetStore::new(temp.path()));
        let outcome = plugin.validate(&script(temp.path(), "echo hi\n"));
        assert!(matches!(
            outcome.error,
            Some(ArtifactError::ToolUnavailable { .. })
        ));
    }

    #[test]
    fn missing_file_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plugin = plugin_with_linter("exit 0", temp.path());
        let outcome = plugin.validate(&temp.path().join("absent.sh"));
        assert!(matches!(outcome.error, Some(ArtifactError::NotFound { .. })));
    }

    #[test]
    fn execute_captures_output_on_success_and_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plugin = plugin_with_linter("exit 0", temp.path());
        let request = ExecutionRequest {
            name: "deploy.sh",
            allow_privilege_escalation: false,
        };

        let ok = plugin.execute(&script(temp.path(), "echo deployed\n"), &request);
        assert!(ok.succeeded());
        assert_eq!(ok.output, "deployed\n");

        let failed = plugin.execute(&script(temp.path(), "echo partial; echo oops >&2; exit 4\n"), &request);
        assert_eq!(
            failed.error,
            Some(ArtifactError::Execution { exit_code: Some(4) })
        );
        assert!(failed.output.contains("partial"));
        assert!(failed.output.contains("oops"));
    }

    #[test]
    fn escalated_execution_goes_through_wrapper() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plugin = plugin_with_linter("exit 0", temp.path());
        let request = ExecutionRequest {
            name: "deploy.sh",
            allow_privilege_escalation: true,
        };
        let outcome = plugin.execute(&script(temp.path(), "echo \"escalated=$ESCALATED\"\n"), &request);
        assert!(outcome.succeeded(), "{outcome:?}");
        assert_eq!(outcome.output, "escalated=1\n");
    }

    #[test]
    fn only_escalated_runs_emit_audit_warning() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plugin = plugin_with_linter("exit 0", temp.path());
        let path = script(temp.path(), "echo hi\n");

        let escalated = audit_lines(&plugin, &path, true);
        assert_eq!(escalated.len(), 1, "{escalated:?}");
        assert!(escalated[0].contains("privilege escalation"));

        assert!(audit_lines(&plugin, &path, false).is_empty());
    }
}
