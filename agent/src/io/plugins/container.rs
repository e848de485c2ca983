//! Container plugin: lint the container file, build the image, optionally run it.

use std::path::Path;
use std::process::Command;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use super::{
    ArtifactError, ArtifactPlugin, ExecutionRequest, PhaseOutcome, ToolRun, append_output,
    first_line, run_tool, timed_out, tool_name,
};
use crate::core::lint::{LintPolicy, LintSeverity, classify_lint};
use crate::core::types::ArtifactKind;
use crate::io::config::ContainerConfig;
use crate::io::process::{ToolLimits, command_from_argv};

pub const BUILD_HEADER: &str = "=== BUILD OUTPUT ===";
pub const RUN_HEADER: &str = "=== RUN OUTPUT ===";
pub const NOT_STARTED: &str = "Container not started (auto_run disabled). Image is ready to use.";

#[derive(Debug, Clone)]
pub struct ContainerPlugin {
    engine: String,
    linter: Vec<String>,
    lint_policy: LintPolicy,
    image_prefix: String,
    tag: String,
    auto_run: bool,
    limits: ToolLimits,
}

impl ContainerPlugin {
    pub fn new(config: &ContainerConfig, limits: ToolLimits) -> Result<Self> {
        Ok(Self {
            engine: config.engine.clone(),
            linter: config.linter.clone(),
            lint_policy: LintPolicy::ErrorPattern(config.lint_error_regex()?),
            image_prefix: config.image_prefix.clone(),
            tag: config.default_tag.clone(),
            auto_run: config.auto_run,
            limits,
        })
    }

    /// `<prefix><name>:<tag>`.
    pub fn image_ref(&self, name: &str) -> String {
        format!("{}{}:{}", self.image_prefix, name, self.tag)
    }

    pub fn container_name(&self, name: &str) -> String {
        format!("{name}-{}", self.tag)
    }

    fn engine_command(&self) -> Command {
        Command::new(&self.engine)
    }

    /// Run one engine step, appending its output. Errors carry the failure.
    fn engine_step(&self, cmd: Command, output: &mut String) -> Result<(), ArtifactError> {
        let tool = tool_name(&cmd);
        match run_tool(cmd, self.limits) {
            ToolRun::Unavailable(detail) => Err(ArtifactError::ToolUnavailable { tool, detail }),
            ToolRun::Finished(out) => {
                append_output(output, &out.combined());
                if out.timed_out {
                    return Err(timed_out(tool, self.limits));
                }
                if !out.success() {
                    return Err(ArtifactError::Execution {
                        exit_code: out.exit_code(),
                    });
                }
                Ok(())
            }
        }
    }

    fn build_and_run(
        &self,
        path: &Path,
        name: &str,
        output: &mut String,
    ) -> Result<(), ArtifactError> {
        let image = self.image_ref(name);
        let context = path.parent().unwrap_or_else(|| Path::new("."));
        info!(image = %image, "building image");
        output.push_str(BUILD_HEADER);
        output.push('\n');
        let mut build = self.engine_command();
        build
            .arg("build")
            .arg("-f")
            .arg(path)
            .arg("-t")
            .arg(&image)
            .arg(context);
        self.engine_step(build, output)?;
        output.push_str(&format!("Built image {image}\n"));

        if !self.auto_run {
            output.push_str(NOT_STARTED);
            output.push('\n');
            return Ok(());
        }

        let container = self.container_name(name);
        // A previous container may not exist; failure to remove it is expected.
        let mut remove = self.engine_command();
        remove.args(["rm", "-f", container.as_str()]);
        if let ToolRun::Finished(out) = run_tool(remove, self.limits) {
            debug!(container = %container, exit_code = ?out.exit_code(), "removed previous container");
        }

        info!(image = %image, container = %container, "starting container");
        output.push_str(RUN_HEADER);
        output.push('\n');
        let mut run = self.engine_command();
        run.args(["run", "-d", "--name", container.as_str(), image.as_str()]);
        self.engine_step(run, output)
    }
}

impl ArtifactPlugin for ContainerPlugin {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Container
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
        let Ok(mut cmd) = command_from_argv(&self.linter) else {
            output.push_str("No container linter configured, skipping lint.\n");
            return PhaseOutcome::ok(output);
        };
        cmd.arg(path);
        let tool = tool_name(&cmd);
        match run_tool(cmd, self.limits) {
            ToolRun::Unavailable(detail) => {
                warn!(tool = %tool, detail = %detail, "container linter unavailable, skipping lint");
                output.push_str(&format!("{tool} not available, lint skipped.\n"));
            }
            ToolRun::Finished(out) if out.timed_out => {
                return PhaseOutcome::failed(output, timed_out(tool, self.limits));
            }
            ToolRun::Finished(out) => {
                let text = out.combined();
                append_output(&mut output, &text);
                match classify_lint(&self.lint_policy, out.exit_code(), &text) {
                    LintSeverity::Fatal => {
                        warn!("container lint reported errors");
                        let detail = first_line(&text);
                        return PhaseOutcome::failed(output, ArtifactError::Lint { detail });
                    }
                    LintSeverity::Advisory => {
                        warn!(exit_code = ?out.exit_code(), "container lint warnings");
                    }
                    LintSeverity::Clean => {}
                }
            }
        }
        output.push_str("Validation passed.\n");
        PhaseOutcome::ok(output)
    }

    #[instrument(skip_all, fields(name = request.name))]
    fn execute(&self, path: &Path, request: &ExecutionRequest<'_>) -> PhaseOutcome {
        let mut output = String::new();
        match self.build_and_run(path, request.name, &mut output) {
            Ok(()) => PhaseOutcome::ok(output),
            Err(err) => {
                warn!(error = %err, "container execution failed");
                PhaseOutcome::failed(output, err)
            }
        }
    }
}
