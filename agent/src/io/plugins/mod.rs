//! Artifact plugins: validate and execute one artifact kind.
//!
//! The [`ArtifactPlugin`] trait decouples the pipeline from the external tools
//! behind each artifact kind. Tests use scripted plugins that return
//! predetermined outcomes without spawning processes.

pub mod container;
pub mod shell;

use std::path::Path;
use std::process::Command;

use thiserror::Error;

use crate::core::types::ArtifactKind;
use crate::io::assets::AssetStore;
use crate::io::process::{CommandOutput, ToolLimits, run_command_with_timeout};

pub use container::ContainerPlugin;
pub use shell::ShellPlugin;

/// Why an artifact failed a phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactError {
    #[error("syntax check failed: {detail}")]
    Syntax { detail: String },
    #[error("lint reported fatal findings: {detail}")]
    Lint { detail: String },
    #[error("{tool} is not available: {detail}")]
    ToolUnavailable { tool: String, detail: String },
    #[error("execution failed with exit code {exit_code:?}")]
    Execution { exit_code: Option<i32> },
    #[error("{tool} timed out after {timeout_secs}s")]
    TimedOut { tool: String, timeout_secs: u64 },
    #[error("artifact not found: {path}")]
    NotFound { path: String },
    #[error("artifact is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },
    #[error("cannot materialize artifact: {detail}")]
    Materialize { detail: String },
}

/// Captured output of one phase plus its failure, if any.
///
/// Output is kept on both paths so logs always show what the tools printed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseOutcome {
    pub output: String,
    pub error: Option<ArtifactError>,
}

impl PhaseOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(output: impl Into<String>, error: ArtifactError) -> Self {
        Self {
            output: output.into(),
            error: Some(error),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// Output followed by an `error:` line describing the failure.
    pub fn log_text(&self) -> String {
        let mut text = self.output.clone();
        if let Some(err) = &self.error {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&format!("error: {err}\n"));
        }
        text
    }
}

/// Per-call execution options.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRequest<'a> {
    /// Short artifact name (script basename, container directory name).
    pub name: &'a str,
    /// Run through the privilege-escalation wrapper. Shell only.
    pub allow_privilege_escalation: bool,
}

/// Validate-then-execute capability for one artifact kind.
pub trait ArtifactPlugin {
    fn kind(&self) -> ArtifactKind;

    /// Run the kind's checks in order, stopping at the first fatal failure.
    fn validate(&self, path: &Path) -> PhaseOutcome;

    /// Run or build the artifact. Only called after a successful validation.
    fn execute(&self, path: &Path, request: &ExecutionRequest<'_>) -> PhaseOutcome;

    /// Where run metadata is recorded, for kinds that keep asset records.
    fn assets(&self) -> Option<&AssetStore> {
        None
    }
}

/// Result of running one external tool on behalf of a plugin.
enum ToolRun {
    Finished(CommandOutput),
    Unavailable(String),
}

fn run_tool(cmd: Command, limits: ToolLimits) -> ToolRun {
    match run_command_with_timeout(cmd, limits) {
        Ok(output) => ToolRun::Finished(output),
        Err(err) => ToolRun::Unavailable(format!("{err:#}")),
    }
}

fn tool_name(cmd: &Command) -> String {
    cmd.get_program().to_string_lossy().into_owned()
}

fn timed_out(tool: String, limits: ToolLimits) -> ArtifactError {
    ArtifactError::TimedOut {
        tool,
        timeout_secs: limits.timeout.as_secs(),
    }
}

/// Append tool output to `buf`, keeping sections line-terminated.
fn append_output(buf: &mut String, text: &str) {
    buf.push_str(text);
    if !text.is_empty() && !text.ends_with('\n') {
        buf.push('\n');
    }
}

/// First non-empty line of tool output, for error summaries.
fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("no output")
        .to_string()
}
