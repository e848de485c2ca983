//! Human-readable per-artifact log files.
//!
//! One file per artifact in the log directory, rewritten on every terminal
//! state. Independent of `RUST_LOG`.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::core::types::artifact_file_stem;
use crate::io::atomic::write_atomic;

pub const LINT_HEADER: &str = "--- LINT OUTPUT ---";
pub const EXECUTION_HEADER: &str = "--- EXECUTION OUTPUT ---";
/// Placeholder for a phase that never started.
pub const NOT_RUN: &str = "(not run)";

/// Captured output of the two phases. `None` means the phase did not run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactLog {
    pub lint: Option<String>,
    pub execution: Option<String>,
}

impl ArtifactLog {
    pub fn render(&self) -> String {
        let mut buf = String::new();
        push_section(&mut buf, LINT_HEADER, self.lint.as_deref());
        push_section(&mut buf, EXECUTION_HEADER, self.execution.as_deref());
        buf
    }
}

fn push_section(buf: &mut String, header: &str, body: Option<&str>) {
    buf.push_str(header);
    buf.push('\n');
    let body = body.unwrap_or(NOT_RUN);
    buf.push_str(body);
    if !body.ends_with('\n') {
        buf.push('\n');
    }
}

pub fn log_path(log_dir: &Path, identifier: &str) -> PathBuf {
    log_dir.join(format!("{}.log", artifact_file_stem(identifier)))
}

/// Atomically replace the artifact's log file.
pub fn write_artifact_log(log_dir: &Path, identifier: &str, log: &ArtifactLog) -> Result<PathBuf> {
    let path = log_path(log_dir, identifier);
    write_atomic(&path, log.render().as_bytes())?;
    Ok(path)
}
