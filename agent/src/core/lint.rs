//! Lint severity classification from linter exit status and output.

use regex::Regex;

/// How a linter's result is mapped to a severity.
#[derive(Debug, Clone)]
pub enum LintPolicy {
    /// Exit codes above the threshold are fatal; non-zero codes at or below it
    /// are advisory (shellcheck uses 1 for findings, 2+ for failures).
    ExitCodeAbove(i32),
    /// Any non-zero exit is at least advisory; fatal when the output matches.
    ErrorPattern(Regex),
}

/// Severity of a completed lint run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LintSeverity {
    Clean,
    Advisory,
    Fatal,
}

/// Classify a lint run. `exit_code` is `None` when the process was killed by a signal.
pub fn classify_lint(policy: &LintPolicy, exit_code: Option<i32>, output: &str) -> LintSeverity {
    let Some(code) = exit_code else {
        return LintSeverity::Fatal;
    };
    if code == 0 {
        return LintSeverity::Clean;
    }
    match policy {
        LintPolicy::ExitCodeAbove(threshold) => {
            if code > *threshold {
                LintSeverity::Fatal
            } else {
                LintSeverity::Advisory
            }
        }
        LintPolicy::ErrorPattern(pattern) => {
            if pattern.is_match(output) {
                LintSeverity::Fatal
            } else {
                LintSeverity::Advisory
            }
        }
    }
}
