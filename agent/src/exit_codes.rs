//! Stable exit codes for agent CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Fatal startup error (configuration, repository, branch) or other failure.
pub const FATAL: i32 = 1;
/// `gitops-agent status <identifier>` found no such artifact.
pub const UNKNOWN_ARTIFACT: i32 = 2;
