//! GitOps agent: poll a branch, validate and execute new artifacts.
//!
//! The agent watches one branch of a git repository. Every new tip is diffed
//! against the last processed commit, and the shell scripts and container
//! files that changed are validated, executed (or built), and recorded. The
//! architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (change parsing, classification,
//!   lint severity, the status model). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, git, external tools).
//!   Isolated behind traits to enable fakes in tests.
//!
//! Orchestration modules ([`pipeline`], [`poll`]) drive core logic through I/O.
//! [`viewer`] serves a read-only HTTP view of the live status store.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod poll;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod viewer;
