//! I/O helpers for the agent: filesystem, git, and external tools.

pub mod artifact_log;
pub mod assets;
pub mod atomic;
pub mod config;
pub mod git;
pub mod plugins;
pub mod process;
pub mod status_store;
pub mod workspace;
