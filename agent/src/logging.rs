//! Diagnostic tracing for the agent daemon.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: operational diagnostics via `RUST_LOG`, output
//!   to stderr. Privileged executions use the `gitops_agent::audit` target.
//!
//! - **Artifact logs (`io/artifact_log`)**: product output in the configured
//!   log directory. Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "gitops_agent=info";

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=gitops_agent=debug gitops-agent run --once
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
