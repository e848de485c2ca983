//! Read-only HTTP viewer over the live status store and log directory.
//!
//! Runs on its own thread with a dedicated tokio runtime so the poll loop
//! stays fully synchronous.

pub mod routes;
pub mod state;

use std::net::{SocketAddr, TcpListener};
use std::thread;

use anyhow::{Context, Result};
use axum::Router;
use tracing::{error, info};

use crate::io::config::ViewerConfig;
pub use crate::viewer::state::ViewerState;

/// Build the viewer application.
pub fn app(state: ViewerState) -> Router {
    Router::new()
        .nest("/api", routes::api_router())
        .with_state(state)
}

/// Bind the listener on the calling thread (so address errors surface at
/// startup) and serve from a background thread.
pub fn spawn(cfg: &ViewerConfig, state: ViewerState) -> Result<thread::JoinHandle<()>> {
    let addr: SocketAddr = format!("{}:{}", cfg.bind, cfg.port)
        .parse()
        .with_context(|| format!("invalid viewer address {}:{}", cfg.bind, cfg.port))?;
    let listener = TcpListener::bind(addr).with_context(|| format!("bind viewer on {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("set viewer listener non-blocking")?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .context("build viewer runtime")?;
    info!(addr = %addr, "viewer listening");

    let handle = thread::Builder::new()
        .name("viewer".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                let listener = match tokio::net::TcpListener::from_std(listener) {
                    Ok(listener) => listener,
                    Err(err) => {
                        error!(error = %err, "viewer listener setup failed");
                        return;
                    }
                };
                if let Err(err) = axum::serve(listener, app(state)).await {
                    error!(error = %err, "viewer stopped");
                }
            });
        })
        .context("spawn viewer thread")?;
    Ok(handle)
}
