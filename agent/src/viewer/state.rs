//! Shared state for the viewer's request handlers.

use std::path::PathBuf;
use std::sync::Arc;

use crate::io::status_store::StatusStore;

#[derive(Clone)]
pub struct ViewerState {
    /// The poll loop's live store; handlers only call `get`/`snapshot`.
    pub store: Arc<StatusStore>,
    pub log_dir: PathBuf,
    /// Shell asset records (`<state_dir>/assets/shell`).
    pub assets_dir: PathBuf,
}

impl ViewerState {
    pub fn new(store: Arc<StatusStore>, log_dir: PathBuf, assets_dir: PathBuf) -> Self {
        Self {
            store,
            log_dir,
            assets_dir,
        }
    }
}
