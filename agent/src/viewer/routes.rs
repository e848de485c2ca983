//! HTTP route handlers for the viewer API.

use std::fs;
use std::io::ErrorKind;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::core::types::{ArtifactStatus, artifact_file_stem};
use crate::io::status_store::StatusSnapshot;
use crate::viewer::state::ViewerState;

/// Build the API router.
pub fn api_router() -> Router<ViewerState> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(get_all_status))
        .route("/status/{*identifier}", get(get_status))
        .route("/logs", get(list_logs))
        .route("/logs/{name}", get(get_log))
        .route("/assets/{*identifier}", get(get_asset))
}

pub async fn health() -> &'static str {
    "ok"
}

/// GET /api/status - the full status snapshot.
pub async fn get_all_status(State(state): State<ViewerState>) -> Json<StatusSnapshot> {
    Json(state.store.snapshot())
}

/// GET /api/status/{identifier} - one artifact, 404 if never seen.
pub async fn get_status(
    State(state): State<ViewerState>,
    Path(identifier): Path<String>,
) -> Result<Json<ArtifactStatus>, StatusCode> {
    state
        .store
        .get(&identifier)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<String>,
}

/// GET /api/logs - file names in the log directory, sorted.
pub async fn list_logs(State(state): State<ViewerState>) -> Result<Json<LogsResponse>, StatusCode> {
    let entries = match fs::read_dir(&state.log_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Ok(Json(LogsResponse { logs: Vec::new() }));
        }
        Err(err) => {
            warn!(error = %err, "cannot list log directory");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    let mut logs: Vec<String> = entries
        .flatten()
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|name| name.ends_with(".log"))
        .collect();
    logs.sort();
    Ok(Json(LogsResponse { logs }))
}

/// GET /api/logs/{name} - one log file as text.
pub async fn get_log(
    State(state): State<ViewerState>,
    Path(name): Path<String>,
) -> Result<String, StatusCode> {
    if !is_plain_file_name(&name) {
        return Err(StatusCode::BAD_REQUEST);
    }
    read_text(&state.log_dir.join(name))
}

/// GET /api/assets/{identifier} - the asset record of a shell artifact.
pub async fn get_asset(
    State(state): State<ViewerState>,
    Path(identifier): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let path = state
        .assets_dir
        .join(format!("{}.json", artifact_file_stem(&identifier)));
    let contents = read_text(&path)?;
    serde_json::from_str(&contents)
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// A single file name without separators, parent references, or hidden files.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn read_text(path: &std::path::Path) -> Result<String, StatusCode> {
    fs::read_to_string(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PhaseResults;
    use crate::io::status_store::StatusStore;
    use std::sync::Arc;

    fn state(temp: &std::path::Path) -> ViewerState {
        ViewerState::new(
            Arc::new(StatusStore::new()),
            temp.join("logs"),
            temp.join("assets/shell"),
        )
    }

    #[tokio::test]
    async fn status_lookup_reads_live_store() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = state(temp.path());
        state.store.update("container:webapp", PhaseResults::VALIDATED);

        let Json(status) = get_status(State(state.clone()), Path("container:webapp".to_string()))
            .await
            .expect("found");
        assert_eq!(status.generation, 1);

        let missing = get_status(State(state.clone()), Path("nope.sh".to_string())).await;
        assert_eq!(missing.unwrap_err(), StatusCode::NOT_FOUND);

        let Json(snapshot) = get_all_status(State(state)).await;
        assert!(snapshot.scripts.contains_key("container:webapp"));
    }

    #[tokio::test]
    async fn logs_are_listed_and_served() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = state(temp.path());
        fs::create_dir_all(&state.log_dir).expect("mkdir");
        fs::write(state.log_dir.join("deploy.sh.log"), "--- LINT OUTPUT ---\n").expect("write");
        fs::write(state.log_dir.join("notes.txt"), "ignored").expect("write");

        let Json(listing) = list_logs(State(state.clone())).await.expect("list");
        assert_eq!(listing.logs, vec!["deploy.sh.log".to_string()]);

        let text = get_log(State(state), Path("deploy.sh.log".to_string()))
            .await
            .expect("log");
        assert!(text.starts_with("--- LINT OUTPUT ---"));
    }

    #[tokio::test]
    async fn log_names_with_traversal_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = state(temp.path());
        for name in ["../status.json", "..", ".hidden", "a/b.log", ""] {
            let result = get_log(State(state.clone()), Path(name.to_string())).await;
            assert_eq!(result.unwrap_err(), StatusCode::BAD_REQUEST, "{name}");
        }
    }

    #[tokio::test]
    async fn missing_log_directory_lists_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let Json(listing) = list_logs(State(state(temp.path()))).await.expect("list");
        assert!(listing.logs.is_empty());
    }

    #[tokio::test]
    async fn asset_lookup_maps_identifier_to_file_stem() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = state(temp.path());
        fs::create_dir_all(&state.assets_dir).expect("mkdir");
        fs::write(
            state
                .assets_dir
                .join(format!("{}.json", artifact_file_stem("scripts/deploy.sh"))),
            "{\"generation\": 3}",
        )
        .expect("write");

        let Json(value) = get_asset(State(state.clone()), Path("scripts/deploy.sh".to_string()))
            .await
            .expect("asset");
        assert_eq!(value["generation"], 3);

        let missing = get_asset(State(state), Path("../../etc/passwd".to_string())).await;
        assert_eq!(missing.unwrap_err(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_is_ok() {
        assert_eq!(health().await, "ok");
    }
}
