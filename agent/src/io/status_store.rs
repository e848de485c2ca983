//! Thread-safe artifact status store persisted as a single JSON snapshot.
//!
//! The poll loop is the only writer. The viewer reads concurrently through
//! [`StatusStore::get`] and [`StatusStore::snapshot`]. A single reader/writer
//! lock guards the whole map.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{ArtifactStatus, PhaseResults};
use crate::io::atomic::write_json_atomic;

/// On-disk snapshot (`<state_dir>/status.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Keyed by artifact identifier. The field name predates container support.
    pub scripts: BTreeMap<String, ArtifactStatus>,
}

#[derive(Debug, Default)]
pub struct StatusStore {
    inner: RwLock<StatusSnapshot>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StatusSnapshot) -> Self {
        Self {
            inner: RwLock::new(snapshot),
        }
    }

    /// Load the persisted snapshot. A missing file yields an empty store; a
    /// malformed file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading status snapshot");
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no status snapshot yet, starting empty");
                return Ok(Self::new());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("read status {}", path.display()));
            }
        };
        let snapshot: StatusSnapshot = serde_json::from_str(&contents)
            .with_context(|| format!("parse status {}", path.display()))?;
        debug!(artifacts = snapshot.scripts.len(), "status snapshot loaded");
        Ok(Self::from_snapshot(snapshot))
    }

    /// Serialize the full snapshot atomically (temp file + rename).
    pub fn persist(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot();
        debug!(path = %path.display(), artifacts = snapshot.scripts.len(), "persisting status");
        write_json_atomic(path, &snapshot)
    }

    /// Read-only lookup; never mutates generation or timestamps.
    pub fn get(&self, identifier: &str) -> Option<ArtifactStatus> {
        self.read().scripts.get(identifier).cloned()
    }

    /// Clone of the whole mapping, taken under one read lock.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.read().clone()
    }

    /// Start a new processing pass: generation 1 for an unseen identifier,
    /// otherwise previous generation + 1.
    pub fn update(&self, identifier: &str, results: PhaseResults) -> ArtifactStatus {
        self.update_at(identifier, results, Utc::now())
    }

    pub fn update_at(
        &self,
        identifier: &str,
        results: PhaseResults,
        now: DateTime<Utc>,
    ) -> ArtifactStatus {
        let mut guard = self.write();
        let status = guard
            .scripts
            .entry(identifier.to_string())
            .and_modify(|status| status.next_generation(results, now))
            .or_insert_with(|| ArtifactStatus::first_seen(results, now));
        debug!(identifier, generation = status.generation, overall = ?status.overall_status, "status updated");
        status.clone()
    }

    /// Record a phase transition inside the current pass without bumping the
    /// generation. Behaves like [`StatusStore::update`] for unseen identifiers.
    pub fn amend(&self, identifier: &str, results: PhaseResults) -> ArtifactStatus {
        self.amend_at(identifier, results, Utc::now())
    }

    pub fn amend_at(
        &self,
        identifier: &str,
        results: PhaseResults,
        now: DateTime<Utc>,
    ) -> ArtifactStatus {
        let mut guard = self.write();
        let status = guard
            .scripts
            .entry(identifier.to_string())
            .and_modify(|status| status.apply(results, now))
            .or_insert_with(|| ArtifactStatus::first_seen(results, now));
        debug!(identifier, generation = status.generation, overall = ?status.overall_status, "status amended");
        status.clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, StatusSnapshot> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StatusSnapshot> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
