//! Per-script asset records under `<state_dir>/assets/shell/`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::core::types::{PhaseResult, artifact_file_stem};
use crate::io::atomic::write_json_atomic;

/// Last-run metadata for one shell artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Number of recorded runs.
    pub generation: u64,
    pub last_run: DateTime<Utc>,
    pub lint_passed: bool,
    /// No test phase exists yet; always true.
    pub tests_passed: bool,
    /// Captured output of the last phase that ran.
    pub event: String,
    pub user: String,
    pub run_duration_ms: u64,
    pub status: PhaseResult,
    pub commit_hash: String,
    pub content_sha256: String,
}

/// Facts about one finished run, folded into the stored record.
#[derive(Debug, Clone)]
pub struct RunRecord<'a> {
    pub user: &'a str,
    pub commit: &'a str,
    pub event: &'a str,
    pub lint_passed: bool,
    pub duration: Duration,
    pub status: PhaseResult,
    pub content: &'a [u8],
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Directory of asset records, one JSON file per identifier.
#[derive(Debug, Clone)]
pub struct AssetStore {
    dir: PathBuf,
}

impl AssetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, identifier: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", artifact_file_stem(identifier)))
    }

    /// Stored record, `None` when the artifact has never run.
    pub fn load(&self, identifier: &str) -> Result<Option<AssetRecord>> {
        let path = self.path_for(identifier);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
        };
        let record = serde_json::from_str(&contents)
            .with_context(|| format!("parse asset record {}", path.display()))?;
        Ok(Some(record))
    }

    pub fn save(&self, identifier: &str, record: &AssetRecord) -> Result<()> {
        write_json_atomic(&self.path_for(identifier), record)
    }

    /// Fold a finished run into the record, bumping its generation.
    pub fn record_run(&self, identifier: &str, run: &RunRecord<'_>) -> Result<AssetRecord> {
        self.record_run_at(identifier, run, Utc::now())
    }

    pub fn record_run_at(
        &self,
        identifier: &str,
        run: &RunRecord<'_>,
        now: DateTime<Utc>,
    ) -> Result<AssetRecord> {
        let generation = self
            .load(identifier)?
            .map_or(0, |previous| previous.generation)
            + 1;
        let record = AssetRecord {
            generation,
            last_run: now,
            lint_passed: run.lint_passed,
            tests_passed: true,
            event: run.event.to_string(),
            user: run.user.to_string(),
            run_duration_ms: duration_ms(run.duration),
            status: run.status,
            commit_hash: run.commit.to_string(),
            content_sha256: hex::encode(Sha256::digest(run.content)),
        };
        self.save(identifier, &record)?;
        debug!(identifier, generation, "asset record written");
        Ok(record)
    }
}
