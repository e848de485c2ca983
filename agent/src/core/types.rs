//! Shared deterministic types for the agent core.
//!
//! These types define the persisted status contract consumed by the viewer, so
//! their serialized names must stay stable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Result of a lint, run, or overall phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseResult {
    Pending,
    Success,
    Failure,
}

/// Result of the test phase. No artifact kind runs tests yet, so this is
/// `Skipped` in practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestResult {
    Pending,
    Success,
    Failure,
    Skipped,
}

/// Phase results supplied by the pipeline for one status write.
///
/// The overall result is derived, never supplied, so `overall == success`
/// always implies lint and run succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseResults {
    pub lint: PhaseResult,
    pub test: TestResult,
    pub run: PhaseResult,
}

impl PhaseResults {
    /// Freshly discovered artifact: nothing has run yet.
    pub const DISCOVERED: Self = Self {
        lint: PhaseResult::Pending,
        test: TestResult::Skipped,
        run: PhaseResult::Pending,
    };

    /// Validation (or size check) failed; execution never started.
    pub const VALIDATION_FAILED: Self = Self {
        lint: PhaseResult::Failure,
        test: TestResult::Skipped,
        run: PhaseResult::Pending,
    };

    /// Validation passed; execution has not finished.
    pub const VALIDATED: Self = Self {
        lint: PhaseResult::Success,
        test: TestResult::Skipped,
        run: PhaseResult::Pending,
    };

    /// Validation passed and execution finished with `run`.
    pub const fn executed(run: PhaseResult) -> Self {
        Self {
            lint: PhaseResult::Success,
            test: TestResult::Skipped,
            run,
        }
    }

    pub fn overall(&self) -> PhaseResult {
        if self.lint == PhaseResult::Failure || self.run == PhaseResult::Failure {
            return PhaseResult::Failure;
        }
        if self.lint == PhaseResult::Success && self.run == PhaseResult::Success {
            return PhaseResult::Success;
        }
        PhaseResult::Pending
    }
}

/// Persisted status of one tracked artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactStatus {
    pub lint_status: PhaseResult,
    pub test_status: TestResult,
    pub run_status: PhaseResult,
    /// Last time any field changed.
    pub timestamp: DateTime<Utc>,
    pub overall_status: PhaseResult,
    /// Processing pass counter: 1 on first observation, +1 per new pass.
    pub generation: u64,
    /// Set on first observation and never changed afterwards.
    pub first_deploy_date: DateTime<Utc>,
    pub current_version_date: DateTime<Utc>,
}

impl ArtifactStatus {
    /// Status for an identifier observed for the first time.
    pub fn first_seen(results: PhaseResults, now: DateTime<Utc>) -> Self {
        Self {
            lint_status: results.lint,
            test_status: results.test,
            run_status: results.run,
            timestamp: now,
            overall_status: results.overall(),
            generation: 1,
            first_deploy_date: now,
            current_version_date: now,
        }
    }

    /// Start a new processing pass for an already known identifier.
    pub fn next_generation(&mut self, results: PhaseResults, now: DateTime<Utc>) {
        self.generation += 1;
        self.apply(results, now);
    }

    /// Record a phase transition within the current pass.
    pub fn apply(&mut self, results: PhaseResults, now: DateTime<Utc>) {
        self.lint_status = results.lint;
        self.test_status = results.test;
        self.run_status = results.run;
        self.overall_status = results.overall();
        self.timestamp = now;
        self.current_version_date = now;
    }

    pub fn succeeded(&self) -> bool {
        self.overall_status == PhaseResult::Success
    }
}

/// Kind of artifact handled by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Shell,
    Container,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shell => "shell",
            Self::Container => "container",
        }
    }
}

/// An artifact selected for processing from a commit's change set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub kind: ArtifactKind,
    /// Status store key (`scripts/deploy.sh`, `container:webapp`).
    pub identifier: String,
    /// Repository-relative path of the file to validate and execute.
    pub path: String,
    /// Short name used for images and asset records.
    pub name: String,
}

/// Hex digits of the identifier digest appended to every file stem.
const STEM_DIGEST_LEN: usize = 12;

/// Map an artifact identifier to a single safe, unique file name stem.
///
/// Every character outside `[A-Za-z0-9._-]` becomes `_`, so path separators
/// and the `container:` prefix never escape the target directory. A short
/// SHA-256 digest of the raw identifier keeps identifiers that flatten to the
/// same text (`scripts/deploy.sh`, `scripts_deploy.sh`) apart.
pub fn artifact_file_stem(identifier: &str) -> String {
    let readable: String = identifier
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let digest = hex::encode(Sha256::digest(identifier.as_bytes()));
    format!("{readable}-{}", &digest[..STEM_DIGEST_LEN])
}
