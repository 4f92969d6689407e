//! Per-repository outcome records and the run summary built from them.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::RepoKey;

/// Why a repository failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Unparseable locator, or one whose short name collides with an earlier one.
    InvalidLocator,
    CloneFailed,
    PullFailed,
    /// A fault inside the pipeline that was not otherwise handled.
    Internal,
}

/// What happened to one repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Cloned,
    Pulled { changed: bool },
    SkippedDirty,
    SkippedInvalid,
    Failed { reason: FailureKind },
}

impl Action {
    /// Log severity for this action.
    pub fn level(&self) -> log::Level {
        match self {
            Self::Cloned | Self::Pulled { .. } => log::Level::Info,
            Self::SkippedDirty | Self::SkippedInvalid => log::Level::Warn,
            Self::Failed { .. } => log::Level::Error,
        }
    }
}

/// Immutable record of one repository's fate in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeRecord {
    pub locator: String,
    pub short_name: Option<RepoKey>,
    pub action: Action,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl OutcomeRecord {
    pub fn new(
        locator: impl Into<String>,
        short_name: Option<RepoKey>,
        action: Action,
        message: impl Into<String>,
    ) -> Self {
        Self {
            locator: locator.into(),
            short_name,
            action,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Short name if resolved, otherwise the raw locator.
    pub fn label(&self) -> String {
        match &self.short_name {
            Some(key) => key.to_string(),
            None => self.locator.clone(),
        }
    }
}

/// Counts of records by action kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActionCounts {
    pub cloned: usize,
    pub pulled: usize,
    pub unchanged: usize,
    pub skipped_dirty: usize,
    pub skipped_invalid: usize,
    pub failed: usize,
}

impl ActionCounts {
    pub fn total(&self) -> usize {
        self.cloned + self.pulled + self.skipped_dirty + self.skipped_invalid + self.failed
    }
}

/// Outcome of one invocation, in input order.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub backup_root: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// True if the run stopped early; `records` then covers only the
    /// repositories that completed.
    pub cancelled: bool,
    pub records: Vec<OutcomeRecord>,
    pub counts: ActionCounts,
}

impl RunSummary {
    pub(crate) fn new(
        backup_root: PathBuf,
        started_at: DateTime<Utc>,
        records: Vec<OutcomeRecord>,
        cancelled: bool,
    ) -> Self {
        let counts = count(&records);
        Self {
            backup_root,
            started_at,
            finished_at: Utc::now(),
            cancelled,
            records,
            counts,
        }
    }
}

fn count(records: &[OutcomeRecord]) -> ActionCounts {
    let mut counts = ActionCounts::default();
    for record in records {
        match record.action {
            Action::Cloned => counts.cloned += 1,
            Action::Pulled { changed } => {
                counts.pulled += 1;
                if !changed {
                    counts.unchanged += 1;
                }
            }
            Action::SkippedDirty => counts.skipped_dirty += 1,
            Action::SkippedInvalid => counts.skipped_invalid += 1,
            Action::Failed { .. } => counts.failed += 1,
        }
    }
    counts
}
