//! Local state inspection of a mirror directory.
//!
//! Every failure to establish that a directory is a clean working copy is
//! reported as [`LocalRepoState::InvalidOrCorrupt`], never as clean. Only
//! read-only queries are issued.

use std::fmt;
use std::path::Path;

use serde::Serialize;

use super::git::{StatusEntry, Vcs};

/// How many dirty paths to name in an inspection detail.
const DIRTY_PATHS_SHOWN: usize = 3;

/// On-disk state of a mirror directory, computed fresh on every pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalRepoState {
    Absent,
    ValidClean,
    ValidDirty,
    InvalidOrCorrupt,
}

impl fmt::Display for LocalRepoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Absent => "absent",
            Self::ValidClean => "clean",
            Self::ValidDirty => "dirty",
            Self::InvalidOrCorrupt => "invalid",
        };
        f.write_str(label)
    }
}

/// Result of inspecting a directory, with a reason for non-clean states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    pub state: LocalRepoState,
    pub detail: Option<String>,
}

impl Inspection {
    fn absent() -> Self {
        Self {
            state: LocalRepoState::Absent,
            detail: None,
        }
    }

    fn clean() -> Self {
        Self {
            state: LocalRepoState::ValidClean,
            detail: None,
        }
    }

    fn dirty(entries: &[StatusEntry]) -> Self {
        Self {
            state: LocalRepoState::ValidDirty,
            detail: Some(describe_dirty(entries)),
        }
    }

    fn invalid(detail: impl Into<String>) -> Self {
        Self {
            state: LocalRepoState::InvalidOrCorrupt,
            detail: Some(detail.into()),
        }
    }
}

/// Determine the state of `dir`.
pub fn inspect(vcs: &dyn Vcs, dir: &Path) -> Inspection {
    match std::fs::symlink_metadata(dir) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Inspection::absent(),
        Err(e) => return Inspection::invalid(format!("cannot stat directory: {}", e)),
    }

    if !dir.is_dir() {
        return Inspection::invalid("path exists but is not a directory");
    }

    if !dir.join(".git").exists() {
        return Inspection::invalid("directory has no .git metadata");
    }

    if let Err(e) = vcs.open_work_tree(dir) {
        return Inspection::invalid(e.to_string());
    }

    match vcs.status_porcelain(dir) {
        Ok(entries) if entries.is_empty() => Inspection::clean(),
        Ok(entries) => Inspection::dirty(&entries),
        Err(e) => Inspection::invalid(e.to_string()),
    }
}

fn describe_dirty(entries: &[StatusEntry]) -> String {
    let shown: Vec<&str> = entries
        .iter()
        .take(DIRTY_PATHS_SHOWN)
        .map(|e| if e.path.is_empty() { e.code.as_str() } else { e.path.as_str() })
        .collect();

    let noun = if entries.len() == 1 { "change" } else { "changes" };
    let mut detail = format!(
        "{} uncommitted {} ({})",
        entries.len(),
        noun,
        shown.join(", ")
    );
    if entries.len() > DIRTY_PATHS_SHOWN {
        detail.push_str(&format!(" and {} more", entries.len() - DIRTY_PATHS_SHOWN));
    }
    detail
}
