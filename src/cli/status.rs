//! Text-based status command implementation.
//!
//! Read-only: resolves and inspects every configured repository, never
//! clones or pulls.

use crate::mirror::{BackupPaths, Vcs, inspect};
use crate::sync::{Engine, NameClaims};

/// One line of the status table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub name: String,
    pub state: String,
    pub detail: String,
}

/// Inspect the mirror of each locator, in input order.
pub fn collect_status(vcs: &dyn Vcs, paths: &BackupPaths, locators: &[String]) -> Vec<StatusRow> {
    let engine = Engine::new(vcs, paths);
    let mut claims = NameClaims::new();

    locators
        .iter()
        .map(|locator| match engine.resolve(locator, &mut claims) {
            Ok(reference) => {
                let inspection = inspect(vcs, &paths.repo_dir(reference.key()));
                StatusRow {
                    name: reference.key().to_string(),
                    state: inspection.state.to_string(),
                    detail: inspection.detail.unwrap_or_default(),
                }
            }
            Err(record) => StatusRow {
                name: record.label(),
                state: "unusable".to_string(),
                detail: record.message,
            },
        })
        .collect()
}

/// Print the status table.
pub fn print_status(paths: &BackupPaths, rows: &[StatusRow]) {
    println!("Backup root: {}", paths.root().display());
    println!();

    println!("Repositories ({})", rows.len());
    if rows.is_empty() {
        println!("  (none)");
        return;
    }
    for row in rows {
        if row.detail.is_empty() {
            println!("  {:<40} {}", row.name, row.state);
        } else {
            println!("  {:<40} {:<8} {}", row.name, row.state, row.detail);
        }
    }
}
