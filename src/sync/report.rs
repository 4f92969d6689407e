//! Reporting of run events.
//!
//! The coordinator never touches logger configuration; it talks to a
//! [`Reporter`] handed to it for the duration of one run.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use super::outcome::{Action, OutcomeRecord, RunSummary};

/// Receives run start/end events and one event per repository outcome.
pub trait Reporter {
    fn run_started(&mut self, backup_root: &Path, repo_count: usize);

    fn outcome(&mut self, record: &OutcomeRecord);

    fn run_finished(&mut self, summary: &RunSummary);
}

/// Reporter that writes through the `log` facade.
#[derive(Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn run_started(&mut self, backup_root: &Path, repo_count: usize) {
        log::info!(
            "Starting evergit backup run: {} repositories -> {}",
            repo_count,
            backup_root.display()
        );
    }

    fn outcome(&mut self, record: &OutcomeRecord) {
        log::log!(
            record.action.level(),
            "{} - {}: {}",
            record.label(),
            describe(&record.action),
            record.message
        );
    }

    fn run_finished(&mut self, summary: &RunSummary) {
        let c = &summary.counts;
        let elapsed = (summary.finished_at - summary.started_at)
            .to_std()
            .unwrap_or_default();
        let headline = if summary.cancelled {
            "Backup run cancelled"
        } else {
            "Backup run complete"
        };
        log::info!(
            "{} in {:.1}s: {} cloned, {} pulled ({} unchanged), {} skipped dirty, {} skipped invalid, {} failed",
            headline,
            elapsed.as_secs_f64(),
            c.cloned,
            c.pulled,
            c.unchanged,
            c.skipped_dirty,
            c.skipped_invalid,
            c.failed
        );
    }
}

/// Short label for an action, as shown in log lines.
pub fn describe(action: &Action) -> &'static str {
    match action {
        Action::Cloned => "cloned",
        Action::Pulled { changed: true } => "pulled",
        Action::Pulled { changed: false } => "up to date",
        Action::SkippedDirty => "skipped (uncommitted changes)",
        Action::SkippedInvalid => "skipped (not a valid repository)",
        Action::Failed { .. } => "failed",
    }
}

/// Write `summary` as pretty-printed JSON to `path`.
pub fn write_json_report(path: &Path, summary: &RunSummary) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, summary)?;
    writer.write_all(b"\n")?;
    writer.flush()
}
