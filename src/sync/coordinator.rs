//! Run coordinator: one pass over the configured repositories.
//!
//! Per-repository faults never escape a run; they become outcome records.
//! Only run-level faults (backup root unusable, another run in progress)
//! are returned as errors, before any repository is touched.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use chrono::Utc;
use crossbeam_channel::{bounded, unbounded};
use thiserror::Error;

use crate::mirror::{BackupPaths, LockAttempt, RunLock, Vcs};
use crate::types::RepositoryReference;

use super::engine::{Engine, NameClaims};
use super::outcome::{Action, FailureKind, OutcomeRecord, RunSummary};
use super::pacing::{Pacing, Throttle};
use super::report::Reporter;

/// Faults that prevent a run from starting.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("cannot create backup root {path}: {source}")]
    BackupRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot lock backup root {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("another evergit run{} is already working on {}", holder_suffix(.holder), .root.display())]
    AlreadyRunning { root: PathBuf, holder: Option<u32> },
}

fn holder_suffix(holder: &Option<u32>) -> String {
    holder.map(|pid| format!(" (pid {})", pid)).unwrap_or_default()
}

/// Knobs for one run.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub pacing: Pacing,
    /// Number of repositories reconciled at once; 1 is a plain sequential pass.
    pub jobs: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            pacing: Pacing::None,
            jobs: 1,
        }
    }
}

type Planned = Result<RepositoryReference, OutcomeRecord>;

/// Drives the reconciliation engine over a list of locators.
pub struct Coordinator<'a> {
    vcs: &'a dyn Vcs,
    cancel: &'a AtomicBool,
}

impl<'a> Coordinator<'a> {
    /// `cancel` is polled between repositories and while pacing; setting it
    /// stops the run once in-flight repositories are done.
    pub fn new(vcs: &'a dyn Vcs, cancel: &'a AtomicBool) -> Self {
        Self { vcs, cancel }
    }

    pub fn run(
        &self,
        locators: &[String],
        paths: &BackupPaths,
        options: &RunOptions,
        reporter: &mut dyn Reporter,
    ) -> Result<RunSummary, RunError> {
        paths.ensure_root().map_err(|source| RunError::BackupRoot {
            path: paths.root().to_path_buf(),
            source,
        })?;

        let lock_path = paths.lock_path();
        let _lock = match RunLock::try_acquire(&lock_path) {
            Ok(LockAttempt::Acquired(lock)) => lock,
            Ok(LockAttempt::Busy { holder }) => {
                return Err(RunError::AlreadyRunning {
                    root: paths.root().to_path_buf(),
                    holder,
                });
            }
            Err(source) => {
                return Err(RunError::Lock {
                    path: lock_path,
                    source,
                });
            }
        };

        let started_at = Utc::now();
        reporter.run_started(paths.root(), locators.len());

        let engine = Engine::new(self.vcs, paths);
        let throttle = Throttle::new(options.pacing, self.cancel);

        // Names are claimed up front, in input order, so the first occurrence
        // always wins regardless of how work is scheduled.
        let mut claims = NameClaims::new();
        let planned: Vec<Planned> = locators
            .iter()
            .map(|locator| engine.resolve(locator, &mut claims))
            .collect();

        let (records, cancelled) = if options.jobs <= 1 {
            self.run_sequential(&engine, &throttle, planned, reporter)
        } else {
            self.run_pool(&engine, &throttle, planned, options.jobs, reporter)
        };

        let summary = RunSummary::new(paths.root().to_path_buf(), started_at, records, cancelled);
        reporter.run_finished(&summary);
        Ok(summary)
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn run_sequential(
        &self,
        engine: &Engine<'_>,
        throttle: &Throttle<'_>,
        planned: Vec<Planned>,
        reporter: &mut dyn Reporter,
    ) -> (Vec<OutcomeRecord>, bool) {
        let mut records = Vec::with_capacity(planned.len());

        for plan in planned {
            if self.cancelled() {
                log::warn!("Cancellation requested; stopping before the next repository");
                return (records, true);
            }

            let record = match plan {
                Ok(reference) => reconcile_guarded(engine, &reference, throttle),
                Err(record) => Some(record),
            };

            match record {
                Some(record) => {
                    reporter.outcome(&record);
                    records.push(record);
                }
                None => return (records, true),
            }
        }

        (records, false)
    }

    /// Bounded worker pool. Records are reported and returned in input order.
    fn run_pool(
        &self,
        engine: &Engine<'_>,
        throttle: &Throttle<'_>,
        planned: Vec<Planned>,
        jobs: usize,
        reporter: &mut dyn Reporter,
    ) -> (Vec<OutcomeRecord>, bool) {
        let total = planned.len();
        let mut slots: Vec<Option<OutcomeRecord>> = (0..total).map(|_| None).collect();
        let mut work = Vec::new();
        for (index, plan) in planned.into_iter().enumerate() {
            match plan {
                Ok(reference) => work.push((index, reference)),
                Err(record) => slots[index] = Some(record),
            }
        }

        let workers = jobs.min(work.len());
        let (job_tx, job_rx) = bounded::<(usize, RepositoryReference)>(workers.max(1));
        let (done_tx, done_rx) = unbounded::<(usize, Option<OutcomeRecord>)>();
        let mut cancelled = false;
        let mut next_to_report = 0;

        thread::scope(|scope| {
            for n in 0..workers {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                thread::Builder::new()
                    .name(format!("evergit-worker-{}", n))
                    .spawn_scoped(scope, move || {
                        for (index, reference) in job_rx.iter() {
                            let record = reconcile_guarded(engine, &reference, throttle);
                            if done_tx.send((index, record)).is_err() {
                                break;
                            }
                        }
                    })
                    .expect("failed to spawn worker thread");
            }
            drop(job_rx);
            drop(done_tx);

            let dispatcher = scope.spawn(move || {
                for job in work {
                    if self.cancelled() {
                        log::warn!("Cancellation requested; not starting further repositories");
                        return true;
                    }
                    if job_tx.send(job).is_err() {
                        break;
                    }
                }
                false
            });

            for (index, record) in done_rx.iter() {
                match record {
                    Some(record) => slots[index] = Some(record),
                    None => cancelled = true,
                }
                while let Some(Some(record)) = slots.get(next_to_report) {
                    reporter.outcome(record);
                    next_to_report += 1;
                }
            }

            if dispatcher.join().unwrap_or(true) {
                cancelled = true;
            }
        });

        // Anything behind a gap left by cancellation.
        for record in slots.iter().skip(next_to_report).flatten() {
            reporter.outcome(record);
        }

        (slots.into_iter().flatten().collect(), cancelled)
    }
}

/// Run one repository's pipeline, turning a panic into a `Failed` record.
fn reconcile_guarded(
    engine: &Engine<'_>,
    reference: &RepositoryReference,
    throttle: &Throttle<'_>,
) -> Option<OutcomeRecord> {
    match panic::catch_unwind(AssertUnwindSafe(|| engine.reconcile(reference, throttle))) {
        Ok(record) => record,
        Err(payload) => Some(OutcomeRecord::new(
            reference.locator(),
            Some(reference.key().clone()),
            Action::Failed {
                reason: FailureKind::Internal,
            },
            format!("unexpected error: {}", panic_message(payload.as_ref())),
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
