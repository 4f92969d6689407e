//! Per-repository reconciliation.
//!
//! Each repository moves Start → Resolved → Inspected → Acted → Done and
//! always ends with exactly one [`OutcomeRecord`]:
//!
//! | local state        | action                | record                     |
//! |--------------------|-----------------------|----------------------------|
//! | `Absent`           | full clone            | `Cloned` / `CloneFailed`   |
//! | `ValidClean`       | fast-forward pull     | `Pulled` / `PullFailed`    |
//! | `ValidDirty`       | none                  | `SkippedDirty`             |
//! | `InvalidOrCorrupt` | none                  | `SkippedInvalid`           |

use std::collections::HashMap;

use crate::mirror::{BackupPaths, Executor, LocalRepoState, Vcs, inspect};
use crate::types::RepositoryReference;

use super::outcome::{Action, FailureKind, OutcomeRecord};
use super::pacing::Throttle;

/// Short names already taken in the current run.
#[derive(Debug, Default)]
pub struct NameClaims {
    claimed: HashMap<String, String>,
}

impl NameClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the short name of `reference`. On collision returns the
    /// locator that claimed it first.
    fn claim(&mut self, reference: &RepositoryReference) -> Result<(), String> {
        let key = reference.key().collision_key();
        if let Some(first) = self.claimed.get(&key) {
            return Err(first.clone());
        }
        self.claimed.insert(key, reference.locator().to_string());
        Ok(())
    }
}

/// Reconciliation engine. Holds no state of its own between repositories.
pub struct Engine<'a> {
    vcs: &'a dyn Vcs,
    paths: &'a BackupPaths,
}

impl<'a> Engine<'a> {
    pub fn new(vcs: &'a dyn Vcs, paths: &'a BackupPaths) -> Self {
        Self { vcs, paths }
    }

    /// Start → Resolved. A locator that does not parse, or whose short name
    /// was already claimed earlier in the run, ends here as
    /// `Failed(InvalidLocator)`.
    pub fn resolve(
        &self,
        locator: &str,
        claims: &mut NameClaims,
    ) -> Result<RepositoryReference, OutcomeRecord> {
        let invalid = |short_name, message: String| {
            OutcomeRecord::new(
                locator.trim(),
                short_name,
                Action::Failed {
                    reason: FailureKind::InvalidLocator,
                },
                message,
            )
        };

        let reference = RepositoryReference::resolve(locator)
            .map_err(|e| invalid(None, format!("invalid locator: {}", e)))?;

        if let Err(first) = claims.claim(&reference) {
            return Err(invalid(
                Some(reference.key().clone()),
                format!(
                    "short name {} is already used by {} in this run",
                    reference.key(),
                    first
                ),
            ));
        }

        Ok(reference)
    }

    /// Resolved → Done.
    ///
    /// Returns `None` only when the run was cancelled while waiting for
    /// pacing, before any write was attempted.
    pub fn reconcile(
        &self,
        reference: &RepositoryReference,
        throttle: &Throttle<'_>,
    ) -> Option<OutcomeRecord> {
        let key = reference.key();
        let dir = self.paths.repo_dir(key);
        let record = |action, message: String| {
            OutcomeRecord::new(reference.locator(), Some(key.clone()), action, message)
        };

        let inspection = inspect(self.vcs, &dir);
        log::debug!("{}: local state is {}", key, inspection.state);
        let detail = inspection.detail.unwrap_or_default();
        let executor = Executor::new(self.vcs);

        let outcome = match inspection.state {
            LocalRepoState::Absent => {
                if !throttle.acquire() {
                    return None;
                }
                let result = executor.clone_into(reference, &dir);
                throttle.release();

                match result {
                    Ok(()) => self.verify_clone(reference, &dir, record),
                    Err(e) => record(
                        Action::Failed {
                            reason: FailureKind::CloneFailed,
                        },
                        e.to_string(),
                    ),
                }
            }
            LocalRepoState::ValidClean => {
                if !throttle.acquire() {
                    return None;
                }
                let result = executor.integrate(&dir);
                throttle.release();

                match result {
                    Ok(pulled) if pulled.changed => record(
                        Action::Pulled { changed: true },
                        "fast-forwarded to upstream".to_string(),
                    ),
                    Ok(_) => record(
                        Action::Pulled { changed: false },
                        "already up to date".to_string(),
                    ),
                    Err(e) => record(
                        Action::Failed {
                            reason: FailureKind::PullFailed,
                        },
                        e.to_string(),
                    ),
                }
            }
            LocalRepoState::ValidDirty => record(
                Action::SkippedDirty,
                format!("{}; leaving {} untouched", detail, dir.display()),
            ),
            LocalRepoState::InvalidOrCorrupt => record(
                Action::SkippedInvalid,
                format!("{}: {}", dir.display(), detail),
            ),
        };

        Some(outcome)
    }

    /// A clone only counts once the directory inspects as a working copy.
    fn verify_clone(
        &self,
        reference: &RepositoryReference,
        dir: &std::path::Path,
        record: impl Fn(Action, String) -> OutcomeRecord,
    ) -> OutcomeRecord {
        let after = inspect(self.vcs, dir);
        match after.state {
            LocalRepoState::ValidClean | LocalRepoState::ValidDirty => record(
                Action::Cloned,
                format!("cloned {} into {}", reference, dir.display()),
            ),
            state => record(
                Action::Failed {
                    reason: FailureKind::CloneFailed,
                },
                format!(
                    "clone reported success but {} is {}: {}",
                    dir.display(),
                    state,
                    after.detail.unwrap_or_default()
                ),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::pacing::Pacing;
    use crate::test_support::{Call, FakeVcs};
    use std::sync::atomic::AtomicBool;
    use tempfile::tempdir;

    struct Fixture {
        _temp: tempfile::TempDir,
        paths: BackupPaths,
        vcs: FakeVcs,
        cancel: AtomicBool,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = tempdir().unwrap();
            let paths = BackupPaths::new(temp.path().join("backups"));
            Self {
                _temp: temp,
                paths,
                vcs: FakeVcs::new(),
                cancel: AtomicBool::new(false),
            }
        }

        fn dir(&self, short: &str) -> std::path::PathBuf {
            self.paths.repo_dir(&short.parse().unwrap())
        }

        fn run_one(&self, locator: &str) -> OutcomeRecord {
            let engine = Engine::new(&self.vcs, &self.paths);
            let throttle = Throttle::new(Pacing::None, &self.cancel);
            let reference = engine
                .resolve(locator, &mut NameClaims::new())
                .expect("locator should resolve");
            engine.reconcile(&reference, &throttle).unwrap()
        }
    }

    #[test]
    fn absent_is_cloned() {
        let fx = Fixture::new();
        let record = fx.run_one("https://host/u/repo1.git");

        assert_eq!(record.action, Action::Cloned);
        assert_eq!(record.short_name.unwrap().to_string(), "u/repo1");
        assert_eq!(
            inspect(&fx.vcs, &fx.dir("u/repo1")).state,
            LocalRepoState::ValidClean
        );
    }

    #[test]
    fn clean_is_pulled() {
        let fx = Fixture::new();
        fx.vcs.add_clean(&fx.dir("u/r"));

        let record = fx.run_one("git@host:u/r.git");
        assert_eq!(record.action, Action::Pulled { changed: false });
        assert_eq!(record.message, "already up to date");

        fx.vcs.push_upstream(&fx.dir("u/r"));
        let record = fx.run_one("git@host:u/r.git");
        assert_eq!(record.action, Action::Pulled { changed: true });
    }

    #[test]
    fn dirty_is_skipped_without_writes() {
        let fx = Fixture::new();
        fx.vcs.add_dirty(&fx.dir("u/r"), &["notes.md"]);

        let record = fx.run_one("git@host:u/r.git");

        assert_eq!(record.action, Action::SkippedDirty);
        assert!(record.message.contains("notes.md"));
        assert_eq!(fx.vcs.write_calls(), 0);
    }

    #[test]
    fn invalid_is_skipped_without_writes() {
        let fx = Fixture::new();
        std::fs::create_dir_all(fx.dir("u/r")).unwrap();
        std::fs::write(fx.dir("u/r").join("README"), "hand-made").unwrap();

        let record = fx.run_one("git@host:u/r.git");

        assert_eq!(record.action, Action::SkippedInvalid);
        assert_eq!(fx.vcs.write_calls(), 0);
        // Never repaired or removed.
        assert!(fx.dir("u/r").join("README").exists());
    }

    #[test]
    fn clone_failure_is_recorded() {
        let fx = Fixture::new();
        fx.vcs.fail_clone("https://host/u/gone.git", "Repository not found.");

        let record = fx.run_one("https://host/u/gone.git");

        assert_eq!(
            record.action,
            Action::Failed {
                reason: FailureKind::CloneFailed
            }
        );
        assert!(record.message.contains("Repository not found."));
        assert_eq!(
            inspect(&fx.vcs, &fx.dir("u/gone")).state,
            LocalRepoState::Absent
        );
    }

    #[test]
    fn pull_failure_is_recorded() {
        let fx = Fixture::new();
        fx.vcs.add_clean(&fx.dir("u/r"));
        fx.vcs.fail_pull(&fx.dir("u/r"), "Not possible to fast-forward");

        let record = fx.run_one("https://host/u/r.git");
        assert_eq!(
            record.action,
            Action::Failed {
                reason: FailureKind::PullFailed
            }
        );
    }

    #[test]
    fn killed_clone_is_a_clone_failure() {
        let fx = Fixture::new();
        fx.vcs.time_out_clone("https://host/u/slow.git");

        let record = fx.run_one("https://host/u/slow.git");

        assert_eq!(
            record.action,
            Action::Failed {
                reason: FailureKind::CloneFailed
            }
        );
        assert!(record.message.contains("timed out"), "{}", record.message);
        assert_eq!(
            inspect(&fx.vcs, &fx.dir("u/slow")).state,
            LocalRepoState::Absent
        );
    }

    #[test]
    fn killed_pull_is_a_pull_failure() {
        let fx = Fixture::new();
        fx.vcs.add_clean(&fx.dir("u/r"));
        fx.vcs.time_out_pull(&fx.dir("u/r"));

        let record = fx.run_one("https://host/u/r.git");

        assert_eq!(
            record.action,
            Action::Failed {
                reason: FailureKind::PullFailed
            }
        );
        assert!(record.message.contains("git pull timed out"), "{}", record.message);
    }

    #[test]
    fn killed_status_skips_as_invalid_without_writes() {
        let fx = Fixture::new();
        fx.vcs.add_clean(&fx.dir("u/r"));
        fx.vcs.time_out_status(&fx.dir("u/r"));

        let record = fx.run_one("https://host/u/r.git");

        assert_eq!(record.action, Action::SkippedInvalid);
        assert!(record.message.contains("git status timed out"), "{}", record.message);
        assert_eq!(fx.vcs.write_calls(), 0);
    }

    #[test]
    fn clone_that_leaves_no_repository_is_a_failure() {
        let fx = Fixture::new();
        fx.vcs.clone_leaves_nothing("https://host/u/r.git");

        let record = fx.run_one("https://host/u/r.git");
        assert_eq!(
            record.action,
            Action::Failed {
                reason: FailureKind::CloneFailed
            }
        );
        assert!(record.message.contains("reported success"));
    }

    #[test]
    fn unparseable_locator_fails_resolution() {
        let fx = Fixture::new();
        let engine = Engine::new(&fx.vcs, &fx.paths);

        let record = engine
            .resolve("https://host/only-repo.git", &mut NameClaims::new())
            .unwrap_err();

        assert_eq!(
            record.action,
            Action::Failed {
                reason: FailureKind::InvalidLocator
            }
        );
        assert!(record.short_name.is_none());
    }

    #[test]
    fn colliding_short_name_fails_second_occurrence() {
        let fx = Fixture::new();
        let engine = Engine::new(&fx.vcs, &fx.paths);
        let mut claims = NameClaims::new();

        assert!(engine.resolve("https://github.com/u/r.git", &mut claims).is_ok());
        let record = engine
            .resolve("git@gitlab.com:U/R.git", &mut claims)
            .unwrap_err();

        assert_eq!(
            record.action,
            Action::Failed {
                reason: FailureKind::InvalidLocator
            }
        );
        assert!(record.message.contains("https://github.com/u/r.git"));
    }

    #[test]
    fn cancelled_before_write_yields_nothing() {
        let fx = Fixture::new();
        let engine = Engine::new(&fx.vcs, &fx.paths);
        let throttle = Throttle::new(Pacing::None, &fx.cancel);
        let reference = engine
            .resolve("https://host/u/r.git", &mut NameClaims::new())
            .unwrap();

        fx.cancel.store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(engine.reconcile(&reference, &throttle).is_none());
        assert!(
            !fx.vcs
                .calls()
                .iter()
                .any(|c| matches!(c, Call::Clone { .. }))
        );
    }
}
