//! The two write-capable operations: creating a mirror and advancing one.

use std::path::Path;

use thiserror::Error;

use super::git::Vcs;
use crate::types::RepositoryReference;

/// Successful integrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulled {
    /// False when the mirror was already up to date.
    pub changed: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct CloneFailed(pub String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct PullFailed(pub String);

/// Runs clone and fast-forward operations through a [`Vcs`].
pub struct Executor<'a> {
    vcs: &'a dyn Vcs,
}

impl<'a> Executor<'a> {
    pub fn new(vcs: &'a dyn Vcs) -> Self {
        Self { vcs }
    }

    /// Full-history clone into `target`, which the caller saw as absent.
    pub fn clone_into(
        &self,
        reference: &RepositoryReference,
        target: &Path,
    ) -> Result<(), CloneFailed> {
        log::debug!("Cloning {} -> {}", reference, target.display());
        self.vcs
            .clone_full(reference.locator(), target)
            .map_err(|e| CloneFailed(e.to_string()))
    }

    /// Fast-forward `target`, which the caller saw as clean.
    pub fn integrate(&self, target: &Path) -> Result<Pulled, PullFailed> {
        log::debug!("Fast-forwarding {}", target.display());
        self.vcs
            .pull_fast_forward(target)
            .map(|changed| Pulled { changed })
            .map_err(|e| PullFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Call, FakeVcs};
    use tempfile::tempdir;

    #[test]
    fn clone_passes_locator_verbatim() {
        let temp_dir = tempdir().unwrap();
        let vcs = FakeVcs::new();
        let reference = RepositoryReference::resolve("git@host:u/r.git").unwrap();
        let target = temp_dir.path().join("u").join("r");

        Executor::new(&vcs).clone_into(&reference, &target).unwrap();

        assert_eq!(
            vcs.calls(),
            vec![Call::Clone {
                locator: "git@host:u/r.git".to_string(),
                dest: target,
            }]
        );
    }

    #[test]
    fn clone_failure_surfaces_reason() {
        let temp_dir = tempdir().unwrap();
        let vcs = FakeVcs::new();
        vcs.fail_clone("https://host/u/r.git", "repository not found");
        let reference = RepositoryReference::resolve("https://host/u/r.git").unwrap();

        let err = Executor::new(&vcs)
            .clone_into(&reference, &temp_dir.path().join("u").join("r"))
            .unwrap_err();

        assert!(err.0.contains("repository not found"), "{}", err);
    }

    #[test]
    fn integrate_reports_change() {
        let temp_dir = tempdir().unwrap();
        let vcs = FakeVcs::new();
        vcs.add_clean(temp_dir.path());
        let executor = Executor::new(&vcs);

        assert_eq!(
            executor.integrate(temp_dir.path()),
            Ok(Pulled { changed: false })
        );

        vcs.push_upstream(temp_dir.path());
        assert_eq!(
            executor.integrate(temp_dir.path()),
            Ok(Pulled { changed: true })
        );
    }

    #[test]
    fn integrate_failure_surfaces_reason() {
        let temp_dir = tempdir().unwrap();
        let vcs = FakeVcs::new();
        vcs.add_clean(temp_dir.path());
        vcs.fail_pull(temp_dir.path(), "Not possible to fast-forward");

        let err = Executor::new(&vcs).integrate(temp_dir.path()).unwrap_err();
        assert!(err.0.contains("Not possible to fast-forward"));
    }
}
