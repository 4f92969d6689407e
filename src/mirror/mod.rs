//! Local mirror management: paths, locking, state inspection and the git
//! operations that create or advance a mirror.

mod executor;
mod git;
mod inspect;
mod lock;
mod paths;
mod process;

pub use executor::{CloneFailed, Executor, PullFailed, Pulled};
pub use git::{GitCli, GitError, StatusEntry, Vcs, head_commit, open_repository};
pub use inspect::{Inspection, LocalRepoState, inspect};
pub use lock::{LockAttempt, RunLock};
pub use paths::{BackupPaths, DEFAULT_ROOT_NAME};
