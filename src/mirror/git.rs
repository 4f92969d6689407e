//! Git operations using a hybrid CLI + libgit2 approach.
//!
//! **CLI (with hardening) for anything that talks to a remote or must match
//! what a user would see from `git` itself:**
//! - `clone_full` - full-history clone of a remote locator
//! - `pull_fast_forward` - fetch + fast-forward-only integrate
//! - `status_porcelain` - working-tree dirtiness
//!
//! **libgit2 for local read operations:**
//! - `open_work_tree` - strict "is this directory the root of a working copy"
//! - `head_commit` - HEAD before/after an integrate
//!
//! Nothing here ever resets, rebases, force-updates or prunes.

use git2::Repository;
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use thiserror::Error;

use super::process::{RunOutcome, run_command};

/// Errors returned by git operations.
#[derive(Error, Debug)]
pub enum GitError {
    /// libgit2 reported an error.
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
    /// Path does not contain a git repository.
    #[error("repository not found at {0}")]
    NotFound(String),
    /// Path holds a repository but not a usable working copy rooted there.
    #[error("not a working copy: {0}")]
    NotWorkTree(String),
    /// Clone failed.
    #[error("clone failed: {0}")]
    CloneError(String),
    /// Fetch or fast-forward failed.
    #[error("pull failed: {0}")]
    PullError(String),
    /// `git status` failed.
    #[error("status query failed: {0}")]
    StatusError(String),
    /// The child process exceeded the configured timeout and was killed.
    #[error("git {operation} timed out after {after:?}")]
    TimedOut {
        operation: &'static str,
        after: Duration,
    },
    /// Underlying IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Invalid inputs were provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

impl StatusEntry {
    fn parse(line: &str) -> Self {
        // Porcelain v1 is `XY <path>`; anything shorter still counts as a change.
        match (line.get(..2), line.get(3..)) {
            (Some(code), Some(path)) => Self {
                code: code.to_string(),
                path: path.to_string(),
            },
            _ => Self {
                code: line.to_string(),
                path: String::new(),
            },
        }
    }
}

/// Port for the version-control operations the mirror needs.
///
/// `GitCli` is the real implementation; tests substitute fakes so the
/// reconciliation logic can be checked without a network or a git binary.
pub trait Vcs: Send + Sync {
    /// Succeeds only if `dir` is the root of a non-bare working copy.
    fn open_work_tree(&self, dir: &Path) -> Result<(), GitError>;

    /// Working-tree status entries, untracked files included.
    fn status_porcelain(&self, dir: &Path) -> Result<Vec<StatusEntry>, GitError>;

    /// Full-history clone of `locator` into `dest`, which must not exist.
    fn clone_full(&self, locator: &str, dest: &Path) -> Result<(), GitError>;

    /// Fetch and fast-forward the checked-out branch.
    /// Returns whether HEAD moved.
    fn pull_fast_forward(&self, dir: &Path) -> Result<bool, GitError>;
}

/// Git CLI wrapper with security hardening.
#[derive(Debug, Clone)]
pub struct GitCli {
    git_path: String,
    timeout: Option<Duration>,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    /// Create a new GitCli instance using the system git.
    pub fn new() -> Self {
        Self {
            git_path: "git".into(),
            timeout: None,
        }
    }

    /// Kill git subprocesses that run longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Report the installed git version, if git can be run at all.
    pub fn version(&self) -> Result<String, GitError> {
        let mut cmd = Command::new(&self.git_path);
        cmd.arg("--version");
        let output = self.run("version", cmd)?;
        if !output.status.success() {
            return Err(GitError::InvalidInput(output.failure_reason()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Create a hardened Command with security settings.
    ///
    /// Applies:
    /// - `GIT_TERMINAL_PROMPT=0` - disable interactive prompts
    /// - `GIT_OPTIONAL_LOCKS=0` - read-only commands never rewrite the index
    /// - `core.hooksPath=` - disable hooks execution
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.git_path);
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.env("GIT_OPTIONAL_LOCKS", "0");
        cmd.args(["-c", "core.hooksPath="]);
        cmd
    }

    fn run(
        &self,
        operation: &'static str,
        cmd: Command,
    ) -> Result<super::process::CommandOutput, GitError> {
        log::debug!("Running git {} (timeout: {:?})", operation, self.timeout);
        match run_command(cmd, self.timeout)? {
            RunOutcome::Completed(output) => Ok(output),
            RunOutcome::TimedOut => Err(GitError::TimedOut {
                operation,
                after: self.timeout.unwrap_or_default(),
            }),
        }
    }
}

impl Vcs for GitCli {
    fn open_work_tree(&self, dir: &Path) -> Result<(), GitError> {
        let repo = open_repository(dir)?;
        if repo.is_bare() {
            return Err(GitError::NotWorkTree(format!(
                "{} is a bare repository",
                dir.display()
            )));
        }

        let workdir = repo
            .workdir()
            .ok_or_else(|| GitError::NotWorkTree(format!("{} has no work tree", dir.display())))?;

        // A directory nested inside some other checkout is not a mirror.
        if std::fs::canonicalize(workdir)? != std::fs::canonicalize(dir)? {
            return Err(GitError::NotWorkTree(format!(
                "{} belongs to the working copy at {}",
                dir.display(),
                workdir.display()
            )));
        }

        Ok(())
    }

    fn status_porcelain(&self, dir: &Path) -> Result<Vec<StatusEntry>, GitError> {
        let mut cmd = self.command();
        cmd.arg("-C")
            .arg(dir)
            .args(["status", "--porcelain=v1", "--untracked-files=all"]);

        let output = self.run("status", cmd)?;
        if !output.status.success() {
            return Err(GitError::StatusError(output.failure_reason()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(StatusEntry::parse)
            .collect())
    }

    fn clone_full(&self, locator: &str, dest: &Path) -> Result<(), GitError> {
        validate_locator(locator)?;

        if dest.exists() {
            return Err(GitError::InvalidInput(format!(
                "clone destination {} already exists",
                dest.display()
            )));
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut cmd = self.command();
        cmd.args(["clone", "--"]).arg(locator).arg(dest);

        let result = match self.run("clone", cmd) {
            Ok(output) if output.status.success() => Ok(()),
            Ok(output) => Err(GitError::CloneError(output.failure_reason())),
            Err(e) => Err(e),
        };

        if result.is_err() && dest.exists() {
            // Only ever removes what this clone attempt created.
            if let Err(e) = remove_partial_clone(dest) {
                log::warn!(
                    "Failed to remove partial clone at {}: {}",
                    dest.display(),
                    e
                );
            }
        }

        result
    }

    fn pull_fast_forward(&self, dir: &Path) -> Result<bool, GitError> {
        let before = head_commit(dir)?;

        let mut cmd = self.command();
        cmd.arg("-C")
            .arg(dir)
            .args(["pull", "--ff-only", "--no-rebase", "--no-edit"]);

        let output = self.run("pull", cmd)?;
        if !output.status.success() {
            return Err(GitError::PullError(output.failure_reason()));
        }

        let after = head_commit(dir)?;
        Ok(before != after)
    }
}

/// Killed helpers can still be writing into `dest` for a moment after the
/// process group is signalled, so a failed removal is retried.
fn remove_partial_clone(dest: &Path) -> std::io::Result<()> {
    const ATTEMPTS: u32 = 5;
    let mut attempt = 1;
    loop {
        match std::fs::remove_dir_all(dest) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) if attempt >= ATTEMPTS => return Err(e),
            Err(e) => {
                log::debug!(
                    "Retrying removal of {} after: {}",
                    dest.display(),
                    e
                );
                std::thread::sleep(Duration::from_millis(50 * u64::from(attempt)));
                attempt += 1;
            }
        }
    }
}

/// Reject locators git could read as an option.
fn validate_locator(locator: &str) -> Result<(), GitError> {
    if locator.is_empty() {
        return Err(GitError::InvalidInput("locator cannot be empty".to_string()));
    }
    if locator.starts_with('-') {
        return Err(GitError::InvalidInput(
            "locator cannot start with '-'".to_string(),
        ));
    }
    if locator.bytes().any(|b| b < 0x20) {
        return Err(GitError::InvalidInput(
            "locator cannot contain control characters".to_string(),
        ));
    }
    Ok(())
}

/// Open an existing repository at exactly the given path (no upward search).
pub fn open_repository(path: &Path) -> Result<Repository, GitError> {
    let repo = Repository::open(path).map_err(|e| {
        if e.code() == git2::ErrorCode::NotFound {
            GitError::NotFound(path.display().to_string())
        } else {
            GitError::Git(e)
        }
    })?;
    Ok(repo)
}

/// Commit id HEAD points at, or `None` for an unborn branch.
pub fn head_commit(path: &Path) -> Result<Option<String>, GitError> {
    let repo = open_repository(path)?;
    let head = match repo.head() {
        Ok(head) => head,
        Err(e) if e.code() == git2::ErrorCode::UnbornBranch => return Ok(None),
        Err(e) => return Err(GitError::Git(e)),
    };
    let commit = head.peel_to_commit()?;
    Ok(Some(commit.id().to_string()))
}
