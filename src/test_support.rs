//! Shared fixtures for unit tests: a scripted in-memory `Vcs`, a recording
//! reporter, and throwaway upstream repositories built with the real git
//! binary.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::mirror::{GitError, StatusEntry, Vcs};
use crate::sync::{OutcomeRecord, Reporter, RunSummary};

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args([
            "-c",
            "user.name=Test",
            "-c",
            "user.email=test@example.com",
            "-c",
            "commit.gpgsign=false",
            "-c",
            "init.defaultBranch=main",
        ])
        .args(args)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Write `file` in the working copy at `dir` and commit it.
pub fn commit_file(dir: &Path, file: &str, content: &str) {
    std::fs::write(dir.join(file), content).unwrap();
    git(dir, &["add", "--", file]);
    git(dir, &["commit", "-q", "-m", &format!("update {}", file)]);
}

/// A bare "remote" plus the working copy used to feed it commits.
pub struct Upstream {
    seed: PathBuf,
    bare: PathBuf,
}

impl Upstream {
    pub fn create(root: &Path, owner: &str, repo: &str) -> Self {
        let seed = root.join("seed").join(owner).join(repo);
        let bare = root
            .join("upstream")
            .join(owner)
            .join(format!("{}.git", repo));
        std::fs::create_dir_all(&seed).unwrap();
        std::fs::create_dir_all(bare.parent().unwrap()).unwrap();

        git(&seed, &["init", "-q"]);
        commit_file(&seed, "README.md", &format!("# {}\n", repo));
        git(
            root,
            &[
                "clone",
                "-q",
                "--bare",
                seed.to_str().unwrap(),
                bare.to_str().unwrap(),
            ],
        );

        Self { seed, bare }
    }

    pub fn locator(&self) -> String {
        format!("file://{}", self.bare.display())
    }

    pub fn seed_dir(&self) -> &Path {
        &self.seed
    }

    pub fn bare_dir(&self) -> &Path {
        &self.bare
    }

    /// Commit in the seed and publish it to the bare remote.
    pub fn push_commit(&self, file: &str, content: &str) {
        commit_file(&self.seed, file, content);
        git(
            &self.seed,
            &["push", "-q", self.bare.to_str().unwrap(), "HEAD"],
        );
    }
}

/// Every call made against a [`FakeVcs`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    OpenWorkTree(PathBuf),
    Status(PathBuf),
    Clone { locator: String, dest: PathBuf },
    Pull(PathBuf),
}

#[derive(Debug, Default)]
struct FakeRepo {
    dirty: Vec<String>,
    status_fails: bool,
    status_times_out: bool,
    pull_error: Option<String>,
    pull_times_out: bool,
    upstream_ahead: bool,
}

#[derive(Debug, Default)]
struct State {
    repos: HashMap<PathBuf, FakeRepo>,
    calls: Vec<Call>,
    clone_failures: HashMap<String, String>,
    clone_timeouts: HashSet<String>,
    clone_noops: HashSet<String>,
    clone_panics: HashSet<String>,
    clone_delays: HashMap<String, Duration>,
    cancel_after: HashSet<String>,
}

/// Scripted `Vcs`. Repositories it knows about get a `.git` directory on
/// disk so that inspection's filesystem checks pass.
#[derive(Debug, Default)]
pub struct FakeVcs {
    state: Mutex<State>,
    cancel: AtomicBool,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, dir: &Path, repo: FakeRepo) {
        std::fs::create_dir_all(dir.join(".git")).unwrap();
        self.state().repos.insert(dir.to_path_buf(), repo);
    }

    pub fn add_clean(&self, dir: &Path) {
        self.register(dir, FakeRepo::default());
    }

    pub fn add_dirty(&self, dir: &Path, paths: &[&str]) {
        self.register(
            dir,
            FakeRepo {
                dirty: paths.iter().map(|p| p.to_string()).collect(),
                ..FakeRepo::default()
            },
        );
    }

    pub fn fail_status(&self, dir: &Path) {
        if let Some(repo) = self.state().repos.get_mut(dir) {
            repo.status_fails = true;
        }
    }

    pub fn time_out_status(&self, dir: &Path) {
        if let Some(repo) = self.state().repos.get_mut(dir) {
            repo.status_times_out = true;
        }
    }

    pub fn time_out_pull(&self, dir: &Path) {
        if let Some(repo) = self.state().repos.get_mut(dir) {
            repo.pull_times_out = true;
        }
    }

    pub fn fail_pull(&self, dir: &Path, message: &str) {
        if let Some(repo) = self.state().repos.get_mut(dir) {
            repo.pull_error = Some(message.to_string());
        }
    }

    /// The next pull of `dir` will move HEAD.
    pub fn push_upstream(&self, dir: &Path) {
        if let Some(repo) = self.state().repos.get_mut(dir) {
            repo.upstream_ahead = true;
        }
    }

    pub fn fail_clone(&self, locator: &str, message: &str) {
        self.state()
            .clone_failures
            .insert(locator.to_string(), message.to_string());
    }

    /// Clone of `locator` is killed before git creates anything.
    pub fn time_out_clone(&self, locator: &str) {
        self.state().clone_timeouts.insert(locator.to_string());
    }

    /// Clone of `locator` claims success without creating anything.
    pub fn clone_leaves_nothing(&self, locator: &str) {
        self.state().clone_noops.insert(locator.to_string());
    }

    pub fn panic_on_clone(&self, locator: &str) {
        self.state().clone_panics.insert(locator.to_string());
    }

    pub fn delay_clone(&self, locator: &str, delay: Duration) {
        self.state()
            .clone_delays
            .insert(locator.to_string(), delay);
    }

    /// Raise [`Self::cancel_flag`] once `locator` has been cloned.
    pub fn cancel_after_clone(&self, locator: &str) {
        self.state().cancel_after.insert(locator.to_string());
    }

    pub fn cancel_flag(&self) -> &AtomicBool {
        &self.cancel
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clone_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Clone { .. }))
            .count()
    }

    /// Calls that could change anything on disk.
    pub fn write_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Clone { .. } | Call::Pull(_)))
            .count()
    }
}

fn timed_out(operation: &'static str) -> GitError {
    GitError::TimedOut {
        operation,
        after: Duration::from_secs(30),
    }
}

impl Vcs for FakeVcs {
    fn open_work_tree(&self, dir: &Path) -> Result<(), GitError> {
        let mut state = self.state();
        state.calls.push(Call::OpenWorkTree(dir.to_path_buf()));
        if state.repos.contains_key(dir) {
            Ok(())
        } else {
            Err(GitError::NotFound(dir.display().to_string()))
        }
    }

    fn status_porcelain(&self, dir: &Path) -> Result<Vec<StatusEntry>, GitError> {
        let mut state = self.state();
        state.calls.push(Call::Status(dir.to_path_buf()));
        match state.repos.get(dir) {
            Some(repo) if repo.status_times_out => Err(timed_out("status")),
            Some(repo) if repo.status_fails => {
                Err(GitError::StatusError("index file corrupt".to_string()))
            }
            Some(repo) => Ok(repo
                .dirty
                .iter()
                .map(|path| StatusEntry {
                    code: " M".to_string(),
                    path: path.clone(),
                })
                .collect()),
            None => Err(GitError::NotFound(dir.display().to_string())),
        }
    }

    fn clone_full(&self, locator: &str, dest: &Path) -> Result<(), GitError> {
        let (delay, panics, noop, failure, timeout, cancel_after) = {
            let mut state = self.state();
            state.calls.push(Call::Clone {
                locator: locator.to_string(),
                dest: dest.to_path_buf(),
            });
            (
                state.clone_delays.get(locator).copied(),
                state.clone_panics.contains(locator),
                state.clone_noops.contains(locator),
                state.clone_failures.get(locator).cloned(),
                state.clone_timeouts.contains(locator),
                state.cancel_after.contains(locator),
            )
        };

        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if panics {
            panic!("simulated panic while cloning {}", locator);
        }
        if let Some(message) = failure {
            return Err(GitError::CloneError(message));
        }
        if timeout {
            return Err(timed_out("clone"));
        }
        if !noop {
            self.add_clean(dest);
        }
        if cancel_after {
            self.cancel.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn pull_fast_forward(&self, dir: &Path) -> Result<bool, GitError> {
        let mut state = self.state();
        state.calls.push(Call::Pull(dir.to_path_buf()));
        match state.repos.get_mut(dir) {
            Some(repo) => {
                if repo.pull_times_out {
                    return Err(timed_out("pull"));
                }
                if let Some(message) = &repo.pull_error {
                    return Err(GitError::PullError(message.clone()));
                }
                Ok(std::mem::take(&mut repo.upstream_ahead))
            }
            None => Err(GitError::NotFound(dir.display().to_string())),
        }
    }
}

/// Reporter that keeps a compact trace of the events it saw.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    pub events: Vec<String>,
}

impl Reporter for RecordingReporter {
    fn run_started(&mut self, _backup_root: &Path, repo_count: usize) {
        self.events.push(format!("start {}", repo_count));
    }

    fn outcome(&mut self, record: &OutcomeRecord) {
        let kind = serde_json::to_value(record.action)
            .ok()
            .and_then(|v| v["kind"].as_str().map(str::to_string))
            .unwrap_or_default();
        self.events.push(format!("{} {}", record.label(), kind));
    }

    fn run_finished(&mut self, summary: &RunSummary) {
        self.events.push(format!("finish {}", summary.records.len()));
    }
}
