//! Configuration loading.
//!
//! A config document is TOML or JSON, chosen by file extension:
//!
//! ```toml
//! backup_root = "~/evergit_backups"
//! repos = [
//!     "https://github.com/username/repo1.git",
//!     "git@github.com:username/repo2.git",
//! ]
//! sleep_seconds = 2.0
//! randomize_sleep = true
//! timeout_secs = 600
//! jobs = 1
//! ```
//!
//! With no config path, or a path that does not exist, a built-in fallback
//! is used. A file that exists but cannot be read or parsed is an error.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::mirror::{BackupPaths, DEFAULT_ROOT_NAME};
use crate::sync::{MAX_BASE_DELAY, Pacing, RunOptions};

const DEFAULT_SLEEP_SECONDS: f64 = 2.0;

const FALLBACK_REPOS: &[&str] = &[
    "https://github.com/username/repo1.git",
    "git@github.com:username/repo2.git",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid TOML in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Config document as written by the user. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    backup_root: Option<PathBuf>,
    repos: Vec<String>,
    sleep_seconds: Option<f64>,
    randomize_sleep: Option<bool>,
    timeout_secs: Option<u64>,
    jobs: Option<usize>,
}

/// Where the settings came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Fallback,
    File(PathBuf),
}

/// Normalized settings for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub backup_root: PathBuf,
    pub repos: Vec<String>,
    pub sleep_seconds: f64,
    pub randomize_sleep: bool,
    /// Per git subprocess; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    pub jobs: usize,
    pub source: ConfigSource,
}

/// Command-line overrides, applied on top of the loaded settings.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub backup_root: Option<PathBuf>,
    pub sleep_seconds: Option<f64>,
    pub non_random_sleep: bool,
    pub timeout_secs: Option<u64>,
    pub jobs: Option<usize>,
}

impl Settings {
    pub fn apply(&mut self, overrides: &Overrides) -> Result<(), ConfigError> {
        if let Some(root) = &overrides.backup_root {
            self.backup_root = expand_home(root);
        }
        if let Some(seconds) = overrides.sleep_seconds {
            self.sleep_seconds = seconds;
        }
        if overrides.non_random_sleep {
            self.randomize_sleep = false;
        }
        if let Some(secs) = overrides.timeout_secs {
            self.timeout = timeout_from_secs(secs);
        }
        if let Some(jobs) = overrides.jobs {
            self.jobs = jobs;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.sleep_seconds.is_finite() || self.sleep_seconds < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "sleep_seconds must be a non-negative number, got {}",
                self.sleep_seconds
            )));
        }
        if self.sleep_seconds > MAX_BASE_DELAY.as_secs_f64() {
            return Err(ConfigError::Invalid(format!(
                "sleep_seconds must be at most {}, got {}",
                MAX_BASE_DELAY.as_secs(),
                self.sleep_seconds
            )));
        }
        if self.jobs == 0 {
            return Err(ConfigError::Invalid("jobs must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn pacing(&self) -> Pacing {
        Pacing::from_seconds(self.sleep_seconds, self.randomize_sleep)
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            pacing: self.pacing(),
            jobs: self.jobs,
        }
    }

    pub fn backup_paths(&self) -> BackupPaths {
        BackupPaths::new(&self.backup_root)
    }
}

/// Built-in example configuration.
pub fn fallback() -> Settings {
    Settings {
        backup_root: BackupPaths::default().root().to_path_buf(),
        repos: FALLBACK_REPOS.iter().map(|s| s.to_string()).collect(),
        sleep_seconds: DEFAULT_SLEEP_SECONDS,
        randomize_sleep: true,
        timeout: None,
        jobs: 1,
        source: ConfigSource::Fallback,
    }
}

/// Load settings from `path`, falling back when there is nothing to load.
pub fn load(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let Some(path) = path else {
        log::info!("No config file specified; using built-in fallback configuration");
        return Ok(fallback());
    };

    if !path.exists() {
        log::warn!(
            "Config file {} not found; using built-in fallback configuration",
            path.display()
        );
        return Ok(fallback());
    }

    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = parse(path, &contents)?;
    let settings = normalize(raw, path)?;
    log::info!(
        "Loaded configuration from {} ({} repositories)",
        path.display(),
        settings.repos.len()
    );
    Ok(settings)
}

fn parse(path: &Path, contents: &str) -> Result<RawConfig, ConfigError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "toml" => toml::from_str(contents).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        }),
        "json" => parse_json(path, contents),
        other => {
            log::warn!(
                "Unsupported config format {:?} for {}; trying JSON",
                other,
                path.display()
            );
            parse_json(path, contents)
        }
    }
}

fn parse_json(path: &Path, contents: &str) -> Result<RawConfig, ConfigError> {
    serde_json::from_str(contents).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn normalize(raw: RawConfig, path: &Path) -> Result<Settings, ConfigError> {
    let backup_root = match raw.backup_root {
        Some(root) => expand_home(&root),
        None => std::env::current_dir()
            .map_err(|source| ConfigError::Read {
                path: PathBuf::from("."),
                source,
            })?
            .join(DEFAULT_ROOT_NAME),
    };

    let settings = Settings {
        backup_root,
        repos: raw.repos,
        sleep_seconds: raw.sleep_seconds.unwrap_or(DEFAULT_SLEEP_SECONDS),
        randomize_sleep: raw.randomize_sleep.unwrap_or(true),
        timeout: raw.timeout_secs.and_then(timeout_from_secs),
        jobs: raw.jobs.unwrap_or(1),
        source: ConfigSource::File(path.to_path_buf()),
    };
    settings.validate()?;
    Ok(settings)
}

/// Zero means no timeout.
fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then_some(Duration::from_secs(secs))
}

/// Expand a leading `~` to the home directory.
fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}
