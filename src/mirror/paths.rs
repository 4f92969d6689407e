//! Backup root path management
//!
//! Layout of a backup root:
//!
//! ```text
//! ~/evergit_backups/
//! ├── .evergit.lock          # flock-based run lock
//! └── <owner>/
//!     └── <repo>/            # Non-bare working copy with full history
//!         └── .git/
//! ```

use std::io;
use std::path::{Path, PathBuf};

use crate::types::RepoKey;

/// File name of the run lock inside the backup root.
const RUN_LOCK_FILE: &str = ".evergit.lock";

/// Directory name used under the home directory when nothing else is configured.
pub const DEFAULT_ROOT_NAME: &str = "evergit_backups";

/// Manages all filesystem paths under a backup root
#[derive(Debug, Clone)]
pub struct BackupPaths {
    root: PathBuf,
}

impl BackupPaths {
    /// Creates a new BackupPaths with the specified root directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the backup root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the working copy directory for a repository: `{root}/{owner}/{repo}`
    pub fn repo_dir(&self, key: &RepoKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    /// Returns the run lock path: `{root}/.evergit.lock`
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(RUN_LOCK_FILE)
    }

    /// Create the backup root (and parents) if it does not exist yet.
    pub fn ensure_root(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        if !self.root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} exists but is not a directory", self.root.display()),
            ));
        }
        Ok(())
    }
}

impl Default for BackupPaths {
    /// Creates a BackupPaths at `~/evergit_backups`
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(home.join(DEFAULT_ROOT_NAME))
    }
}
