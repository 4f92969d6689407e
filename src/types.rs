//! Repository identifiers: remote locators and the `owner/repo` short names
//! derived from them.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// URL schemes accepted in URL-style locators.
const SUPPORTED_SCHEMES: &[&str] = &["https", "http", "ssh", "git", "file"];

/// Error type for locator and name parsing failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("value cannot be empty")]
    Empty,
    #[error("invalid character in value: {0:?}")]
    InvalidCharacter(char),
    #[error("value cannot start with '{0}'")]
    InvalidStart(char),
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("not a recognized remote locator (expected scp-style or URL form)")]
    UnrecognizedForm,
    #[error("locator has no repository path")]
    MissingPath,
    #[error("locator has no owner segment before the repository name")]
    MissingOwner,
    #[error("missing separator '/' in short name")]
    MissingSeparator,
    #[error("invalid owner: {0}")]
    InvalidOwner(#[source] Box<ParseError>),
    #[error("invalid repo: {0}")]
    InvalidRepo(#[source] Box<ParseError>),
}

/// Shared validation for a single path segment of a short name.
///
/// Segments become directory names under the backup root, so they must not
/// be able to climb out of it or be mistaken for a command-line flag.
fn validate_segment(s: &str) -> Result<(), ParseError> {
    if s.is_empty() {
        return Err(ParseError::Empty);
    }

    if s.starts_with('.') {
        return Err(ParseError::InvalidStart('.'));
    }

    if s.starts_with('-') {
        return Err(ParseError::InvalidStart('-'));
    }

    for c in s.chars() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != '.' {
            return Err(ParseError::InvalidCharacter(c));
        }
    }

    Ok(())
}

/// A repository owner (user, organization or group)
///
/// Validation rules:
/// - Non-empty
/// - Alphanumeric characters, hyphens, underscores, and dots only
/// - Cannot start with a dot or a hyphen
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Owner(String);

impl Owner {
    /// Returns the owner name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Owner {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_segment(s)?;
        Ok(Owner(s.to_string()))
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A repository name, without any `.git` suffix
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Repo(String);

impl Repo {
    /// Returns the repository name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Repo {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_segment(s)?;
        Ok(Repo(s.to_string()))
    }
}

impl fmt::Display for Repo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical short name of a repository (`owner/repo`).
///
/// Doubles as the relative path of the mirror under the backup root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoKey {
    pub owner: Owner,
    pub repo: Repo,
}

impl RepoKey {
    /// Creates a new RepoKey from owner and repo
    pub fn new(owner: Owner, repo: Repo) -> Self {
        Self { owner, repo }
    }

    /// Relative directory of this repository under the backup root.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(self.owner.as_str()).join(self.repo.as_str())
    }

    /// Key used to detect two references landing in the same directory.
    ///
    /// Folded to lowercase so that `Owner/Repo` and `owner/repo` collide
    /// on case-insensitive filesystems too.
    pub fn collision_key(&self) -> String {
        format!("{}/{}", self.owner, self.repo).to_ascii_lowercase()
    }
}

impl FromStr for RepoKey {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (owner_str, repo_str) = s.split_once('/').ok_or(ParseError::MissingSeparator)?;

        let owner = owner_str
            .parse::<Owner>()
            .map_err(|e| ParseError::InvalidOwner(Box::new(e)))?;
        let repo = repo_str
            .parse::<Repo>()
            .map_err(|e| ParseError::InvalidRepo(Box::new(e)))?;

        Ok(RepoKey { owner, repo })
    }
}

impl fmt::Display for RepoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

impl Serialize for RepoKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A parsed remote locator together with its derived short name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryReference {
    locator: String,
    key: RepoKey,
}

impl RepositoryReference {
    /// Parse a locator such as `git@host:owner/repo.git` or
    /// `https://host/owner/repo.git`.
    pub fn resolve(locator: &str) -> Result<Self, ParseError> {
        let locator = locator.trim();
        if locator.is_empty() {
            return Err(ParseError::Empty);
        }
        // Passed to git as an argument; never let it read as an option.
        if locator.starts_with('-') {
            return Err(ParseError::InvalidStart('-'));
        }
        if let Some(c) = locator.chars().find(|c| c.is_control()) {
            return Err(ParseError::InvalidCharacter(c));
        }

        let path = locator_path(locator)?;
        let key = short_name_from_path(path)?;

        Ok(Self {
            locator: locator.to_string(),
            key,
        })
    }

    /// The locator exactly as handed to git.
    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// The `owner/repo` short name.
    pub fn key(&self) -> &RepoKey {
        &self.key
    }
}

impl FromStr for RepositoryReference {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::resolve(s)
    }
}

impl fmt::Display for RepositoryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.locator)
    }
}

/// Extract the path part of a locator.
fn locator_path(locator: &str) -> Result<&str, ParseError> {
    if let Some((scheme, rest)) = locator.split_once("://") {
        let scheme = scheme.to_ascii_lowercase();
        if !SUPPORTED_SCHEMES.contains(&scheme.as_str()) {
            return Err(ParseError::UnsupportedScheme(scheme));
        }
        // `rest` is `[user@]host[:port]/path`; `file:///path` has an empty host.
        let (_authority, path) = rest.split_once('/').ok_or(ParseError::MissingPath)?;
        return Ok(path);
    }

    // scp-style: `[user@]host:path`, where the host part has no slash.
    match locator.split_once(':') {
        Some((host, path)) if !host.is_empty() && !host.contains('/') => Ok(path),
        _ => Err(ParseError::UnrecognizedForm),
    }
}

fn short_name_from_path(path: &str) -> Result<RepoKey, ParseError> {
    let trimmed = path.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);

    let mut segments = trimmed.rsplit('/').filter(|s| !s.is_empty());
    let repo_str = segments.next().ok_or(ParseError::MissingPath)?;
    let owner_str = segments.next().ok_or(ParseError::MissingOwner)?;

    let owner = owner_str
        .parse::<Owner>()
        .map_err(|e| ParseError::InvalidOwner(Box::new(e)))?;
    let repo = repo_str
        .parse::<Repo>()
        .map_err(|e| ParseError::InvalidRepo(Box::new(e)))?;

    Ok(RepoKey::new(owner, repo))
}
