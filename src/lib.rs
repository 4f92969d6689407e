//! evergit: keep full-history, non-destructive local mirrors of remote git
//! repositories.
//!
//! A run resolves each configured locator to an `owner/repo` short name,
//! inspects the mirror under the backup root, and then clones it, fast-forwards
//! it, or leaves it alone. Local work is never overwritten.

pub mod cli;
pub mod config;
pub mod logging;
pub mod mirror;
pub mod sync;
pub mod types;

#[cfg(test)]
mod test_support;
