//! One backup run: resolve every locator, reconcile each mirror, report.

mod coordinator;
mod engine;
mod outcome;
mod pacing;
mod report;

pub use coordinator::{Coordinator, RunError, RunOptions};
pub use engine::{Engine, NameClaims};
pub use outcome::{Action, ActionCounts, FailureKind, OutcomeRecord, RunSummary};
pub use pacing::{MAX_BASE_DELAY, Pacing, Throttle, sleep_unless_cancelled};
pub use report::{LogReporter, Reporter, describe, write_json_report};
