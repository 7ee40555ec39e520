//! Recorded result of one (experiment, iteration) execution.

use serde::{Deserialize, Serialize};

use crate::experiment::Metrics;

/// The terminal state of a single run.
///
/// A pair that was never run has no `Outcome` at all: absence from the
/// [`ResultCache`](crate::cache::ResultCache) is the "not yet attempted" state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "lowercase")]
pub enum Outcome {
    /// The run completed and its log was parsed into metrics.
    Done(Metrics),
    /// The run exceeded the bound (in seconds) and was killed.
    Timeout(f64),
    /// The run failed: non-zero exit, unparseable output, or launch failure.
    Error(String),
}

impl Outcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Outcome::Timeout(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error(_))
    }

    /// `true` for timeouts recorded with a bound strictly below `current`.
    ///
    /// Equal bounds are not retried, otherwise an unchanged setting would
    /// re-queue the same run forever.
    pub fn deserves_rerun(&self, current: f64) -> bool {
        match self {
            Outcome::Timeout(bound) => *bound < current,
            _ => false,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Done(_) => write!(f, "done"),
            Outcome::Timeout(bound) => write!(f, "timeout ({bound} s)"),
            Outcome::Error(e) => write!(f, "error ({e})"),
        }
    }
}
