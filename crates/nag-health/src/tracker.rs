//! Failure streak bookkeeping for a single target.

use std::time::{Duration, SystemTime};

use nag_core::{CheckResult, Outcome};

/// Streak before and after recording one result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub previous: u32,
    pub current: u32,
}

impl Transition {
    /// A healthy result ended a failure streak.
    pub fn recovered(&self) -> bool {
        self.previous > 0 && self.current == 0
    }
}

/// Tracks consecutive probe results for a single target.
///
/// Owned by exactly one scheduler; never shared.
#[derive(Debug, Default)]
pub struct StreakTracker {
    consecutive_failures: u32,
    last_outcome: Option<Outcome>,
    last_duration: Option<Duration>,
    last_checked: Option<SystemTime>,
}

impl StreakTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset on a healthy outcome, add exactly one otherwise.
    pub fn record(&mut self, result: &CheckResult) -> Transition {
        let previous = self.consecutive_failures;
        self.consecutive_failures = if result.outcome.is_healthy() {
            0
        } else {
            previous.saturating_add(1)
        };
        self.last_outcome = Some(result.outcome.clone());
        self.last_duration = Some(result.elapsed);
        self.last_checked = Some(result.checked_at);

        Transition {
            previous,
            current: self.consecutive_failures,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_outcome(&self) -> Option<&Outcome> {
        self.last_outcome.as_ref()
    }

    pub fn last_duration(&self) -> Option<Duration> {
        self.last_duration
    }

    pub fn last_checked(&self) -> Option<SystemTime> {
        self.last_checked
    }
}
