//! Escalation policy — a pure function of the failure streak.
//!
//! For a given streak and target the policy answers three questions:
//! how long the next probe may take, how long to wait before it, and
//! which notification tiers fire this cycle. It holds no state beyond the
//! tier table, so evaluating the same streak twice always gives the same
//! [`EscalationDecision`].

use std::time::Duration;

use nag_core::{TargetSettings, TierSpec};

/// What to do after one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationDecision {
    /// Budget for the next probe.
    pub timeout: Duration,
    /// Delay before the next probe.
    pub delay: Duration,
    /// Tiers to fire now, in table order.
    pub tiers: Vec<TierSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationPolicy {
    tiers: Vec<TierSpec>,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self::new(TierSpec::default_table())
    }
}

impl EscalationPolicy {
    pub fn new(mut tiers: Vec<TierSpec>) -> Self {
        tiers.sort_by_key(|t| t.threshold);
        Self { tiers }
    }

    pub fn tiers(&self) -> &[TierSpec] {
        &self.tiers
    }

    /// Lowest threshold in the table; `u32::MAX` when nothing ever fires.
    pub fn first_threshold(&self) -> u32 {
        self.tiers.first().map_or(u32::MAX, |t| t.threshold)
    }

    /// Short on a clean record, long after one failure, patient after that.
    pub fn timeout_budget(streak: u32, target: &TargetSettings) -> Duration {
        match streak {
            0 => target.timeouts.short,
            1 => target.timeouts.long,
            _ => target.timeouts.patient,
        }
    }

    /// Normal interval when healthy, fast retries while the failure may be
    /// transient, then a delay growing with the streak.
    pub fn next_delay(streak: u32, target: &TargetSettings) -> Duration {
        if streak == 0 {
            target.poll_interval
        } else if streak <= target.persistent_after {
            target.fast_retry_delay.saturating_mul(streak)
        } else {
            target.poll_interval.saturating_mul(streak)
        }
    }

    /// Tiers that fire at `streak`.
    ///
    /// Repeating tiers fire on every cycle at or above their threshold;
    /// one-shot tiers only on the cycle the threshold is reached.
    pub fn tiers_for(&self, streak: u32) -> Vec<TierSpec> {
        self.tiers
            .iter()
            .filter(|t| {
                if t.repeat {
                    streak >= t.threshold
                } else {
                    streak == t.threshold
                }
            })
            .cloned()
            .collect()
    }

    pub fn decide(&self, streak: u32, target: &TargetSettings) -> EscalationDecision {
        EscalationDecision {
            timeout: Self::timeout_budget(streak, target),
            delay: Self::next_delay(streak, target),
            tiers: self.tiers_for(streak),
        }
    }
}
