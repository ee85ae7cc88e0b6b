//! Domain types shared by the prober, the scheduler and the notifiers.

use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Stable identifier of a monitored target.
pub type TargetName = String;

// ── Probe outcome ──────────────────────────────────────────────────

/// Classified result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// The target answered with its configured success code.
    Ok { status: u16 },
    /// The target answered, but not with the success code.
    HttpError { status: u16 },
    /// DNS, connect, handshake or reset failure.
    NetworkError { classifier: String },
    /// The timeout budget elapsed before the target answered.
    TimedOut,
}

impl Outcome {
    /// Classify an HTTP status against the target's success code.
    pub fn from_status(status: u16, success_code: u16) -> Self {
        if status == success_code {
            Outcome::Ok { status }
        } else {
            Outcome::HttpError { status }
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, Outcome::Ok { .. })
    }
}

impl fmt::Display for Outcome {
    /// Short classifier as it appears in logs and alerts: the status code
    /// for answered probes, the error classifier otherwise.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Ok { status } | Outcome::HttpError { status } => write!(f, "{status}"),
            Outcome::NetworkError { classifier } => f.write_str(classifier),
            Outcome::TimedOut => f.write_str("timeout"),
        }
    }
}

/// Immutable outcome of one probe, consumed once by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub target: TargetName,
    pub outcome: Outcome,
    /// Measured time to answer, or the timeout budget when the probe timed out.
    pub elapsed: Duration,
    pub checked_at: SystemTime,
}

impl CheckResult {
    pub fn new(target: impl Into<TargetName>, outcome: Outcome, elapsed: Duration) -> Self {
        Self {
            target: target.into(),
            outcome,
            elapsed,
            checked_at: SystemTime::now(),
        }
    }
}

// ── Notifications ──────────────────────────────────────────────────

/// How loudly a notification tier shouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    /// Mail-like channel: long-form message.
    #[default]
    Low,
    /// Pager-like channel: one short line.
    High,
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Urgency::Low => f.write_str("low"),
            Urgency::High => f.write_str("high"),
        }
    }
}

/// Outbound alert handed to the notifier dispatch for one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationEvent {
    pub target: TargetName,
    /// Probe address, so the reader can check the target themselves.
    pub address: String,
    /// Failure streak at the time of firing.
    pub streak: u32,
    pub last_outcome: Outcome,
    pub urgency: Urgency,
    /// Name of the reporting monitor instance.
    pub monitor: String,
    /// One-line human readable summary.
    pub summary: String,
    pub fired_at: SystemTime,
}

// ── Status board ───────────────────────────────────────────────────

/// Red/amber/green classification of one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    /// Not checked yet.
    Unknown,
    /// Last check succeeded.
    Green,
    /// Failing, but below the first notification threshold.
    Amber,
    /// Failing at or above the first notification threshold.
    Red,
}

impl Health {
    pub fn from_streak(streak: u32, first_threshold: u32) -> Self {
        if streak == 0 {
            Health::Green
        } else if streak < first_threshold {
            Health::Amber
        } else {
            Health::Red
        }
    }
}

/// Latest published state of a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetStatus {
    pub name: TargetName,
    pub address: String,
    pub streak: u32,
    pub health: Health,
    pub last_outcome: Option<Outcome>,
    pub last_duration: Option<Duration>,
    pub last_checked: Option<SystemTime>,
}

impl TargetStatus {
    /// Status of a target that has not been probed yet.
    pub fn unknown(name: impl Into<TargetName>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            streak: 0,
            health: Health::Unknown,
            last_outcome: None,
            last_duration: None,
            last_checked: None,
        }
    }
}

/// Counts of targets per health colour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RagSummary {
    pub green: usize,
    pub amber: usize,
    pub red: usize,
    pub unknown: usize,
}

impl RagSummary {
    pub fn from_statuses<'a>(statuses: impl IntoIterator<Item = &'a TargetStatus>) -> Self {
        let mut summary = Self::default();
        for status in statuses {
            match status.health {
                Health::Green => summary.green += 1,
                Health::Amber => summary.amber += 1,
                Health::Red => summary.red += 1,
                Health::Unknown => summary.unknown += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.green + self.amber + self.red + self.unknown
    }
}
