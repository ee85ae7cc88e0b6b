//! nag-health — the per-target check and escalation engine.
//!
//! One [`TargetScheduler`] runs per configured target. Each cycle it asks
//! the [`EscalationPolicy`] for a timeout budget, races a probe against
//! that budget, folds the outcome into the failure streak, fires whatever
//! notification tiers the streak calls for and sleeps until the next
//! cycle. The [`Supervisor`] owns the schedulers: it starts them with a
//! little jitter, swaps configuration snapshots on reload and stops them
//! on shutdown.
//!
//! # Architecture
//!
//! ```text
//! Supervisor
//!   ├── Per-target background task
//!   │   └── TargetScheduler
//!   │       ├── Prober::probe() → CheckResult   (exactly once)
//!   │       ├── StreakTracker (consecutive failures)
//!   │       ├── EscalationPolicy → EscalationDecision
//!   │       └── Dispatcher::dispatch() per tier (nag-notify)
//!   ├── Shared escalation snapshot (watch, swapped on reload)
//!   └── Status board (watch per target)
//! ```
//!
//! # Exactly-once probes
//!
//! The request and the timeout both try to write the probe's
//! [`CompletionSlot`]. The first write wins; the loser is logged and
//! dropped, so a late reply can never count twice against the streak.

pub mod checker;
pub mod completion;
pub mod error;
pub mod monitor;
pub mod policy;
pub mod scheduler;
pub mod tracker;

pub use checker::{HttpTransport, Prober, RacingProber, Transport};
pub use completion::CompletionSlot;
pub use error::TransportError;
pub use monitor::{ReloadReport, Supervisor};
pub use policy::{EscalationDecision, EscalationPolicy};
pub use scheduler::{EscalationContext, Evaluation, Phase, TargetScheduler};
pub use tracker::{StreakTracker, Transition};
