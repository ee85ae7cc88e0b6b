//! nag-core — shared types and configuration for the nag health monitor.
//!
//! The monitor probes a set of independently configured targets and
//! escalates notifications while a target stays unhealthy. This crate
//! holds the pieces every other crate agrees on:
//!
//! - [`config`]: the TOML configuration model and its resolution into
//!   immutable per-target [`TargetSettings`] snapshots
//! - [`types`]: probe outcomes, check results, notification events and
//!   the status board records

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    ChannelConfig, MAX_PATIENT_TIMEOUT, MonitorConfig, ResolvedConfig, TargetSettings, TierSpec,
    TimeoutLadder, parse_duration,
};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
