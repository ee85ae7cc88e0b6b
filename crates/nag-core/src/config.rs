//! nag.toml configuration parser.
//!
//! The raw [`MonitorConfig`] mirrors the file. [`MonitorConfig::resolve`]
//! validates it and merges the global defaults into one immutable
//! [`TargetSettings`] per target, producing a [`ResolvedConfig`] snapshot
//! that the supervisor hands to its schedulers. A reload builds a fresh
//! snapshot; nothing is mutated in place.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::types::Urgency;

pub const DEFAULT_SHORT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_LONG_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_PATIENT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_FAST_RETRY_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_SUCCESS_CODE: u16 = 200;
pub const DEFAULT_JITTER_MIN: Duration = Duration::from_secs(1);
pub const DEFAULT_JITTER_MAX: Duration = Duration::from_secs(2);
pub const DEFAULT_PERSISTENT_AFTER: u32 = 2;
/// Largest accepted probe budget. Transports must give up strictly later.
pub const MAX_PATIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Channel that needs no `[channels]` entry.
pub const BUILTIN_LOG_CHANNEL: &str = "log";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub monitor_name: Option<String>,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub tiers: Vec<TierConfig>,
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelConfig>,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    pub short_timeout: Option<String>,
    pub long_timeout: Option<String>,
    pub patient_timeout: Option<String>,
    pub poll_interval: Option<String>,
    pub fast_retry_delay: Option<String>,
    pub success_code: Option<u16>,
    pub startup_jitter_min: Option<String>,
    pub startup_jitter_max: Option<String>,
    pub max_in_flight: Option<usize>,
    pub persistent_after: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    pub channel: String,
    pub threshold: u32,
    pub urgency: Option<Urgency>,
    pub repeat: Option<bool>,
}

/// Delivery channel declaration. Transports beyond these live outside the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelConfig {
    /// Write the alert to the log.
    Log {
        #[serde(default)]
        recipients: Vec<String>,
    },
    /// POST the alert as JSON to a gateway.
    Webhook {
        url: String,
        #[serde(default)]
        recipients: Vec<String>,
    },
}

impl ChannelConfig {
    pub fn recipients(&self) -> &[String] {
        match self {
            ChannelConfig::Log { recipients } | ChannelConfig::Webhook { recipients, .. } => {
                recipients
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub url: String,
    pub short_timeout: Option<String>,
    pub long_timeout: Option<String>,
    pub patient_timeout: Option<String>,
    pub interval: Option<String>,
    pub success_code: Option<u16>,
}

// ── Resolved snapshot ──────────────────────────────────────────────

/// Probe timeout budgets, widening as confidence in a transient failure drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutLadder {
    pub short: Duration,
    pub long: Duration,
    pub patient: Duration,
}

/// Fully merged, immutable settings for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSettings {
    pub name: String,
    pub address: String,
    pub success_code: u16,
    pub timeouts: TimeoutLadder,
    pub poll_interval: Duration,
    pub fast_retry_delay: Duration,
    /// Streak above which the retry delay grows with the streak.
    pub persistent_after: u32,
}

/// One row of the escalation table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierSpec {
    pub channel: String,
    pub threshold: u32,
    pub urgency: Urgency,
    /// Fire on every cycle at or above the threshold, not only on crossing it.
    pub repeat: bool,
}

impl TierSpec {
    pub fn new(channel: &str, threshold: u32, urgency: Urgency) -> Self {
        Self {
            channel: channel.to_string(),
            threshold,
            urgency,
            repeat: true,
        }
    }

    /// The default two-step escalation: mail at 2 failures, text at 3.
    pub fn default_table() -> Vec<TierSpec> {
        vec![
            TierSpec::new("email", 2, Urgency::Low),
            TierSpec::new("sms", 3, Urgency::High),
        ]
    }
}

/// Validated configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub monitor_name: String,
    pub targets: Vec<TargetSettings>,
    /// Sorted by threshold.
    pub tiers: Vec<TierSpec>,
    pub channels: BTreeMap<String, ChannelConfig>,
    pub startup_jitter: (Duration, Duration),
    /// Zero means unbounded.
    pub max_in_flight: usize,
}

impl ResolvedConfig {
    pub fn target(&self, name: &str) -> Option<&TargetSettings> {
        self.targets.iter().find(|t| t.name == name)
    }
}

impl MonitorConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read, parse and resolve in one go.
    pub fn load(path: &Path) -> ConfigResult<ResolvedConfig> {
        Self::from_file(path)?.resolve()
    }

    /// Validate the file and merge defaults into per-target settings.
    pub fn resolve(&self) -> ConfigResult<ResolvedConfig> {
        if self.targets.is_empty() {
            return Err(ConfigError::Invalid("no targets configured".to_string()));
        }

        let d = &self.defaults;
        let default_timeouts = TimeoutLadder {
            short: opt_duration("defaults.short_timeout", &d.short_timeout)?
                .unwrap_or(DEFAULT_SHORT_TIMEOUT),
            long: opt_duration("defaults.long_timeout", &d.long_timeout)?
                .unwrap_or(DEFAULT_LONG_TIMEOUT),
            patient: opt_duration("defaults.patient_timeout", &d.patient_timeout)?
                .unwrap_or(DEFAULT_PATIENT_TIMEOUT),
        };
        let poll_interval = opt_duration("defaults.poll_interval", &d.poll_interval)?
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        let fast_retry_delay = opt_duration("defaults.fast_retry_delay", &d.fast_retry_delay)?
            .unwrap_or(DEFAULT_FAST_RETRY_DELAY);
        let jitter_min = opt_duration("defaults.startup_jitter_min", &d.startup_jitter_min)?
            .unwrap_or(DEFAULT_JITTER_MIN);
        let jitter_max = opt_duration("defaults.startup_jitter_max", &d.startup_jitter_max)?
            .unwrap_or(DEFAULT_JITTER_MAX);
        if jitter_min > jitter_max {
            return Err(ConfigError::Invalid(
                "startup_jitter_min exceeds startup_jitter_max".to_string(),
            ));
        }
        let success_code = d.success_code.unwrap_or(DEFAULT_SUCCESS_CODE);
        let persistent_after = d.persistent_after.unwrap_or(DEFAULT_PERSISTENT_AFTER);

        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(self.targets.len());
        for t in &self.targets {
            if !seen.insert(t.name.as_str()) {
                return Err(ConfigError::DuplicateTarget(t.name.clone()));
            }
            let field = |f: &str| format!("targets.{}.{f}", t.name);
            let settings = TargetSettings {
                name: t.name.clone(),
                address: t.url.clone(),
                success_code: t.success_code.unwrap_or(success_code),
                timeouts: TimeoutLadder {
                    short: opt_duration(&field("short_timeout"), &t.short_timeout)?
                        .unwrap_or(default_timeouts.short),
                    long: opt_duration(&field("long_timeout"), &t.long_timeout)?
                        .unwrap_or(default_timeouts.long),
                    patient: opt_duration(&field("patient_timeout"), &t.patient_timeout)?
                        .unwrap_or(default_timeouts.patient),
                },
                poll_interval: opt_duration(&field("interval"), &t.interval)?
                    .unwrap_or(poll_interval),
                fast_retry_delay,
                persistent_after,
            };
            validate_target(&settings)?;
            targets.push(settings);
        }

        let mut tiers = if self.tiers.is_empty() {
            TierSpec::default_table()
        } else {
            self.tiers
                .iter()
                .map(|t| TierSpec {
                    channel: t.channel.clone(),
                    threshold: t.threshold,
                    urgency: t.urgency.unwrap_or_default(),
                    repeat: t.repeat.unwrap_or(true),
                })
                .collect()
        };
        tiers.sort_by_key(|t| t.threshold);

        for (name, channel) in &self.channels {
            validate_channel(name, channel)?;
        }

        let mut channels = self.channels.clone();
        for tier in &tiers {
            if tier.threshold == 0 {
                return Err(ConfigError::Invalid(format!(
                    "tier {} has threshold 0; healthy targets never notify",
                    tier.channel
                )));
            }
            if !channels.contains_key(&tier.channel) {
                if tier.channel == BUILTIN_LOG_CHANNEL || self.tiers.is_empty() {
                    // Built-in and default-table channels fall back to the log.
                    channels.insert(
                        tier.channel.clone(),
                        ChannelConfig::Log {
                            recipients: Vec::new(),
                        },
                    );
                } else {
                    return Err(ConfigError::UnknownChannel(tier.channel.clone()));
                }
            }
        }

        Ok(ResolvedConfig {
            monitor_name: self
                .monitor_name
                .clone()
                .unwrap_or_else(|| format!("nag@{}", local_hostname())),
            targets,
            tiers,
            channels,
            startup_jitter: (jitter_min, jitter_max),
            max_in_flight: d.max_in_flight.unwrap_or(0),
        })
    }
}

fn validate_target(t: &TargetSettings) -> ConfigResult<()> {
    let ladder = &t.timeouts;
    if ladder.short.is_zero() || t.poll_interval.is_zero() {
        return Err(ConfigError::Invalid(format!(
            "target {}: timeouts and interval must be non-zero",
            t.name
        )));
    }
    if ladder.short > ladder.long || ladder.long > ladder.patient {
        return Err(ConfigError::Invalid(format!(
            "target {}: expected short <= long <= patient timeout",
            t.name
        )));
    }
    if ladder.patient > MAX_PATIENT_TIMEOUT {
        return Err(ConfigError::Invalid(format!(
            "target {}: patient timeout {:?} exceeds the {:?} ceiling",
            t.name, ladder.patient, MAX_PATIENT_TIMEOUT
        )));
    }
    Ok(())
}

/// Webhooks are posted over plain HTTP only.
fn validate_channel(name: &str, channel: &ChannelConfig) -> ConfigResult<()> {
    if let ChannelConfig::Webhook { url, .. } = channel {
        let host = url
            .strip_prefix("http://")
            .map(|rest| rest.split(['/', '?']).next().unwrap_or_default());
        if host.is_none_or(str::is_empty) {
            return Err(ConfigError::Invalid(format!(
                "channel {name}: webhook url {url:?} must be http://host[:port]/path"
            )));
        }
    }
    Ok(())
}

/// Host name for the default monitor name; "localhost" when unknown.
fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/proc/sys/kernel/hostname").ok())
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

fn opt_duration(field: &str, value: &Option<String>) -> ConfigResult<Option<Duration>> {
    value
        .as_deref()
        .map(|v| {
            parse_duration(v).ok_or_else(|| ConfigError::InvalidDuration {
                field: field.to_string(),
                value: v.to_string(),
            })
        })
        .transpose()
}

/// Parse a duration string like "5s", "500ms", "2m" or a bare number of seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
monitor_name = "nag@test"

[defaults]
short_timeout = "2s"
long_timeout = "10s"
patient_timeout = "30s"
poll_interval = "1m"
fast_retry_delay = "5s"

[[tiers]]
channel = "sms"
threshold = 3
urgency = "high"

[[tiers]]
channel = "email"
threshold = 2

[[tiers]]
channel = "push"
threshold = 2
urgency = "high"
repeat = false

[channels.email]
kind = "webhook"
url = "http://127.0.0.1:9000/mail"
recipients = ["ops@example.com"]

[channels.sms]
kind = "log"

[channels.push]
kind = "log"

[[targets]]
name = "api"
url = "http://api.internal:8080/healthz"
short_timeout = "1s"
interval = "30s"
success_code = 204

[[targets]]
name = "web"
url = "http://web.internal/"
"#;

    #[test]
    fn parse_and_resolve_sample() {
        let resolved = MonitorConfig::from_toml_str(SAMPLE)
            .unwrap()
            .resolve()
            .unwrap();

        assert_eq!(resolved.monitor_name, "nag@test");
        assert_eq!(resolved.targets.len(), 2);

        let api = resolved.target("api").unwrap();
        assert_eq!(api.success_code, 204);
        assert_eq!(api.timeouts.short, Duration::from_secs(1));
        assert_eq!(api.timeouts.long, Duration::from_secs(10));
        assert_eq!(api.poll_interval, Duration::from_secs(30));

        let web = resolved.target("web").unwrap();
        assert_eq!(web.success_code, DEFAULT_SUCCESS_CODE);
        assert_eq!(web.timeouts.short, Duration::from_secs(2));
        assert_eq!(web.poll_interval, Duration::from_secs(60));
        assert_eq!(web.fast_retry_delay, Duration::from_secs(5));
    }

    #[test]
    fn tiers_sorted_by_threshold_stably() {
        let resolved = MonitorConfig::from_toml_str(SAMPLE)
            .unwrap()
            .resolve()
            .unwrap();
        let order: Vec<_> = resolved.tiers.iter().map(|t| t.channel.as_str()).collect();
        assert_eq!(order, ["email", "push", "sms"]);
        assert!(!resolved.tiers[1].repeat);
        assert_eq!(resolved.tiers[2].urgency, Urgency::High);
        assert_eq!(resolved.tiers[0].threshold, 2);
    }

    #[test]
    fn default_tier_table_when_omitted() {
        let cfg = r#"
[[targets]]
name = "a"
url = "http://a/"
"#;
        let resolved = MonitorConfig::from_toml_str(cfg).unwrap().resolve().unwrap();
        assert_eq!(resolved.tiers, TierSpec::default_table());
        assert!(resolved.channels.contains_key("email"));
        assert!(resolved.channels.contains_key("sms"));
        assert_eq!(resolved.startup_jitter, (DEFAULT_JITTER_MIN, DEFAULT_JITTER_MAX));
        assert_eq!(resolved.max_in_flight, 0);
    }

    #[test]
    fn rejects_duplicate_target() {
        let cfg = r#"
[[targets]]
name = "a"
url = "http://a/"

[[targets]]
name = "a"
url = "http://b/"
"#;
        let err = MonitorConfig::from_toml_str(cfg).unwrap().resolve().unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateTarget(name) if name == "a"));
    }

    #[test]
    fn rejects_undeclared_channel() {
        let cfg = r#"
[[tiers]]
channel = "pager"
threshold = 2

[[targets]]
name = "a"
url = "http://a/"
"#;
        let err = MonitorConfig::from_toml_str(cfg).unwrap().resolve().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownChannel(c) if c == "pager"));
    }

    #[test]
    fn builtin_log_channel_needs_no_declaration() {
        let cfg = r#"
[[tiers]]
channel = "log"
threshold = 1

[[targets]]
name = "a"
url = "http://a/"
"#;
        let resolved = MonitorConfig::from_toml_str(cfg).unwrap().resolve().unwrap();
        assert!(resolved.channels.contains_key("log"));
    }

    #[test]
    fn rejects_shrinking_timeout_ladder() {
        let cfg = r#"
[[targets]]
name = "a"
url = "http://a/"
short_timeout = "20s"
long_timeout = "10s"
"#;
        let err = MonitorConfig::from_toml_str(cfg).unwrap().resolve().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_bad_duration() {
        let cfg = r#"
[defaults]
poll_interval = "soon"

[[targets]]
name = "a"
url = "http://a/"
"#;
        let err = MonitorConfig::from_toml_str(cfg).unwrap().resolve().unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidDuration { field, .. } if field == "defaults.poll_interval")
        );
    }

    #[test]
    fn rejects_empty_target_list() {
        let err = MonitorConfig::from_toml_str("").unwrap().resolve().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("ten"), None);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nag.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let resolved = MonitorConfig::load(&path).unwrap();
        assert_eq!(resolved.targets.len(), 2);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = MonitorConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn huge_minute_count_is_rejected_not_overflowed() {
        assert_eq!(parse_duration("999999999999999999m"), None);

        let cfg = r#"
[defaults]
poll_interval = "999999999999999999m"

[[targets]]
name = "a"
url = "http://a/"
"#;
        let err = MonitorConfig::from_toml_str(cfg).unwrap().resolve().unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidDuration { field, value }
                if field == "defaults.poll_interval" && value == "999999999999999999m")
        );
    }

    #[test]
    fn rejects_non_http_webhook_url() {
        let cfg = r#"
[[tiers]]
channel = "email"
threshold = 2

[channels.email]
kind = "webhook"
url = "https://relay.example.com/mail"

[[targets]]
name = "a"
url = "http://a/"
"#;
        let err = MonitorConfig::from_toml_str(cfg).unwrap().resolve().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("channel email")));
    }

    #[test]
    fn rejects_webhook_url_without_host() {
        let cfg = r#"
[channels.email]
kind = "webhook"
url = "http:///mail"

[[targets]]
name = "a"
url = "http://a/"
"#;
        let err = MonitorConfig::from_toml_str(cfg).unwrap().resolve().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_patient_timeout_above_ceiling() {
        let cfg = r#"
[[targets]]
name = "a"
url = "http://a/"
patient_timeout = "45s"
"#;
        let err = MonitorConfig::from_toml_str(cfg).unwrap().resolve().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("ceiling")));
    }

    #[test]
    fn monitor_name_defaults_to_host() {
        let cfg = r#"
[[targets]]
name = "a"
url = "http://a/"
"#;
        let resolved = MonitorConfig::from_toml_str(cfg).unwrap().resolve().unwrap();
        let host = resolved.monitor_name.strip_prefix("nag@").unwrap();
        assert!(!host.is_empty());
    }
}
