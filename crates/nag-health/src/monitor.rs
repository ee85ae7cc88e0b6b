//! Supervisor — owns one background scheduler per configured target.
//!
//! The supervisor spawns a [`TargetScheduler`] task per target, staggering
//! their first probes with random jitter. Configuration is swapped as whole
//! snapshots: [`Supervisor::reload`] keeps the schedulers of unchanged
//! targets (and their streaks) running, stops removed ones, restarts
//! changed ones and publishes the new escalation table to everyone at once.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{RwLock, Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use nag_core::{ResolvedConfig, TargetSettings, TargetStatus};
use nag_notify::Notifier;

use crate::checker::Prober;
use crate::scheduler::{EscalationContext, TargetScheduler};

/// Per-target scheduler slot.
struct SchedulerSlot {
    settings: TargetSettings,
    /// Handle to the background scheduler task.
    handle: JoinHandle<()>,
    /// Shutdown signal for this scheduler.
    shutdown_tx: watch::Sender<bool>,
    status: watch::Receiver<TargetStatus>,
}

impl SchedulerSlot {
    async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(target_name = %self.settings.name, error = %e, "scheduler task ended abnormally");
        }
    }
}

/// Which targets a reload touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub restarted: Vec<String>,
    pub unchanged: Vec<String>,
}

pub struct Supervisor {
    prober: Arc<dyn Prober>,
    config: RwLock<Arc<ResolvedConfig>>,
    escalation: watch::Sender<Arc<EscalationContext>>,
    /// Notifiers registered in code, layered over every config snapshot.
    extra_notifiers: Vec<(String, Arc<dyn Notifier>)>,
    in_flight: Option<Arc<Semaphore>>,
    /// Active schedulers: target name → slot.
    slots: RwLock<HashMap<String, SchedulerSlot>>,
}

impl Supervisor {
    pub fn new(config: Arc<ResolvedConfig>, prober: Arc<dyn Prober>) -> Self {
        let (escalation, _) = watch::channel(Arc::new(EscalationContext::from_config(&config)));
        let in_flight =
            (config.max_in_flight > 0).then(|| Arc::new(Semaphore::new(config.max_in_flight)));
        Self {
            prober,
            config: RwLock::new(config),
            escalation,
            extra_notifiers: Vec::new(),
            in_flight,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Back `channel` with a custom notifier, overriding the configured one.
    pub fn with_notifier(mut self, channel: &str, notifier: Arc<dyn Notifier>) -> Self {
        self.extra_notifiers.push((channel.to_string(), notifier));
        let config = self.config.get_mut().clone();
        self.escalation.send_replace(Arc::new(self.context_for(&config)));
        self
    }

    fn context_for(&self, config: &ResolvedConfig) -> EscalationContext {
        let mut ctx = EscalationContext::from_config(config);
        for (channel, notifier) in &self.extra_notifiers {
            ctx.dispatcher.register(channel, Arc::clone(notifier));
        }
        ctx
    }

    /// Spawn a scheduler for every configured target not yet running.
    pub async fn start(&self) {
        let config = self.config.read().await.clone();
        let mut slots = self.slots.write().await;
        for target in &config.targets {
            if slots.contains_key(&target.name) {
                continue;
            }
            let slot = self.spawn(target.clone(), jitter(&config));
            slots.insert(target.name.clone(), slot);
        }
        info!(targets = slots.len(), "supervisor started");
    }

    fn spawn(&self, settings: TargetSettings, start_delay: Duration) -> SchedulerSlot {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut scheduler = TargetScheduler::new(
            settings.clone(),
            Arc::clone(&self.prober),
            self.escalation.subscribe(),
        );
        if let Some(limit) = &self.in_flight {
            scheduler = scheduler.with_in_flight_limit(Arc::clone(limit));
        }
        let status = scheduler.subscribe();
        let handle = tokio::spawn(scheduler.run(start_delay, shutdown_rx));

        SchedulerSlot {
            settings,
            handle,
            shutdown_tx,
            status,
        }
    }

    /// Replace the configuration snapshot.
    ///
    /// Unchanged targets keep running untouched; the escalation table is
    /// swapped atomically for every scheduler.
    pub async fn reload(&self, config: Arc<ResolvedConfig>) -> ReloadReport {
        let mut report = ReloadReport::default();

        if config.max_in_flight != self.config.read().await.max_in_flight {
            warn!("max_in_flight changes take effect on restart only");
        }

        self.escalation
            .send_replace(Arc::new(self.context_for(&config)));

        let mut slots = self.slots.write().await;

        let stale: Vec<String> = slots
            .keys()
            .filter(|name| config.target(name).is_none())
            .cloned()
            .collect();
        for name in stale {
            if let Some(slot) = slots.remove(&name) {
                slot.stop().await;
            }
            report.removed.push(name);
        }

        for target in &config.targets {
            let same = slots.get(&target.name).map(|slot| slot.settings == *target);
            match same {
                Some(true) => {
                    report.unchanged.push(target.name.clone());
                }
                Some(false) => {
                    if let Some(old) = slots.remove(&target.name) {
                        old.stop().await;
                    }
                    let slot = self.spawn(target.clone(), jitter(&config));
                    slots.insert(target.name.clone(), slot);
                    report.restarted.push(target.name.clone());
                }
                None => {
                    let slot = self.spawn(target.clone(), jitter(&config));
                    slots.insert(target.name.clone(), slot);
                    report.added.push(target.name.clone());
                }
            }
        }
        drop(slots);

        *self.config.write().await = config;
        info!(
            added = report.added.len(),
            removed = report.removed.len(),
            restarted = report.restarted.len(),
            unchanged = report.unchanged.len(),
            "configuration reloaded"
        );
        report
    }

    /// Stop every scheduler and wait for them to finish their current step.
    pub async fn shutdown(&self) {
        let mut slots = self.slots.write().await;
        for (name, slot) in slots.drain() {
            slot.stop().await;
            debug!(target_name = %name, "scheduler stopped");
        }
        info!("all schedulers stopped");
    }

    /// Latest status of every target, sorted by name.
    pub async fn statuses(&self) -> Vec<TargetStatus> {
        let slots = self.slots.read().await;
        let mut statuses: Vec<TargetStatus> =
            slots.values().map(|s| s.status.borrow().clone()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Names of targets with a running scheduler.
    pub async fn active_targets(&self) -> Vec<String> {
        let slots = self.slots.read().await;
        let mut names: Vec<String> = slots.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Random start delay so targets do not all fire at once.
fn jitter(config: &ResolvedConfig) -> Duration {
    let (min, max) = config.startup_jitter;
    let range: RangeInclusive<u64> = min.as_millis() as u64..=max.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(range))
}
