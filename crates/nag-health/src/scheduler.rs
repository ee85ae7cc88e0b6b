//! Per-target scheduler — the check/escalation state machine.
//!
//! ```text
//! Idle ──timer──▶ Probing ──one CheckResult──▶ Evaluating ──▶ Scheduled ──▶ Idle
//! ```
//!
//! Every probe error is folded into an outcome during `Evaluating`; the
//! scheduler always reaches `Scheduled`. Notifications are handed to the
//! dispatcher in the background and never delay the next cycle.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use nag_core::{
    CheckResult, Health, NotificationEvent, Outcome, ResolvedConfig, TargetSettings, TargetStatus,
};
use nag_notify::{Dispatcher, NotifyResult, render};

use crate::checker::Prober;
use crate::policy::{EscalationDecision, EscalationPolicy};
use crate::tracker::{StreakTracker, Transition};

/// Escalation state shared by all schedulers and swapped as a whole on reload.
#[derive(Debug, Clone)]
pub struct EscalationContext {
    pub monitor_name: String,
    pub policy: EscalationPolicy,
    pub dispatcher: Dispatcher,
}

impl EscalationContext {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            monitor_name: config.monitor_name.clone(),
            policy: EscalationPolicy::new(config.tiers.clone()),
            dispatcher: Dispatcher::from_channels(&config.channels),
        }
    }
}

/// Where the scheduler is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Probing,
    Evaluating,
    Scheduled,
}

/// Result of evaluating one check.
#[derive(Debug)]
pub struct Evaluation {
    pub transition: Transition,
    pub decision: EscalationDecision,
    /// One background delivery per fired tier.
    pub deliveries: Vec<JoinHandle<NotifyResult<()>>>,
}

pub struct TargetScheduler {
    settings: TargetSettings,
    tracker: StreakTracker,
    phase: Phase,
    prober: Arc<dyn Prober>,
    escalation: watch::Receiver<Arc<EscalationContext>>,
    status: watch::Sender<TargetStatus>,
    in_flight: Option<Arc<Semaphore>>,
}

impl TargetScheduler {
    pub fn new(
        settings: TargetSettings,
        prober: Arc<dyn Prober>,
        escalation: watch::Receiver<Arc<EscalationContext>>,
    ) -> Self {
        let (status, _) = watch::channel(TargetStatus::unknown(
            settings.name.clone(),
            settings.address.clone(),
        ));
        Self {
            settings,
            tracker: StreakTracker::new(),
            phase: Phase::Idle,
            prober,
            escalation,
            status,
            in_flight: None,
        }
    }

    /// Share a global cap on simultaneously running probes.
    ///
    /// A permit is held until the probe resolves, so at most its budget. A
    /// request abandoned by the timeout keeps its socket until the transport
    /// deadline without holding a permit; the cap bounds probes being waited
    /// on, not open connections.
    pub fn with_in_flight_limit(mut self, limit: Arc<Semaphore>) -> Self {
        self.in_flight = Some(limit);
        self
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &TargetSettings {
        &self.settings
    }

    pub fn streak(&self) -> u32 {
        self.tracker.consecutive_failures()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Live view of this target's status board entry.
    pub fn subscribe(&self) -> watch::Receiver<TargetStatus> {
        self.status.subscribe()
    }

    /// Budget for the next probe, from the current streak.
    pub fn timeout_budget(&self) -> Duration {
        EscalationPolicy::timeout_budget(self.streak(), &self.settings)
    }

    /// Idle → Probing: run one probe and return its single result.
    pub async fn check(&mut self) -> CheckResult {
        self.phase = Phase::Probing;
        let budget = self.timeout_budget();

        let _permit = match &self.in_flight {
            // The semaphore is never closed; a closed one just means no cap.
            Some(limit) => Arc::clone(limit).acquire_owned().await.ok(),
            None => None,
        };

        debug!(
            target_name = %self.settings.name,
            budget_ms = budget.as_millis() as u64,
            streak = self.streak(),
            "probing target"
        );
        self.prober.probe(&self.settings, budget).await
    }

    /// Probing → Evaluating → Scheduled for one result.
    pub fn evaluate(&mut self, result: &CheckResult) -> Evaluation {
        self.phase = Phase::Evaluating;
        let ctx = self.escalation.borrow().clone();

        let transition = self.tracker.record(result);
        self.log_outcome(result, transition);

        let decision = ctx.policy.decide(transition.current, &self.settings);
        let deliveries = decision
            .tiers
            .iter()
            .map(|tier| {
                let event = self.event(&ctx, tier.urgency, &result.outcome, transition.current);
                info!(
                    target_name = %self.settings.name,
                    channel = %tier.channel,
                    streak = transition.current,
                    "dispatching notification"
                );
                ctx.dispatcher.dispatch(tier.clone(), event)
            })
            .collect();

        self.publish(&ctx);

        debug!(
            target_name = %self.settings.name,
            streak = transition.current,
            next_budget_ms = decision.timeout.as_millis() as u64,
            delay_ms = decision.delay.as_millis() as u64,
            "next check scheduled"
        );
        self.phase = Phase::Scheduled;

        Evaluation {
            transition,
            decision,
            deliveries,
        }
    }

    /// One full cycle; returns the delay before the next one.
    pub async fn run_cycle(&mut self) -> Duration {
        let result = self.check().await;
        self.evaluate(&result).decision.delay
    }

    /// Loop until `shutdown` flips or its sender goes away.
    pub async fn run(mut self, start_delay: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            target_name = %self.settings.name,
            address = %self.settings.address,
            start_delay_ms = start_delay.as_millis() as u64,
            "scheduler started"
        );

        let mut delay = start_delay;
        while !*shutdown.borrow() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
            tokio::select! {
                next = self.run_cycle() => delay = next,
                _ = shutdown.changed() => break,
            }
            self.phase = Phase::Idle;
        }

        info!(target_name = %self.settings.name, "scheduler stopped");
    }

    fn event(
        &self,
        ctx: &EscalationContext,
        urgency: nag_core::Urgency,
        outcome: &Outcome,
        streak: u32,
    ) -> NotificationEvent {
        NotificationEvent {
            target: self.settings.name.clone(),
            address: self.settings.address.clone(),
            streak,
            last_outcome: outcome.clone(),
            urgency,
            monitor: ctx.monitor_name.clone(),
            summary: render::summary_line(&ctx.monitor_name, &self.settings.name, outcome),
            fired_at: SystemTime::now(),
        }
    }

    fn publish(&self, ctx: &EscalationContext) {
        let streak = self.streak();
        self.status.send_replace(TargetStatus {
            name: self.settings.name.clone(),
            address: self.settings.address.clone(),
            streak,
            health: Health::from_streak(streak, ctx.policy.first_threshold()),
            last_outcome: self.tracker.last_outcome().cloned(),
            last_duration: self.tracker.last_duration(),
            last_checked: self.tracker.last_checked(),
        });
    }

    fn log_outcome(&self, result: &CheckResult, transition: Transition) {
        let name = &self.settings.name;
        let elapsed_ms = result.elapsed.as_millis() as u64;
        match &result.outcome {
            Outcome::Ok { .. } if transition.recovered() => info!(
                target_name = %name,
                previous_streak = transition.previous,
                elapsed_ms,
                "target recovered"
            ),
            Outcome::Ok { .. } => debug!(target_name = %name, elapsed_ms, "target healthy"),
            Outcome::TimedOut => warn!(
                target_name = %name,
                streak = transition.current,
                budget_ms = elapsed_ms,
                "target timed out"
            ),
            outcome => warn!(
                target_name = %name,
                outcome = %outcome,
                streak = transition.current,
                elapsed_ms,
                "target check failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use nag_core::{TierSpec, TimeoutLadder};
    use nag_notify::BoxFuture;
    use tracing_test::traced_test;

    use super::*;
    use crate::checker::{RacingProber, Transport};
    use crate::error::TransportError;

    struct Scripted {
        outcomes: Mutex<VecDeque<Outcome>>,
    }

    impl Prober for Scripted {
        fn probe<'a>(
            &'a self,
            target: &'a TargetSettings,
            budget: Duration,
        ) -> BoxFuture<'a, CheckResult> {
            Box::pin(async move {
                let outcome = self
                    .outcomes
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or(Outcome::Ok { status: 200 });
                let elapsed = if outcome == Outcome::TimedOut {
                    budget
                } else {
                    Duration::from_millis(5)
                };
                CheckResult::new(target.name.clone(), outcome, elapsed)
            })
        }
    }

    fn settings() -> TargetSettings {
        TargetSettings {
            name: "api".to_string(),
            address: "http://api/".to_string(),
            success_code: 200,
            timeouts: TimeoutLadder {
                short: Duration::from_secs(2),
                long: Duration::from_secs(10),
                patient: Duration::from_secs(30),
            },
            poll_interval: Duration::from_secs(60),
            fast_retry_delay: Duration::from_secs(5),
            persistent_after: 2,
        }
    }

    fn scheduler(outcomes: Vec<Outcome>) -> TargetScheduler {
        let ctx = EscalationContext {
            monitor_name: "nag@test".to_string(),
            policy: EscalationPolicy::new(vec![TierSpec::new(
                "log",
                2,
                nag_core::Urgency::Low,
            )]),
            dispatcher: Dispatcher::from_channels(
                &[(
                    "log".to_string(),
                    nag_core::ChannelConfig::Log {
                        recipients: Vec::new(),
                    },
                )]
                .into_iter()
                .collect(),
            ),
        };
        let (_tx, rx) = watch::channel(Arc::new(ctx));
        let prober = Arc::new(Scripted {
            outcomes: Mutex::new(outcomes.into()),
        });
        TargetScheduler::new(settings(), prober, rx)
    }

    #[tokio::test]
    async fn phases_follow_the_cycle() {
        let mut s = scheduler(vec![Outcome::TimedOut]);
        assert_eq!(s.phase(), Phase::Idle);
        let result = s.check().await;
        assert_eq!(s.phase(), Phase::Probing);
        s.evaluate(&result);
        assert_eq!(s.phase(), Phase::Scheduled);
    }

    #[tokio::test]
    async fn budget_follows_streak() {
        let mut s = scheduler(vec![Outcome::TimedOut, Outcome::TimedOut]);
        assert_eq!(s.timeout_budget(), Duration::from_secs(2));
        s.run_cycle().await;
        assert_eq!(s.timeout_budget(), Duration::from_secs(10));
        s.run_cycle().await;
        assert_eq!(s.timeout_budget(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn status_board_tracks_evaluations() {
        let mut s = scheduler(vec![Outcome::HttpError { status: 500 }]);
        let status = s.subscribe();
        assert_eq!(status.borrow().health, Health::Unknown);

        s.run_cycle().await;
        {
            let st = status.borrow();
            assert_eq!(st.streak, 1);
            assert_eq!(st.health, Health::Amber);
            assert_eq!(st.last_outcome, Some(Outcome::HttpError { status: 500 }));
        }

        s.run_cycle().await;
        assert_eq!(status.borrow().health, Health::Green);
    }

    #[tokio::test]
    async fn evaluation_fires_tiers_from_policy() {
        let mut s = scheduler(vec![Outcome::TimedOut, Outcome::TimedOut]);
        let first = s.check().await;
        assert!(s.evaluate(&first).deliveries.is_empty());

        let second = s.check().await;
        let eval = s.evaluate(&second);
        assert_eq!(eval.deliveries.len(), 1);
        for d in eval.deliveries {
            assert!(d.await.unwrap().is_ok());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let s = scheduler(Vec::new());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(s.run(Duration::from_secs(1), rx));

        tokio::time::sleep(Duration::from_secs(3)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }

    #[tokio::test]
    #[traced_test]
    async fn recovery_is_logged() {
        let mut s = scheduler(vec![
            Outcome::NetworkError {
                classifier: "connect".to_string(),
            },
            Outcome::Ok { status: 200 },
        ]);
        s.run_cycle().await;
        assert!(!logs_contain("target recovered"));

        s.run_cycle().await;
        assert_eq!(s.streak(), 0);
        assert!(logs_contain("target recovered"));
        assert!(logs_contain("previous_streak=1"));
    }

    /// Never answers within any test budget.
    struct Hung;

    impl Transport for Hung {
        fn request<'a>(&'a self, _address: &'a str) -> BoxFuture<'a, Result<u16, TransportError>> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Err(TransportError::Deadline)
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_permit_returns_when_budget_expires() {
        let limit = Arc::new(Semaphore::new(1));
        let prober = Arc::new(RacingProber::new(Arc::new(Hung)));
        let (_tx, rx) = watch::channel(Arc::new(EscalationContext {
            monitor_name: "nag@test".to_string(),
            policy: EscalationPolicy::new(Vec::new()),
            dispatcher: Dispatcher::new(),
        }));
        let mut a = TargetScheduler::new(settings(), prober.clone(), rx.clone())
            .with_in_flight_limit(Arc::clone(&limit));
        let mut other = settings();
        other.name = "web".to_string();
        let mut b = TargetScheduler::new(other, prober, rx).with_in_flight_limit(Arc::clone(&limit));

        let first = a.check().await;
        assert_eq!(first.outcome, Outcome::TimedOut);
        // The abandoned request is still pending, but the permit is back.
        assert_eq!(limit.available_permits(), 1);

        let second = tokio::time::timeout(Duration::from_secs(3), b.check())
            .await
            .expect("second target starved by an abandoned request");
        assert_eq!(second.outcome, Outcome::TimedOut);
    }
}
