//! Channel registry and per-tier delivery.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info};

use nag_core::{ChannelConfig, NotificationEvent, TierSpec};

use crate::error::{NotifyError, NotifyResult};
use crate::log::LogNotifier;
use crate::webhook::WebhookNotifier;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A delivery channel. Implementations own their transport and recipients.
pub trait Notifier: Send + Sync {
    /// Deliver one tier's alert. The result is only ever logged.
    fn deliver<'a>(
        &'a self,
        tier: &'a TierSpec,
        event: &'a NotificationEvent,
    ) -> BoxFuture<'a, NotifyResult<()>>;
}

/// Maps channel names to notifiers.
#[derive(Clone, Default)]
pub struct Dispatcher {
    notifiers: HashMap<String, Arc<dyn Notifier>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build notifiers for every declared channel.
    pub fn from_channels(channels: &BTreeMap<String, ChannelConfig>) -> Self {
        let mut dispatcher = Self::new();
        for (name, channel) in channels {
            let notifier: Arc<dyn Notifier> = match channel {
                ChannelConfig::Log { recipients } => {
                    Arc::new(LogNotifier::new(name, recipients.clone()))
                }
                ChannelConfig::Webhook { url, recipients } => {
                    Arc::new(WebhookNotifier::new(name, url, recipients.clone()))
                }
            };
            dispatcher.register(name, notifier);
        }
        dispatcher
    }

    /// Register (or replace) the notifier behind a channel.
    pub fn register(&mut self, channel: &str, notifier: Arc<dyn Notifier>) {
        self.notifiers.insert(channel.to_string(), notifier);
    }

    /// Deliver one tier and log the acknowledgment or the failure.
    pub async fn deliver(&self, tier: &TierSpec, event: &NotificationEvent) -> NotifyResult<()> {
        let result = match self.notifiers.get(&tier.channel) {
            Some(notifier) => notifier.deliver(tier, event).await,
            None => Err(NotifyError::UnknownChannel(tier.channel.clone())),
        };

        match &result {
            Ok(()) => info!(
                target_name = %event.target,
                channel = %tier.channel,
                urgency = %tier.urgency,
                streak = event.streak,
                "notification delivered"
            ),
            Err(e) => error!(
                target_name = %event.target,
                channel = %tier.channel,
                streak = event.streak,
                error = %e,
                "notification delivery failed"
            ),
        }
        result
    }

    /// Deliver one tier in the background.
    ///
    /// Returns immediately; the caller may await the handle but the
    /// scheduler never does.
    pub fn dispatch(&self, tier: TierSpec, event: NotificationEvent) -> JoinHandle<NotifyResult<()>> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.deliver(&tier, &event).await })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut channels: Vec<_> = self.notifiers.keys().collect();
        channels.sort();
        f.debug_struct("Dispatcher")
            .field("channels", &channels)
            .finish()
    }
}
