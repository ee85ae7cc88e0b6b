//! Log channel — writes the rendered alert through tracing.

use tracing::warn;

use nag_core::{NotificationEvent, TierSpec};

use crate::dispatch::{BoxFuture, Notifier};
use crate::error::NotifyResult;
use crate::render::render;

#[derive(Debug, Clone)]
pub struct LogNotifier {
    channel: String,
    recipients: Vec<String>,
}

impl LogNotifier {
    pub fn new(channel: &str, recipients: Vec<String>) -> Self {
        Self {
            channel: channel.to_string(),
            recipients,
        }
    }
}

impl Notifier for LogNotifier {
    fn deliver<'a>(
        &'a self,
        _tier: &'a TierSpec,
        event: &'a NotificationEvent,
    ) -> BoxFuture<'a, NotifyResult<()>> {
        Box::pin(async move {
            let message = render(event);
            warn!(
                channel = %self.channel,
                recipients = ?self.recipients,
                target_name = %event.target,
                streak = event.streak,
                subject = %message.subject,
                "{}",
                message.body
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use nag_core::Urgency;

    use super::*;
    use crate::render::tests::event;

    #[tokio::test]
    async fn log_delivery_always_acknowledges() {
        let notifier = LogNotifier::new("sms", vec!["+358000".to_string()]);
        let tier = TierSpec::new("sms", 3, Urgency::High);
        assert!(notifier.deliver(&tier, &event(Urgency::High)).await.is_ok());
    }
}
