//! Alert text rendering.

use nag_core::{NotificationEvent, Outcome, Urgency};

/// Rendered alert, ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub body: String,
}

/// One-line alert used for pager-like channels and as the event summary.
pub fn summary_line(monitor: &str, target: &str, outcome: &Outcome) -> String {
    format!("ALERT ({monitor}): {target} [{outcome}]")
}

/// Render an event for its tier's urgency.
///
/// Low urgency gets a full message; high urgency gets the summary line as
/// the body so it fits a text message.
pub fn render(event: &NotificationEvent) -> Message {
    let subject = format!("ALERT: {}", event.target);
    let body = match event.urgency {
        Urgency::High => event.summary.clone(),
        Urgency::Low => format!(
            "Target {target} is failing its health checks.\n\
             \n\
             Last result: {outcome}\n\
             Consecutive failures: {streak}\n\
             Probe address: {address}\n\
             \n\
             Reported by {monitor}",
            target = event.target,
            outcome = describe(&event.last_outcome),
            streak = event.streak,
            address = event.address,
            monitor = event.monitor,
        ),
    };
    Message { subject, body }
}

fn describe(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Ok { status } => format!("status {status}"),
        Outcome::HttpError { status } => format!("unexpected status {status}"),
        Outcome::NetworkError { classifier } => format!("network error ({classifier})"),
        Outcome::TimedOut => "no reply within the timeout".to_string(),
    }
}
