//! Notification delivery errors.

use thiserror::Error;

/// A tier could not be delivered. Logged, never counted against the target.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no notifier registered for channel: {0}")]
    UnknownChannel(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("gateway rejected notification with status {0}")]
    Rejected(u16),

    #[error("delivery timed out")]
    Timeout,
}

pub type NotifyResult<T> = Result<T, NotifyError>;
