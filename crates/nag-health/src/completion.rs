//! Single-assignment completion slot.
//!
//! Two writers race to complete a probe: the request and its timeout.
//! [`CompletionSlot::complete`] is an atomic check-and-set; the first
//! value stored is the one every reader sees, later writers get their
//! value handed back so they can log it.

use std::sync::OnceLock;

use tokio::sync::Notify;

#[derive(Debug)]
pub struct CompletionSlot<T> {
    value: OnceLock<T>,
    ready: Notify,
}

impl<T: Clone> CompletionSlot<T> {
    pub fn new() -> Self {
        Self {
            value: OnceLock::new(),
            ready: Notify::new(),
        }
    }

    /// Store `value` if the slot is still empty.
    ///
    /// Returns `Err(value)` when another writer got there first.
    pub fn complete(&self, value: T) -> Result<(), T> {
        self.value.set(value)?;
        // notify_one keeps a permit when nobody waits yet.
        self.ready.notify_one();
        Ok(())
    }

    /// Wait for the winning value.
    pub async fn wait(&self) -> T {
        loop {
            if let Some(value) = self.value.get() {
                return value.clone();
            }
            self.ready.notified().await;
        }
    }
}
