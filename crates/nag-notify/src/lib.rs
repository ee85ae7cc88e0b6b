//! nag-notify — notifier dispatch for the nag health monitor.
//!
//! The scheduler decides *which* tiers fire; this crate decides *how* an
//! alert reaches a channel. Each tier names a channel, each channel is
//! backed by a [`Notifier`], and the [`Dispatcher`] delivers every tier in
//! its own task so that one broken channel never holds up another or the
//! next probe cycle.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher
//!   ├── channel name → Arc<dyn Notifier>
//!   │   ├── LogNotifier      (tracing)
//!   │   └── WebhookNotifier  (JSON POST over hyper)
//!   └── dispatch(tier, event) → spawned delivery, outcome logged
//! ```

pub mod dispatch;
pub mod error;
pub mod log;
pub mod render;
pub mod webhook;

pub use dispatch::{BoxFuture, Dispatcher, Notifier};
pub use error::{NotifyError, NotifyResult};
pub use log::LogNotifier;
pub use render::Message;
pub use webhook::WebhookNotifier;
