//! Queue dispatcher
//!
//! Long-running loop that drains the queue file one recipient at a time.
//!
//! # Lifecycle
//!
//! The dispatcher is either RUNNING or STOPPED. While RUNNING, every tick:
//!
//! 1. **Claim**: the first `PENDING` line becomes `SENDING`
//! 2. **Pace**: if the last completion was less than the send delay ago, the
//!    claim is held until the delay has passed. A stop or shutdown during
//!    that wait hands the claim back as `PENDING`.
//! 3. **Send**: the template is rendered for the recipient and handed to the
//!    [`MailSender`](crate::mail::MailSender)
//! 4. **Record**: the line becomes `DONE`, or `FAILED` with the error text
//!
//! Three consecutive empty ticks switch the dispatcher to STOPPED. On
//! startup, `SENDING` claims older than five minutes are returned to the
//! queue; a queue file that cannot be read aborts startup.
//!
//! When a file watcher is attached, every change to the queue file triggers
//! reconciliation of bare addresses appended by other tools.
//!
//! # Example
//!
//! ```ignore
//! use bulkmail::dispatcher::{Dispatcher, DispatcherConfig, MessageTemplate};
//! use bulkmail::mail::DryRunSender;
//! use queuefile::Queue;
//! use std::sync::Arc;
//!
//! let mut dispatcher = Dispatcher::new(
//!     DispatcherConfig::new(30).with_start_running(true),
//!     Queue::new("data.txt"),
//!     Arc::new(DryRunSender::new()),
//!     MessageTemplate::new("Hello", "<p>Hi {{email}}</p>"),
//! );
//!
//! let handle = dispatcher.handle();
//! tokio::spawn(async move { dispatcher.run().await });
//!
//! handle.stop().await?;
//! handle.shutdown().await?;
//! ```

mod daemon;
pub mod metrics;

pub use daemon::{
    send_wait, ControlState, Dispatcher, DispatcherCommand, DispatcherConfig, DispatcherEvent,
    DispatcherHandle, MessageTemplate, DEFAULT_EMPTY_POLL_LIMIT, DEFAULT_EVENT_CHANNEL_CAPACITY,
    DEFAULT_STALE_TIMEOUT, DEFAULT_TICK_INTERVAL,
};
