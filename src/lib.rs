//! BulkMail - rate-limited bulk mail dispatch from a plain-text queue file
//!
//! BulkMail sends one HTML message to a list of recipients kept in a
//! line-oriented text file, one recipient at a time, with a minimum delay
//! between sends. The queue file is the only state: every status change is
//! written back to it, so an interrupted run picks up where it left off and
//! other tools can append addresses while the dispatcher is running.
//!
//! # Architecture
//!
//! - **queuefile** (workspace crate): record codec, atomic file store and
//!   queue operations
//! - **dispatcher**: the send loop (claim, pace, send, record, auto-stop)
//! - **control**: start/stop/delay commands read from stdin during `run`
//! - **mail**: SMTP and dry-run senders, template rendering
//! - **watcher**: queue file change notifications
//! - **config**: YAML configuration and validation
//! - **import**: address extraction from text and CSV files
//! - **samples**: starter files for `bulkmail init`

// Core modules
pub mod config;
pub mod error;
pub mod logging;

// Components
pub mod control;
pub mod dispatcher;
pub mod import;
pub mod mail;
pub mod samples;
pub mod style;
pub mod watcher;

// Re-exports
pub use error::{BulkMailError, Result};
