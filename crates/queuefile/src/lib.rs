//! Flat-file job queue for outbound mail
//!
//! A queue file is plain UTF-8 text, one recipient per line:
//!
//! ```text
//! 2024-05-01T09:30:00Z ; DONE ; alice@example.com
//! 0000-00-00T00:00:00Z ; PENDING ; bob@example.com
//! 2024-05-01T09:31:02Z ; FAILED ; carol@example.com ; 550 mailbox unavailable
//! ```
//!
//! Lines that do not parse are noise: every read path skips them and every
//! rewrite carries them through untouched. Line order is significant, the
//! first `PENDING` line is always the next job.
//!
//! # Example
//!
//! ```no_run
//! use queuefile::{Queue, Status};
//!
//! let queue = Queue::new("data.txt");
//!
//! let claim = queue.claim_next_pending()?;
//! // ... deliver the message ...
//! queue.complete_claim(&claim, Status::Done, "")?;
//!
//! let stats = queue.stats()?;
//! println!("Sent: {}, Pending: {}", stats.sent, stats.pending);
//! # Ok::<(), queuefile::Error>(())
//! ```

mod clock;
mod queue;
mod record;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use queue::{Claim, ImportSummary, PendingEmail, Queue, Stats};
pub use record::{sanitize_error, Record, Status, ZERO_TIMESTAMP};
pub use store::{append_lines, for_each, read_all, update_matching, write_all};

use thiserror::Error;

/// Errors that can occur when working with a queue file
#[derive(Error, Debug)]
pub enum Error {
    /// The queue holds no `PENDING` record. This is the normal "queue empty"
    /// outcome of a claim, not a failure.
    #[error("no pending recipients")]
    NoPendingRecipients,

    #[error("Invalid queue line: {reason}")]
    Parse { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the "queue empty" control signal
    pub fn is_queue_empty(&self) -> bool {
        matches!(self, Error::NoPendingRecipients)
    }
}

/// Result type for queue file operations
pub type Result<T> = std::result::Result<T, Error>;
