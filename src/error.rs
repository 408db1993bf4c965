//! Error types for BulkMail
//!
//! One enum covering every failure mode outside the queue file itself.
//! Queue file errors are wrapped so the "queue empty" signal can still be
//! matched by callers.

use thiserror::Error;

/// Result type alias for BulkMail operations
pub type Result<T> = std::result::Result<T, BulkMailError>;

/// Comprehensive error type for BulkMail operations
#[derive(Error, Debug)]
pub enum BulkMailError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Queue file errors
    #[error("Queue error: {0}")]
    Queue(#[from] queuefile::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SMTP transport setup errors
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    /// Malformed sender or recipient address
    #[error("Address error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// File watcher errors
    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// Dispatcher lifecycle errors
    #[error("Dispatcher error: {0}")]
    Dispatcher(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl BulkMailError {
    /// True when the underlying cause is an empty queue
    pub fn is_queue_empty(&self) -> bool {
        matches!(self, BulkMailError::Queue(e) if e.is_queue_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_empty_passthrough() {
        let err: BulkMailError = queuefile::Error::NoPendingRecipients.into();
        assert!(err.is_queue_empty());
        assert_eq!(err.to_string(), "Queue error: no pending recipients");

        let err = BulkMailError::Config("missing host".to_string());
        assert!(!err.is_queue_empty());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "data.txt");
        let err: BulkMailError = io.into();
        assert!(err.to_string().starts_with("I/O error"));
    }
}
