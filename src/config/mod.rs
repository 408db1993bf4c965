//! Configuration system
//!
//! Loads `config.yaml` with three sections:
//! - `smtp`: relay endpoint, credentials and sender identity
//! - `mail`: pacing, subject, HTML template and unsubscribe link
//! - `database`: location of the queue file

mod bulkmail_config;
pub mod validation;

pub use bulkmail_config::{
    BulkMailConfig, DatabaseConfig, MailConfig, SmtpConfig, DEFAULT_CONFIG_FILE,
};
pub use validation::{validate_config, validate_config_result, ValidationError};
