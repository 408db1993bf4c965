//! Configuration validation
//!
//! Checks the fields the dispatcher and the SMTP sender cannot work without.

use super::bulkmail_config::BulkMailConfig;
use crate::BulkMailError;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate a BulkMail configuration, collecting every problem
pub fn validate_config(config: &BulkMailConfig) -> ValidationResult {
    let mut errors = Vec::new();

    if config.smtp.host.trim().is_empty() {
        errors.push(ValidationError::new("smtp.host", "Host must not be empty"));
    }

    if config.smtp.port == 0 {
        errors.push(ValidationError::new(
            "smtp.port",
            "Port must be greater than 0",
        ));
    }

    if !config.smtp.from_email.contains('@') {
        errors.push(ValidationError::new(
            "smtp.from_email",
            format!("'{}' is not an email address", config.smtp.from_email),
        ));
    }

    if config.mail.subject.trim().is_empty() {
        errors.push(ValidationError::new(
            "mail.subject",
            "Subject must not be empty",
        ));
    }

    if let Some(ref url) = config.mail.unsubscribe_url {
        if !url.starts_with("http://") && !url.starts_with("https://") && !url.starts_with("mailto:")
        {
            errors.push(ValidationError::new(
                "mail.unsubscribe_url",
                "Must be an http(s) or mailto: URL",
            ));
        }
    }

    if config.database.path.as_os_str().is_empty() {
        errors.push(ValidationError::new(
            "database.path",
            "Queue file path must not be empty",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate and fold all problems into a single `Config` error
pub fn validate_config_result(config: &BulkMailConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        let details: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        BulkMailError::Config(format!("Invalid configuration:\n  {}", details.join("\n  ")))
    })
}
