//! BulkMail configuration file handling
//!
//! Loads and saves `config.yaml` (working directory by default).

use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Config file looked up when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// SMTP relay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,

    /// 465 means implicit TLS, anything else uses STARTTLS
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    pub from_email: String,

    #[serde(default)]
    pub from_name: String,
}

fn default_smtp_port() -> u16 {
    587
}

/// Message and pacing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// Minimum gap between two completed sends
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: u64,

    pub subject: String,

    /// HTML template path; `{{email}}` is replaced with the recipient
    #[serde(default = "default_template")]
    pub template: PathBuf,

    /// Unsubscribe link for the List-Unsubscribe header; `{{email}}` is
    /// replaced with the URL-encoded recipient
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsubscribe_url: Option<String>,
}

fn default_delay_seconds() -> u64 {
    30
}

fn default_template() -> PathBuf {
    PathBuf::from("mail.html")
}

/// Queue file location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data.txt")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// BulkMail configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkMailConfig {
    pub smtp: SmtpConfig,

    pub mail: MailConfig,

    #[serde(default)]
    pub database: DatabaseConfig,
}

impl BulkMailConfig {
    /// Configuration matching the scaffolded sample files
    pub fn sample() -> Self {
        Self {
            smtp: SmtpConfig {
                host: "smtp.example.com".to_string(),
                port: default_smtp_port(),
                username: "yourusername".to_string(),
                password: "yourpassword".to_string(),
                from_email: "your@email.com".to_string(),
                from_name: "Your Name".to_string(),
            },
            mail: MailConfig {
                delay_seconds: default_delay_seconds(),
                subject: "Sample Subject".to_string(),
                template: default_template(),
                unsubscribe_url: None,
            },
            database: DatabaseConfig::default(),
        }
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::BulkMailError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading BulkMail configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;

        tracing::debug!(
            smtp_host = %config.smtp.host,
            delay_seconds = config.mail.delay_seconds,
            queue = %config.database.path.display(),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        tracing::info!(path = %path.display(), "Saving BulkMail configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// Read the HTML template named by `mail.template`
    pub fn load_template(&self) -> Result<String> {
        fs::read_to_string(&self.mail.template).map_err(|e| {
            crate::BulkMailError::Config(format!(
                "Failed to load template {}: {}",
                self.mail.template.display(),
                e
            ))
        })
    }

    pub fn queue_path(&self) -> &Path {
        &self.database.path
    }
}
