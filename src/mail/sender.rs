//! Mail sender implementations

use super::template::{html_to_plain_text, EMAIL_PLACEHOLDER};
use crate::config::SmtpConfig;
use async_trait::async_trait;
use lettre::address::Address;
use lettre::message::header::{Header, HeaderName, HeaderValue};
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::sync::Mutex;
use thiserror::Error;

/// Why a single delivery failed
///
/// The display text ends up on the queue line of a `FAILED` record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("invalid recipient '{0}'")]
    InvalidRecipient(String),

    #[error("could not build message: {0}")]
    Compose(String),

    #[error("{0}")]
    Transport(String),
}

/// Delivers one message to one recipient
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, html_body: &str) -> Result<(), SendError>;
}

/// List-Unsubscribe header
#[derive(Debug, Clone)]
struct ListUnsubscribe(String);

impl Header for ListUnsubscribe {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("List-Unsubscribe")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// List-Unsubscribe-Post header (RFC 8058 one-click)
#[derive(Debug, Clone)]
struct ListUnsubscribePost;

impl Header for ListUnsubscribePost {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("List-Unsubscribe-Post")
    }

    fn parse(_s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self)
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), "List-Unsubscribe=One-Click".to_string())
    }
}

/// Sends through an SMTP relay
///
/// Port 465 uses implicit TLS, every other port STARTTLS.
pub struct SmtpSender {
    transport: SmtpTransport,
    from: Mailbox,
    unsubscribe_url: Option<String>,
}

impl SmtpSender {
    pub fn new(config: &SmtpConfig, unsubscribe_url: Option<String>) -> crate::Result<Self> {
        let builder = if config.port == 465 {
            SmtpTransport::relay(&config.host)?
        } else {
            SmtpTransport::starttls_relay(&config.host)?
        };

        let mut builder = builder.port(config.port);
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        let address: Address = config.from_email.parse()?;
        let name = (!config.from_name.is_empty()).then(|| config.from_name.clone());

        tracing::debug!(host = %config.host, port = config.port, "SMTP transport configured");

        Ok(Self {
            transport: builder.build(),
            from: Mailbox::new(name, address),
            unsubscribe_url,
        })
    }

    fn compose(&self, recipient: &str, subject: &str, html_body: &str) -> Result<Message, SendError> {
        let to: Mailbox = recipient
            .parse()
            .map_err(|_| SendError::InvalidRecipient(recipient.to_string()))?;

        let mut builder = Message::builder()
            .from(self.from.clone())
            .reply_to(self.from.clone())
            .to(to)
            .subject(subject);

        if let Some(link) = unsubscribe_link(self.unsubscribe_url.as_deref(), recipient) {
            builder = builder
                .header(ListUnsubscribe(link))
                .header(ListUnsubscribePost);
        }

        builder
            .multipart(MultiPart::alternative_plain_html(
                html_to_plain_text(html_body),
                html_body.to_string(),
            ))
            .map_err(|e| SendError::Compose(e.to_string()))
    }
}

#[async_trait]
impl MailSender for SmtpSender {
    async fn send(&self, recipient: &str, subject: &str, html_body: &str) -> Result<(), SendError> {
        let message = self.compose(recipient, subject, html_body)?;
        let transport = self.transport.clone();

        // lettre's SmtpTransport is blocking
        let result = tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| SendError::Transport(format!("send task failed: {}", e)))?;

        match result {
            Ok(response) => {
                tracing::debug!(recipient, code = %response.code(), "SMTP relay accepted message");
                Ok(())
            }
            Err(e) => Err(SendError::Transport(e.to_string())),
        }
    }
}

/// `<url>` value for the List-Unsubscribe header
fn unsubscribe_link(template: Option<&str>, recipient: &str) -> Option<String> {
    let template = template?;
    let url = template.replace(EMAIL_PLACEHOLDER, &urlencoding::encode(recipient));
    Some(format!("<{}>", url))
}

/// Logs messages instead of sending them
#[derive(Debug, Default)]
pub struct DryRunSender {
    sent: Mutex<Vec<String>>,
}

impl DryRunSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recipients "sent" so far
    pub fn recipients(&self) -> Vec<String> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MailSender for DryRunSender {
    async fn send(&self, recipient: &str, subject: &str, html_body: &str) -> Result<(), SendError> {
        if recipient.parse::<Address>().is_err() {
            return Err(SendError::InvalidRecipient(recipient.to_string()));
        }

        tracing::info!(
            recipient,
            subject,
            body_bytes = html_body.len(),
            "Dry run: message not sent"
        );
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(recipient.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BulkMailConfig;

    fn sender(unsubscribe: Option<&str>) -> SmtpSender {
        let config = BulkMailConfig::sample();
        SmtpSender::new(&config.smtp, unsubscribe.map(str::to_string)).unwrap()
    }

    fn raw(message: &Message) -> String {
        String::from_utf8(message.formatted()).unwrap()
    }

    #[test]
    fn test_unsubscribe_link_encodes_recipient() {
        assert_eq!(
            unsubscribe_link(Some("https://ex.org/u?email={{email}}"), "a+b@x.com"),
            Some("<https://ex.org/u?email=a%2Bb%40x.com>".to_string())
        );
        assert_eq!(unsubscribe_link(None, "a@x.com"), None);
    }

    #[test]
    fn test_compose_headers_and_parts() {
        let sender = sender(Some("https://ex.org/u?email={{email}}"));
        let message = sender
            .compose("reader@example.org", "Monthly news", "<p>Hi reader@example.org</p>")
            .unwrap();
        let text = raw(&message);

        assert!(text.contains("To: reader@example.org"));
        assert!(text.contains("Subject: Monthly news"));
        assert!(text.contains("Reply-To: "));
        assert!(text.contains("<your@email.com>"));
        assert!(text.contains("List-Unsubscribe: <https://ex.org/u?email=reader%40example.org>"));
        assert!(text.contains("List-Unsubscribe-Post: List-Unsubscribe=One-Click"));
        assert!(text.contains("text/plain"));
        assert!(text.contains("text/html"));
    }

    #[test]
    fn test_compose_without_unsubscribe() {
        let sender = sender(None);
        let message = sender.compose("reader@example.org", "Hi", "<p>x</p>").unwrap();
        assert!(!raw(&message).contains("List-Unsubscribe"));
    }

    #[test]
    fn test_compose_rejects_bad_recipient() {
        let sender = sender(None);
        assert_eq!(
            sender.compose("not an address", "Hi", "x").unwrap_err(),
            SendError::InvalidRecipient("not an address".to_string())
        );
    }

    #[tokio::test]
    async fn test_dry_run_records_recipients() {
        let sender = DryRunSender::new();
        sender.send("a@x.com", "Hi", "<p>x</p>").await.unwrap();
        assert!(sender.send("broken", "Hi", "x").await.is_err());

        assert_eq!(sender.recipients(), vec!["a@x.com"]);
    }
}
