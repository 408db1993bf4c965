//! Outbound mail
//!
//! The dispatcher only knows the [`MailSender`] trait: hand it a recipient,
//! a subject and a rendered HTML body, get back success or an error message
//! worth recording on the queue line.
//!
//! - [`SmtpSender`] delivers through an SMTP relay (lettre)
//! - [`DryRunSender`] logs what would have been sent
//! - [`template`] renders the `{{email}}` placeholder and derives the
//!   plain-text alternative

mod sender;
pub mod template;

pub use sender::{DryRunSender, MailSender, SendError, SmtpSender};
pub use template::{html_to_plain_text, render, EMAIL_PLACEHOLDER};
