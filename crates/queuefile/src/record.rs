//! Queue line codec
//!
//! Parses one queue line into a [`Record`] and formats it back. The field
//! delimiter is `;`, surrounding whitespace is insignificant.

use crate::{Error, Result};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Literal written in place of a timestamp that was never set
pub const ZERO_TIMESTAMP: &str = "0000-00-00T00:00:00Z";

const DELIMITER: char = ';';

/// Delivery status of a single recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Pending,
    Sending,
    Done,
    Failed,
    Unsubscribed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "PENDING",
            Status::Sending => "SENDING",
            Status::Done => "DONE",
            Status::Failed => "FAILED",
            Status::Unsubscribed => "UNSUBSCRIBED",
        }
    }

    /// Whether the record has reached the end of a delivery attempt
    pub fn is_completed(&self) -> bool {
        matches!(self, Status::Done | Status::Failed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(Status::Pending),
            "SENDING" => Ok(Status::Sending),
            "DONE" => Ok(Status::Done),
            "FAILED" => Ok(Status::Failed),
            "UNSUBSCRIBED" => Ok(Status::Unsubscribed),
            other => Err(Error::Parse {
                reason: format!("unknown status '{}'", other),
            }),
        }
    }
}

/// One line of the queue file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Time of the last status change, `None` when never set
    pub timestamp: Option<DateTime<Utc>>,

    pub status: Status,

    /// Recipient address, the job's identity within the file
    pub email: String,

    /// Last delivery error, already sanitized
    pub error: Option<String>,
}

impl Record {
    /// A freshly queued recipient with no timestamp
    pub fn pending(email: impl Into<String>) -> Self {
        Self {
            timestamp: None,
            status: Status::Pending,
            email: email.into(),
            error: None,
        }
    }

    /// Set status and timestamp together. Sub-second precision is dropped so
    /// the stored line parses back to the same value.
    pub fn stamp(&mut self, status: Status, now: DateTime<Utc>) {
        self.status = status;
        self.timestamp = Some(now.trunc_subsecs(0));
    }

    /// Record an error message; an empty message leaves the previous one
    pub fn set_error(&mut self, message: &str) {
        if !message.is_empty() {
            self.error = Some(sanitize_error(message));
        }
    }

    /// Parse a queue line
    ///
    /// Fails when the line has fewer than three fields or an unknown status.
    /// An unparseable timestamp is not a failure; it reads as "never set".
    pub fn parse_line(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Err(Error::Parse {
                reason: "empty line".to_string(),
            });
        }

        let parts: Vec<&str> = line.split(DELIMITER).map(str::trim).collect();
        if parts.len() < 3 {
            return Err(Error::Parse {
                reason: format!("expected at least 3 fields, got {}", parts.len()),
            });
        }

        let timestamp = DateTime::parse_from_rfc3339(parts[0])
            .ok()
            .map(|ts| ts.with_timezone(&Utc).trunc_subsecs(0));

        let error = parts
            .get(3)
            .filter(|e| !e.is_empty())
            .map(|e| e.to_string());

        Ok(Self {
            timestamp,
            status: parts[1].parse()?,
            email: parts[2].to_string(),
            error,
        })
    }

    /// Format as a queue line (without the trailing newline)
    pub fn format(&self) -> String {
        let timestamp = match self.timestamp {
            Some(ts) => ts.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            None => ZERO_TIMESTAMP.to_string(),
        };

        let mut line = format!("{} ; {} ; {}", timestamp, self.status, self.email);
        if let Some(ref error) = self.error {
            if !error.is_empty() {
                line.push_str(" ; ");
                line.push_str(error);
            }
        }
        line
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

impl FromStr for Record {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_line(s)
    }
}

/// Make an error message safe to store as the fourth field
///
/// Semicolons become commas and line breaks become spaces.
pub fn sanitize_error(message: &str) -> String {
    message
        .trim()
        .replace(DELIMITER, ",")
        .replace(|c: char| c == '\r' || c == '\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_parse_full_line() {
        let record =
            Record::parse_line("2024-05-01T09:31:02Z ; FAILED ; carol@example.com ; 550 unknown")
                .unwrap();

        assert_eq!(record.timestamp, Some(ts(9, 31, 2)));
        assert_eq!(record.status, Status::Failed);
        assert_eq!(record.email, "carol@example.com");
        assert_eq!(record.error.as_deref(), Some("550 unknown"));
    }

    #[test]
    fn test_parse_zero_timestamp() {
        let record = Record::parse_line("0000-00-00T00:00:00Z ; PENDING ; bob@example.com").unwrap();
        assert_eq!(record.timestamp, None);
        assert_eq!(record.status, Status::Pending);
        assert_eq!(record.error, None);
    }

    #[test]
    fn test_malformed_timestamp_keeps_record() {
        let record = Record::parse_line("yesterday ; DONE ; a@b.com").unwrap();
        assert_eq!(record.timestamp, None);
        assert_eq!(record.status, Status::Done);
    }

    #[test]
    fn test_offset_timestamp_normalized_to_utc() {
        let record = Record::parse_line("2024-05-01T12:31:02+03:00 ; DONE ; a@b.com").unwrap();
        assert_eq!(record.timestamp, Some(ts(9, 31, 2)));
    }

    #[test]
    fn test_too_few_fields_rejected() {
        assert!(Record::parse_line("foo@bar.com").is_err());
        assert!(Record::parse_line("2024-05-01T09:31:02Z ; PENDING").is_err());
        assert!(Record::parse_line("   ").is_err());
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!(Record::parse_line("0000-00-00T00:00:00Z ; QUEUED ; a@b.com").is_err());
    }

    #[test]
    fn test_format_pending() {
        assert_eq!(
            Record::pending("foo@bar.com").format(),
            "0000-00-00T00:00:00Z ; PENDING ; foo@bar.com"
        );
    }

    #[test]
    fn test_round_trip() {
        let records = vec![
            Record::pending("foo@bar.com"),
            Record {
                timestamp: Some(ts(10, 0, 0)),
                status: Status::Failed,
                email: "x@y.org".to_string(),
                error: Some("connection refused, retry later".to_string()),
            },
            Record {
                timestamp: Some(ts(23, 59, 59)),
                status: Status::Unsubscribed,
                email: "z@y.org".to_string(),
                error: None,
            },
        ];

        for record in records {
            assert_eq!(Record::parse_line(&record.format()).unwrap(), record);
        }
    }

    #[test]
    fn test_stamp_truncates_subseconds() {
        let mut record = Record::pending("a@b.com");
        let now = ts(8, 0, 0) + chrono::Duration::milliseconds(750);
        record.stamp(Status::Sending, now);

        assert_eq!(record.timestamp, Some(ts(8, 0, 0)));
        assert_eq!(Record::parse_line(&record.to_string()).unwrap(), record);
    }

    #[test]
    fn test_set_error_sanitizes() {
        let mut record = Record::pending("a@b.com");
        record.set_error("451; try again\nlater");
        assert_eq!(record.error.as_deref(), Some("451, try again later"));

        record.set_error("");
        assert_eq!(record.error.as_deref(), Some("451, try again later"));
    }

    #[test]
    fn test_status_display_and_parse() {
        for status in [
            Status::Pending,
            Status::Sending,
            Status::Done,
            Status::Failed,
            Status::Unsubscribed,
        ] {
            assert_eq!(status.to_string().parse::<Status>().unwrap(), status);
        }
        assert!(Status::Done.is_completed());
        assert!(!Status::Sending.is_completed());
    }
}
