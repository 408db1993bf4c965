//! Terminal styling utilities
//!
//! Consistent colors for queue statuses and counts in CLI output.

use crossterm::style::{StyledContent, Stylize};
use queuefile::Status;

/// Status colors
/// - PENDING: Cyan
/// - SENDING: Yellow
/// - DONE: Green
/// - FAILED: Red
/// - UNSUBSCRIBED: Dim grey
pub fn status_style(status: Status) -> StyledContent<String> {
    let label = status.to_string();
    match status {
        Status::Pending => label.cyan(),
        Status::Sending => label.yellow(),
        Status::Done => label.green(),
        Status::Failed => label.red(),
        Status::Unsubscribed => label.dark_grey(),
    }
}

/// Zero counts are dimmed
pub fn count(n: usize) -> StyledContent<String> {
    if n == 0 {
        n.to_string().dark_grey()
    } else {
        n.to_string().white()
    }
}

pub fn count_failed(n: usize) -> StyledContent<String> {
    if n == 0 {
        n.to_string().dark_grey()
    } else {
        n.to_string().red()
    }
}

/// Section headers
pub fn header(text: &str) -> StyledContent<String> {
    text.to_string().bold()
}

/// Dim/muted text
pub fn dim(text: &str) -> StyledContent<String> {
    text.to_string().dark_grey()
}

pub fn success(text: &str) -> StyledContent<String> {
    text.to_string().green()
}

pub fn warning(text: &str) -> StyledContent<String> {
    text.to_string().yellow()
}

pub fn error(text: &str) -> StyledContent<String> {
    text.to_string().red()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_style_keeps_label() {
        assert_eq!(status_style(Status::Failed).content(), "FAILED");
        assert_eq!(status_style(Status::Pending).content(), "PENDING");
    }

    #[test]
    fn test_count_content() {
        assert_eq!(count(0).content(), "0");
        assert_eq!(count_failed(4).content(), "4");
    }
}
