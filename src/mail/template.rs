//! Message body rendering
//!
//! Templating is a single placeholder substitution. The plain-text part of
//! each message is derived from the rendered HTML.

use lazy_static::lazy_static;
use regex::Regex;

/// Placeholder replaced with the recipient address
pub const EMAIL_PLACEHOLDER: &str = "{{email}}";

lazy_static! {
    static ref LINE_BREAK: Regex = Regex::new(r"(?i)<br\s*/?\s*>").expect("valid regex");
    static ref BLOCK_END: Regex =
        Regex::new(r"(?i)</(?:p|div|h[1-6]|li|tr)>").expect("valid regex");
    static ref ANCHOR: Regex =
        Regex::new(r#"(?i)<a[^>]+href=["']([^"']+)["'][^>]*>([^<]+)</a>"#).expect("valid regex");
    static ref ANY_TAG: Regex = Regex::new(r"<[^>]+>").expect("valid regex");
    static ref BLANK_RUN: Regex = Regex::new(r"\n{3,}").expect("valid regex");
}

/// Substitute the recipient into the template
pub fn render(template: &str, recipient: &str) -> String {
    template.replace(EMAIL_PLACEHOLDER, recipient)
}

/// Best-effort plain-text rendering of an HTML body
///
/// Line breaks and block ends become newlines, links become `text (url)`,
/// remaining tags are stripped and the common entities decoded.
pub fn html_to_plain_text(html: &str) -> String {
    let text = LINE_BREAK.replace_all(html, "\n");
    let text = BLOCK_END.replace_all(&text, "\n\n");
    let text = ANCHOR.replace_all(&text, "$2 ($1)");
    let text = ANY_TAG.replace_all(&text, "");

    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    BLANK_RUN.replace_all(&text, "\n\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_replaces_every_placeholder() {
        let body = render("<p>Hi {{email}}</p><a href=\"x?e={{email}}\">x</a>", "a@b.com");
        assert_eq!(body, "<p>Hi a@b.com</p><a href=\"x?e=a@b.com\">x</a>");
    }

    #[test]
    fn test_plain_text_structure() {
        let html = "<h1>News</h1><p>Hello&nbsp;there,<br/>friend</p><p>Read <a href=\"https://ex.org\">more</a> &amp; enjoy</p>";
        assert_eq!(
            html_to_plain_text(html),
            "News\n\nHello there,\nfriend\n\nRead more (https://ex.org) & enjoy"
        );
    }

    #[test]
    fn test_plain_text_collapses_blank_runs() {
        let html = "<div>a</div>\n\n\n<div>b</div>";
        assert_eq!(html_to_plain_text(html), "a\n\nb");
    }

    #[test]
    fn test_entities_decoded_once() {
        assert_eq!(html_to_plain_text("&amp;lt;"), "&lt;");
    }
}
