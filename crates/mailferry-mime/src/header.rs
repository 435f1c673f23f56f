//! Header block parsing and recipient extraction.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::encoding::decode_encoded_words;

/// Header fields that name the envelope or visible recipient, in probe order.
pub const RECIPIENT_HEADERS: [&str; 4] = ["delivered-to", "x-original-to", "envelope-to", "to"];

#[allow(clippy::expect_used)]
static ADDRESS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,}").expect("valid address regex")
});

/// Collection of email headers keyed by lower-cased field name.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    headers: HashMap<String, Vec<String>>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header value.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into().to_lowercase();
        self.headers.entry(name).or_default().push(value.into());
    }

    /// Gets the first value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_lowercase())
            .and_then(|v| v.first().map(String::as_str))
    }

    /// Gets all values for a header.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .get(&name.to_lowercase())
            .map(|v| v.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Parses a raw header block.
    ///
    /// Stops at the first empty line. A line starting with a space or tab
    /// continues the previous field and is appended with a single space.
    /// Lines that are neither a field nor a continuation are skipped.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut headers = Self::new();
        let mut current_name: Option<String> = None;
        let mut current_value = String::new();

        for line in text.lines() {
            if line.is_empty() {
                break;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                if current_name.is_some() {
                    let continuation = line.trim();
                    if !continuation.is_empty() {
                        current_value.push(' ');
                        current_value.push_str(continuation);
                    }
                }
                continue;
            }

            if let Some(name) = current_name.take() {
                headers.add(name, current_value.trim());
                current_value.clear();
            }

            if let Some((name, value)) = line.split_once(':') {
                let name = name.trim();
                if !name.is_empty() && !name.contains(' ') {
                    current_name = Some(name.to_string());
                    current_value = value.trim().to_string();
                }
            }
        }

        if let Some(name) = current_name {
            headers.add(name, current_value.trim());
        }

        headers
    }

    /// Returns the decoded, trimmed Subject, if present.
    #[must_use]
    pub fn subject(&self) -> Option<String> {
        self.get("subject")
            .map(|raw| decode_encoded_words(raw).trim().to_string())
    }

    /// Returns the first address of the From field, lower-cased.
    ///
    /// Falls back to the decoded raw value when it has no address in it.
    #[must_use]
    pub fn from_address(&self) -> Option<String> {
        let raw = self.get("from")?;
        let decoded = decode_encoded_words(raw);
        Some(
            extract_addresses(&decoded)
                .into_iter()
                .next()
                .unwrap_or_else(|| decoded.trim().to_string()),
        )
    }
}

/// Returns every email-looking token in `text`, lower-cased, in order.
#[must_use]
pub fn extract_addresses(text: &str) -> Vec<String> {
    ADDRESS_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().trim_matches('.').to_lowercase())
        .collect()
}

/// Collects candidate recipient addresses for a message.
///
/// Addresses from `Delivered-To`, `X-Original-To`, `Envelope-To` and `To`
/// come first, in that order. Every other address found anywhere in the
/// raw header block follows, which covers malformed or unusual layouts.
/// Duplicates are removed, keeping the first occurrence.
#[must_use]
pub fn extract_recipients(headers: &Headers, raw_block: &str) -> Vec<String> {
    let mut recipients: Vec<String> = Vec::new();
    let mut push = |address: String| {
        if !recipients.contains(&address) {
            recipients.push(address);
        }
    };

    for name in RECIPIENT_HEADERS {
        for value in headers.get_all(name) {
            extract_addresses(value).into_iter().for_each(&mut push);
        }
    }
    extract_addresses(raw_block).into_iter().for_each(&mut push);

    recipients
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_add_get() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("content-type"), Some("text/plain"));
    }

    #[test]
    fn test_headers_parse() {
        let text = concat!(
            "From: sender@example.com\r\n",
            "To: recipient@example.com\r\n",
            "Subject: Test Message\r\n",
            "Content-Type: text/plain;\r\n",
            " charset=utf-8\r\n",
            "\r\n",
            "Body: not a header\r\n"
        );

        let headers = Headers::parse(text);
        assert_eq!(headers.get("From"), Some("sender@example.com"));
        assert_eq!(headers.get("Subject"), Some("Test Message"));
        assert_eq!(
            headers.get("Content-Type"),
            Some("text/plain; charset=utf-8")
        );
        assert!(headers.get("body").is_none());
    }

    #[test]
    fn test_unfold_many_continuations() {
        let text = "Received: from a\r\n\tby b\r\n\twith c\r\n  id d\r\nX-Tail: yes\r\n";
        let headers = Headers::parse(text);
        assert_eq!(headers.get("received"), Some("from a by b with c id d"));
        assert_eq!(headers.get("x-tail"), Some("yes"));
    }

    #[test]
    fn test_repeated_fields_kept() {
        let text = "Delivered-To: a@x.com\nDelivered-To: b@x.com\n";
        let headers = Headers::parse(text);
        assert_eq!(headers.get_all("delivered-to"), vec!["a@x.com", "b@x.com"]);
    }

    #[test]
    fn test_subject_encoded_words() {
        let text = "Subject: =?UTF-8?B?VmVyaWZ5?=\r\n =?UTF-8?Q?_your_account?=  \r\n";
        let headers = Headers::parse(text);
        assert_eq!(headers.subject().as_deref(), Some("Verify your account"));
    }

    #[test]
    fn test_from_address() {
        let headers = Headers::parse("From: \"Shop\" <News@Shop.Example>\r\n");
        assert_eq!(headers.from_address().as_deref(), Some("news@shop.example"));

        let headers = Headers::parse("From: MAILER-DAEMON\r\n");
        assert_eq!(headers.from_address().as_deref(), Some("MAILER-DAEMON"));
    }

    #[test]
    fn test_extract_recipients_priority_order() {
        let raw = concat!(
            "To: Visible <visible@temp.example>\r\n",
            "Delivered-To: inbox@catchall.example\r\n",
            "X-Original-To: Original@Temp.Example\r\n",
            "Received: for <hidden@relay.example>; Mon, 1 Jan 2024\r\n",
        );
        let headers = Headers::parse(raw);
        let recipients = extract_recipients(&headers, raw);
        assert_eq!(
            recipients,
            vec![
                "inbox@catchall.example",
                "original@temp.example",
                "visible@temp.example",
                "hidden@relay.example",
            ]
        );
    }

    #[test]
    fn test_extract_recipients_from_malformed_block() {
        let raw = "garbage line with user@temp.example inside\r\nTo undisclosed\r\n";
        let headers = Headers::parse(raw);
        assert_eq!(extract_recipients(&headers, raw), vec!["user@temp.example"]);
    }
}
