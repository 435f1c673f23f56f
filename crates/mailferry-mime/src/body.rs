//! Body extraction for fetched messages.
//!
//! The parser walks the raw message as a tree of byte ranges into the
//! original buffer: an entity is split into its header block and body, and a
//! multipart body is split on its boundary into child entities which are
//! walked the same way. No part is copied until it is decoded.

use std::ops::Range;

use crate::content_type::ContentType;
use crate::encoding::{decode_base64, decode_charset, decode_quoted_printable};
use crate::header::Headers;
use crate::html::{html_to_text, text_to_html};

/// Maximum stored length of the text rendition, in characters.
pub const MAX_TEXT_CHARS: usize = 10_000;

/// Maximum stored length of the HTML rendition, in characters.
pub const MAX_HTML_CHARS: usize = 50_000;

/// Nesting limit for multipart recursion.
const MAX_DEPTH: usize = 16;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// 7bit, 8bit, binary or anything unrecognized: passed through.
    Identity,
}

impl TransferEncoding {
    /// Parses transfer encoding from a header value.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            _ => Self::Identity,
        }
    }

    /// Decodes raw part bytes. Undecodable Base64 falls back to the raw bytes.
    #[must_use]
    pub fn decode(self, raw: &[u8]) -> Vec<u8> {
        match self {
            Self::Base64 => {
                decode_base64(&String::from_utf8_lossy(raw)).unwrap_or_else(|_| raw.to_vec())
            }
            Self::QuotedPrintable => decode_quoted_printable(raw),
            Self::Identity => raw.to_vec(),
        }
    }
}

/// Decoded text and HTML renditions of a message body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyParts {
    /// Plain-text rendition.
    pub text: String,
    /// HTML rendition.
    pub html: String,
}

impl BodyParts {
    /// Caps text and HTML at their storage limits.
    #[must_use]
    pub fn truncated(self) -> Self {
        Self {
            text: truncate_chars(self.text, MAX_TEXT_CHARS),
            html: truncate_chars(self.html, MAX_HTML_CHARS),
        }
    }
}

/// Extracts the text and HTML renditions of a raw message.
///
/// The first `text/plain` and the first `text/html` part win, at any
/// nesting depth. A missing rendition is synthesized from the other one;
/// when neither can be found the raw content becomes the text.
#[must_use]
pub fn parse_body(raw: &[u8]) -> BodyParts {
    let range = strip_protocol_artifacts(raw);
    let mut parts = BodyParts::default();
    collect_entity(raw, range.clone(), &mut parts, 0);

    let has_text = !parts.text.trim().is_empty();
    let has_html = !parts.html.trim().is_empty();

    if !has_text && has_html {
        parts.text = html_to_text(&parts.html);
    }
    if !has_html && has_text {
        parts.html = text_to_html(&parts.text);
    }
    if !has_text && !has_html {
        parts.text = String::from_utf8_lossy(&raw[range]).into_owned();
    }

    parts
}

/// Walks one entity (message or part) and records any text/html it holds.
fn collect_entity(buf: &[u8], range: Range<usize>, out: &mut BodyParts, depth: usize) {
    if depth > MAX_DEPTH || range.is_empty() {
        return;
    }

    let (header_range, body_range) = split_header_body(buf, range);
    let headers = Headers::parse(&String::from_utf8_lossy(&buf[header_range]));
    let content_type = ContentType::parse_or_default(headers.get("content-type"));

    let boundary = content_type
        .boundary()
        .map(str::to_string)
        .or_else(|| {
            let may_be_multipart =
                content_type.is_multipart() || headers.get("content-type").is_none();
            (depth == 0 && may_be_multipart)
                .then(|| detect_boundary(&buf[body_range.clone()]))
                .flatten()
        });

    if let Some(boundary) = boundary {
        let children = split_multipart(buf, body_range.clone(), &boundary);
        if !children.is_empty() {
            for child in children {
                collect_entity(buf, child, out, depth + 1);
            }
            return;
        }
    }

    if is_attachment(&headers) {
        return;
    }

    let wants_text = content_type.is_text_plain() && out.text.is_empty();
    let wants_html = content_type.is_text_html() && out.html.is_empty();
    if !wants_text && !wants_html {
        return;
    }

    let encoding = headers
        .get("content-transfer-encoding")
        .map_or(TransferEncoding::Identity, TransferEncoding::parse);
    let decoded = encoding.decode(&buf[body_range]);
    let text = strip_mime_scaffolding(&decode_charset(&decoded, content_type.charset()));

    if wants_text {
        out.text = text;
    } else {
        out.html = text;
    }
}

fn is_attachment(headers: &Headers) -> bool {
    headers
        .get("content-disposition")
        .is_some_and(|d| d.trim_start().to_lowercase().starts_with("attachment"))
}

/// Splits an entity into header block and body at the first blank line.
///
/// An entity whose first line is not a header field has no header block.
fn split_header_body(buf: &[u8], range: Range<usize>) -> (Range<usize>, Range<usize>) {
    let slice = &buf[range.clone()];
    let first_line_end = slice.iter().position(|&b| b == b'\n').unwrap_or(slice.len());
    if !looks_like_header_line(&slice[..first_line_end]) {
        return (range.start..range.start, range);
    }

    let crlf = find(slice, b"\r\n\r\n").map(|i| (i, i + 4));
    let lf = find(slice, b"\n\n").map(|i| (i, i + 2));
    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };

    match split {
        Some((header_end, body_start)) => (
            range.start..range.start + header_end,
            range.start + body_start..range.end,
        ),
        None => (range.clone(), range.end..range.end),
    }
}

fn looks_like_header_line(line: &[u8]) -> bool {
    let Some(colon) = line.iter().position(|&b| b == b':') else {
        return false;
    };
    colon > 0
        && line[..colon]
            .iter()
            .all(|&b| b.is_ascii_graphic() && b != b':')
}

/// Finds the boundary of a multipart body whose headers did not declare one.
///
/// Looks for a `boundary=` marker first, then for a leading `--token` line.
fn detect_boundary(body: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(body);
    let lower = text.to_ascii_lowercase();

    if let Some(at) = lower.find("boundary=") {
        let value = &text[at + "boundary=".len()..];
        let value = if let Some(quoted) = value.strip_prefix('"') {
            quoted.split('"').next().unwrap_or_default()
        } else {
            value
                .split(|c: char| c == ';' || c.is_whitespace())
                .next()
                .unwrap_or_default()
        };
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }

    let first = text.lines().find(|l| !l.trim().is_empty())?.trim_end();
    let token = first.strip_prefix("--")?;
    (is_boundary_token(token) && !token.ends_with("--")).then(|| token.to_string())
}

/// Splits a multipart body into the byte ranges of its parts.
///
/// A delimiter only counts at the start of a line and must be followed by
/// a line break, whitespace, `--` or the end of input. Anything after the
/// closing delimiter (the epilogue) is dropped, as is the preamble.
fn split_multipart(buf: &[u8], range: Range<usize>, boundary: &str) -> Vec<Range<usize>> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let mut positions = Vec::new();
    let mut search = range.start;
    while let Some(found) = find(&buf[search..range.end], delimiter) {
        let at = search + found;
        let after = at + delimiter.len();
        let at_line_start = at == range.start || buf[at - 1] == b'\n';
        let terminated = after >= range.end
            || matches!(buf[after], b'\r' | b'\n' | b' ' | b'\t' | b'-');
        if at_line_start && terminated {
            positions.push(at);
        }
        search = after;
    }

    let mut parts = Vec::new();
    for (i, &start) in positions.iter().enumerate() {
        let after = start + delimiter.len();
        if buf[after..range.end].starts_with(b"--") {
            break;
        }
        let content_start = buf[after..range.end]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(range.end, |p| after + p + 1);
        let content_end = positions
            .get(i + 1)
            .map_or(range.end, |&next| trim_line_break(buf, content_start, next));
        if content_start < content_end {
            parts.push(content_start..content_end);
        }
    }

    parts
}

/// Moves `end` back over the line break that precedes a delimiter.
fn trim_line_break(buf: &[u8], min: usize, mut end: usize) -> usize {
    if end > min && buf[end - 1] == b'\n' {
        end -= 1;
        if end > min && buf[end - 1] == b'\r' {
            end -= 1;
        }
    }
    end.max(min)
}

/// Drops FETCH framing that leaked around a literal.
///
/// Only a blob that opens with a `* N FETCH (...{n}` line is treated as
/// framed. The literal then ends after its declared `n` bytes; without a
/// usable count, trailing `)` and tagged completion lines are dropped.
/// Anything else is message content and is left untouched.
fn strip_protocol_artifacts(raw: &[u8]) -> Range<usize> {
    if !raw.starts_with(b"* ") {
        return 0..raw.len();
    }
    let line_end = raw.iter().position(|&b| b == b'\n').unwrap_or(raw.len());
    let first_line = &raw[..line_end];
    if find(first_line, b"FETCH").is_none() {
        return 0..raw.len();
    }

    let start = (line_end + 1).min(raw.len());
    if let Some(size) = literal_size(first_line) {
        return start..start.saturating_add(size).min(raw.len());
    }

    let mut end = raw.len();
    loop {
        while end > start && raw[end - 1].is_ascii_whitespace() {
            end -= 1;
        }
        let line_start = raw[start..end]
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(start, |p| start + p + 1);
        let line = String::from_utf8_lossy(&raw[line_start..end]);
        if line_start > start && is_protocol_line(line.trim()) {
            end = line_start;
        } else {
            break;
        }
    }

    start..end
}

/// Reads the `{n}` literal count at the end of a FETCH line.
fn literal_size(line: &[u8]) -> Option<usize> {
    let line = std::str::from_utf8(line).ok()?.trim_end();
    let digits = line.strip_suffix('}')?;
    let open = digits.rfind('{')?;
    digits[open + 1..].parse().ok()
}

fn is_protocol_line(line: &str) -> bool {
    if line == ")" {
        return true;
    }
    let mut words = line.split_whitespace();
    let (Some(tag), Some(status)) = (words.next(), words.next()) else {
        return false;
    };
    let tagged = tag.len() > 1
        && tag.starts_with('A')
        && tag[1..].bytes().all(|b| b.is_ascii_digit());
    tagged && matches!(status, "OK" | "NO" | "BAD")
}

/// Removes boundary lines and stray part headers exposed by decoding.
fn strip_mime_scaffolding(text: &str) -> String {
    let kept: Vec<&str> = text
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            let lower = trimmed.to_ascii_lowercase();
            let is_part_header = lower.starts_with("content-type:")
                || lower.starts_with("content-transfer-encoding:");
            let is_boundary = trimmed
                .strip_prefix("--")
                .is_some_and(|t| t.len() >= 8 && is_boundary_token(t));
            !is_part_header && !is_boundary
        })
        .collect();

    kept.join("\n").trim().to_string()
}

/// RFC 2046 boundary characters, with at least one alphanumeric.
fn is_boundary_token(token: &str) -> bool {
    !token.is_empty()
        && token.bytes().any(|b| b.is_ascii_alphanumeric())
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"'()+_,-./:=?".contains(&b))
}

fn truncate_chars(s: String, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((cut, _)) => s[..cut].to_string(),
        None => s,
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
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
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("BASE64"), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse(" quoted-printable "),
            TransferEncoding::QuotedPrintable
        );
        assert_eq!(TransferEncoding::parse("8bit"), TransferEncoding::Identity);
    }

    #[test]
    fn test_single_part_plain() {
        let raw = b"From: a@b.com\r\nSubject: Hi\r\n\r\nHello there\r\n";
        let parts = parse_body(raw);
        assert_eq!(parts.text, "Hello there");
        assert!(parts.html.contains("Hello there"));
    }

    #[test]
    fn test_multipart_base64_html_and_qp_text() {
        let raw = concat!(
            "From: sender@example.com\r\n",
            "Content-Type: multipart/alternative; boundary=\"XYZ\"\r\n",
            "\r\n",
            "This is a multi-part message.\r\n",
            "--XYZ\r\n",
            "Content-Type: text/plain; charset=utf-8\r\n",
            "Content-Transfer-Encoding: quoted-printable\r\n",
            "\r\n",
            "Caf=C3=A9 code: 4=\r\n",
            "21\r\n",
            "--XYZ\r\n",
            "Content-Type: text/html; charset=utf-8\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "PHA+SGVsbG8gPGI+\r\n",
            "V29ybGQ8L2I+PC9wPg==\r\n",
            "--XYZ--\r\n",
            "epilogue\r\n",
        );
        let parts = parse_body(raw.as_bytes());
        assert_eq!(parts.text, "Café code: 421");
        assert_eq!(parts.html, "<p>Hello <b>World</b></p>");
    }

    #[test]
    fn test_nested_multipart_with_attachment() {
        let raw = concat!(
            "Content-Type: multipart/mixed; boundary=outer\r\n",
            "\r\n",
            "--outer\r\n",
            "Content-Type: multipart/alternative; boundary=inner\r\n",
            "\r\n",
            "--inner\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "Nested text\r\n",
            "--inner\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<p>Nested html</p>\r\n",
            "--inner--\r\n",
            "--outer\r\n",
            "Content-Type: text/plain; name=notes.txt\r\n",
            "Content-Disposition: attachment; filename=notes.txt\r\n",
            "\r\n",
            "attached file\r\n",
            "--outer--\r\n",
        );
        let parts = parse_body(raw.as_bytes());
        assert_eq!(parts.text, "Nested text");
        assert_eq!(parts.html, "<p>Nested html</p>");
    }

    #[test]
    fn test_first_part_of_each_type_wins() {
        let raw = concat!(
            "Content-Type: multipart/mixed; boundary=b1\n",
            "\n",
            "--b1\n",
            "Content-Type: text/plain\n",
            "\n",
            "first\n",
            "--b1\n",
            "Content-Type: text/plain\n",
            "\n",
            "second\n",
            "--b1--\n",
        );
        let parts = parse_body(raw.as_bytes());
        assert_eq!(parts.text, "first");
    }

    #[test]
    fn test_boundary_detected_from_leading_line() {
        let raw = concat!(
            "--==abc123==\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<p>Only html &amp; more</p>\r\n",
            "--==abc123==--\r\n",
        );
        let parts = parse_body(raw.as_bytes());
        assert_eq!(parts.html, "<p>Only html &amp; more</p>");
        assert_eq!(parts.text, "Only html & more");
    }

    #[test]
    fn test_boundary_prefix_does_not_split() {
        let raw = concat!(
            "Content-Type: multipart/alternative; boundary=abc\r\n",
            "\r\n",
            "--abc\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "line --abcdef stays\r\n",
            "--abcdef is not a delimiter\r\n",
            "--abc--\r\n",
        );
        let parts = parse_body(raw.as_bytes());
        assert!(parts.text.contains("--abcdef is not a delimiter"));
    }

    #[test]
    fn test_raw_fallback_when_nothing_decodable() {
        let raw = b"Content-Type: application/octet-stream\r\n\r\nBINARYDATA";
        let parts = parse_body(raw);
        assert!(parts.text.contains("BINARYDATA"));
        assert!(parts.html.is_empty());
    }

    #[test]
    fn test_protocol_artifacts_stripped() {
        let raw = b"* 3 FETCH (BODY[] {25}\r\nSubject: x\r\n\r\nbody text\r\n)\r\nA0007 OK FETCH completed\r\n";
        let parts = parse_body(raw);
        assert_eq!(parts.text, "body text");
    }

    #[test]
    fn test_leaked_framing_without_count_is_stripped() {
        let raw = b"* 3 FETCH (BODY[]\r\nSubject: x\r\n\r\nbody text\r\n)\r\nA0007 OK FETCH completed\r\n";
        let parts = parse_body(raw);
        assert_eq!(parts.text, "body text");
    }

    #[test]
    fn test_body_ending_in_tagged_status_is_kept() {
        let raw = b"Subject: x\r\n\r\nServer log:\r\nA0042 OK LOGIN completed\r\n";
        let parts = parse_body(raw);
        assert_eq!(parts.text, "Server log:\nA0042 OK LOGIN completed");
    }

    #[test]
    fn test_body_ending_in_closing_paren_is_kept() {
        let raw = b"Subject: x\r\n\r\nPick one (a or b\r\n)\r\n";
        let parts = parse_body(raw);
        assert_eq!(parts.text, "Pick one (a or b\n)");
    }

    #[test]
    fn test_scaffolding_removed_after_decode() {
        let raw = concat!(
            "Content-Type: text/plain\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            // "--leftoverBoundary1\nContent-Type: text/plain\nReal text"
            "LS1sZWZ0b3ZlckJvdW5kYXJ5MQpDb250ZW50LVR5cGU6IHRleHQvcGxhaW4KUmVhbCB0ZXh0\r\n",
        );
        let parts = parse_body(raw.as_bytes());
        assert_eq!(parts.text, "Real text");
    }

    #[test]
    fn test_latin1_part() {
        let mut raw = b"Content-Type: text/plain; charset=iso-8859-1\r\n\r\ncaf".to_vec();
        raw.push(0xE9);
        assert_eq!(parse_body(&raw).text, "café");
    }

    #[test]
    fn test_truncation_limits() {
        let parts = BodyParts {
            text: "é".repeat(MAX_TEXT_CHARS + 5),
            html: "x".repeat(MAX_HTML_CHARS + 1),
        }
        .truncated();
        assert_eq!(parts.text.chars().count(), MAX_TEXT_CHARS);
        assert_eq!(parts.html.len(), MAX_HTML_CHARS);
    }
}
