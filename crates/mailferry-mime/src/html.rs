//! Conversions between the text and HTML renditions of a body.

use std::sync::LazyLock;

use regex::Regex;

#[allow(clippy::expect_used)]
static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"']+"#).expect("valid URL regex"));

#[allow(clippy::expect_used)]
static TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid HTML tag regex"));

#[allow(clippy::expect_used)]
static BREAK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</(p|div|tr|li|h[1-6])>").expect("valid block tag regex")
});

/// Derives plain text from an HTML body.
///
/// Removes `<script>` and `<style>` blocks, turns line-break and block-closing
/// tags into newlines, strips every other tag and decodes the five common
/// entities (`&amp;`, `&lt;`, `&gt;`, `&quot;`, `&#39;`) plus `&nbsp;`.
#[must_use]
pub fn html_to_text(html: &str) -> String {
    let text = remove_tag_block(html, "script");
    let text = remove_tag_block(&text, "style");
    let text = BREAK_PATTERN.replace_all(&text, "\n");
    let text = TAG_PATTERN.replace_all(&text, "");

    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    // Collapse runs of blank lines
    let mut cleaned = String::with_capacity(decoded.len());
    let mut prev_blank = true;
    for line in decoded.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !prev_blank {
                cleaned.push('\n');
                prev_blank = true;
            }
        } else {
            cleaned.push_str(trimmed);
            cleaned.push('\n');
            prev_blank = false;
        }
    }

    cleaned.trim().to_string()
}

/// Builds a minimal HTML document from plain text.
///
/// The text is escaped, newlines become `<br>` and bare `http(s)` URLs
/// become links. URLs are found in the unescaped text so a quote after a
/// URL never ends up inside the link.
#[must_use]
pub fn text_to_html(text: &str) -> String {
    let mut linked = String::with_capacity(text.len());
    let mut last = 0;
    for found in URL_PATTERN.find_iter(text) {
        linked.push_str(&escape_html(&text[last..found.start()]));
        let url = escape_html(found.as_str());
        linked.push_str(&format!(
            r#"<a href="{url}" target="_blank" rel="noopener noreferrer">{url}</a>"#
        ));
        last = found.end();
    }
    linked.push_str(&escape_html(&text[last..]));

    let body = linked.replace("\r\n", "\n").replace('\n', "<br>\n");

    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"></head><body><div style=\"white-space: pre-wrap; font-family: sans-serif;\">{body}</div></body></html>"
    )
}

/// Escapes the characters that are significant in HTML text.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Removes an entire tag block (e.g. `<script>…</script>`), case-insensitively.
fn remove_tag_block(html: &str, tag: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let open = format!("<{tag}");
    let close = format!("</{tag}>");

    let mut result = String::with_capacity(html.len());
    let mut pos = 0;

    while let Some(start) = lower[pos..].find(&open).map(|i| i + pos) {
        result.push_str(&html[pos..start]);
        match lower[start..].find(&close) {
            Some(end) => pos = start + end + close.len(),
            None => {
                pos = html.len();
                break;
            }
        }
    }

    result.push_str(&html[pos..]);
    result
}
