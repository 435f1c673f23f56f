//! Transfer-encoding and header-encoding decoders.
//!
//! Supports Base64, Quoted-Printable and RFC 2047 encoded-words. All decoders
//! here are byte-accurate and tolerate the whitespace and line-break noise
//! that real mail carries.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

use crate::error::{Error, Result};

/// Base64 engine that accepts padded, unpadded and over-long trailing bits.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Decodes Base64 data, ignoring whitespace and line breaks.
///
/// Any character outside the Base64 alphabet is dropped before decoding, as
/// are `=` padding characters. A dangling single symbol at the end (which
/// cannot encode a full byte) is discarded.
///
/// # Errors
///
/// Returns an error if nothing decodable remains.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let mut cleaned: Vec<u8> = data
        .bytes()
        .filter(|b| b.is_ascii_alphanumeric() || *b == b'+' || *b == b'/')
        .collect();

    if cleaned.len() % 4 == 1 {
        cleaned.pop();
    }
    if cleaned.is_empty() && !data.trim().is_empty() && !data.trim().chars().all(|c| c == '=') {
        return Err(Error::InvalidEncoding("no base64 content".to_string()));
    }

    LENIENT.decode(&cleaned).map_err(Into::into)
}

/// Decodes Quoted-Printable data (RFC 2045).
///
/// Soft line breaks (`=` at end of line, optionally followed by trailing
/// whitespace) are removed. Malformed escapes are kept verbatim rather than
/// rejected, so this never fails.
#[must_use]
pub fn decode_quoted_printable(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        let byte = input[i];
        if byte != b'=' {
            out.push(byte);
            i += 1;
            continue;
        }

        // Soft line break, tolerating trailing spaces before the newline
        let mut j = i + 1;
        while j < input.len() && (input[j] == b' ' || input[j] == b'\t') {
            j += 1;
        }
        if input.get(j) == Some(&b'\r') && input.get(j + 1) == Some(&b'\n') {
            i = j + 2;
            continue;
        }
        if input.get(j) == Some(&b'\n') {
            i = j + 1;
            continue;
        }

        match (
            input.get(i + 1).and_then(|b| hex_value(*b)),
            input.get(i + 2).and_then(|b| hex_value(*b)),
        ) {
            (Some(hi), Some(lo)) => {
                out.push((hi << 4) | lo);
                i += 3;
            }
            _ => {
                out.push(b'=');
                i += 1;
            }
        }
    }

    out
}

const fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Converts bytes in the named charset to a Rust string.
///
/// Unknown or missing labels are treated as UTF-8; invalid sequences are
/// replaced rather than rejected.
#[must_use]
pub fn decode_charset(bytes: &[u8], charset: Option<&str>) -> String {
    let label = charset.map(|c| c.trim().trim_matches('"')).unwrap_or_default();

    match encoding_rs::Encoding::for_label(label.as_bytes()) {
        Some(encoding) if encoding != encoding_rs::UTF_8 => {
            let (text, _, _) = encoding.decode(bytes);
            text.into_owned()
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Decodes every RFC 2047 encoded-word in a header value.
///
/// Each `=?charset?B|Q?text?=` sequence is decoded on its own. Whitespace
/// that only separates two encoded-words is dropped; sequences with an
/// unknown encoding letter pass through unchanged.
#[must_use]
pub fn decode_encoded_words(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut after_word = false;

    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);

        if let Some((decoded, consumed)) = decode_encoded_word(candidate) {
            if !(after_word && before.chars().all(char::is_whitespace)) {
                out.push_str(before);
            }
            out.push_str(&decoded);
            rest = &candidate[consumed..];
            after_word = true;
        } else {
            out.push_str(before);
            out.push_str("=?");
            rest = &candidate[2..];
            after_word = false;
        }
    }

    out.push_str(rest);
    out
}

/// Decodes one encoded-word at the start of `s`.
///
/// Returns the decoded text and the number of bytes consumed.
fn decode_encoded_word(s: &str) -> Option<(String, usize)> {
    let inner = s.strip_prefix("=?")?;
    let charset_end = inner.find('?')?;
    let charset = &inner[..charset_end];
    let after_charset = &inner[charset_end + 1..];

    if after_charset.get(1..2)? != "?" {
        return None;
    }
    let encoding = after_charset.as_bytes()[0].to_ascii_uppercase();
    let payload_and_rest = &after_charset[2..];
    let payload_end = payload_and_rest.find("?=")?;
    let payload = &payload_and_rest[..payload_end];

    if charset.is_empty() || charset.contains(char::is_whitespace) || payload.contains(' ') {
        return None;
    }

    let bytes = match encoding {
        b'B' => decode_base64(payload).ok()?,
        b'Q' => decode_quoted_printable(payload.replace('_', " ").as_bytes()),
        _ => return None,
    };

    // RFC 2231 language suffix: charset*lang
    let charset = charset.split('*').next().unwrap_or(charset);
    let consumed = 2 + charset_end + 1 + 2 + payload_end + 2;
    Some((decode_charset(&bytes, Some(charset)), consumed))
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
    use proptest::prelude::*;

    #[test]
    fn test_base64_decode() {
        assert_eq!(decode_base64("SGVsbG8sIFdvcmxkIQ==").unwrap(), b"Hello, World!");
    }

    #[test]
    fn test_base64_tolerates_line_breaks() {
        let wrapped = "SGVs\r\nbG8s\n IFdv\tcmxk\r\nIQ==\r\n";
        assert_eq!(decode_base64(wrapped).unwrap(), b"Hello, World!");
    }

    #[test]
    fn test_base64_missing_padding() {
        assert_eq!(decode_base64("SGk").unwrap(), b"Hi");
    }

    #[test]
    fn test_base64_utf8_split_across_lines() {
        // "Grüße" with the line break inside a multi-byte sequence
        let decoded = decode_base64("R3L\r\nDvMOfZQ==").unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), "Grüße");
    }

    #[test]
    fn test_quoted_printable_decode() {
        assert_eq!(decode_quoted_printable(b"Hello, World!"), b"Hello, World!");
        assert_eq!(decode_quoted_printable(b"H=C3=A9llo"), "Héllo".as_bytes());
    }

    #[test]
    fn test_quoted_printable_soft_line_break() {
        assert_eq!(decode_quoted_printable(b"Hello=\r\nWorld"), b"HelloWorld");
        assert_eq!(decode_quoted_printable(b"Hello=\nWorld"), b"HelloWorld");
        assert_eq!(decode_quoted_printable(b"Hello=  \r\nWorld"), b"HelloWorld");
    }

    #[test]
    fn test_quoted_printable_malformed_escape_kept() {
        assert_eq!(decode_quoted_printable(b"100=ZZ off"), b"100=ZZ off");
        assert_eq!(decode_quoted_printable(b"trailing="), b"trailing=");
    }

    #[test]
    fn test_decode_charset_latin1() {
        assert_eq!(decode_charset(&[0x63, 0x61, 0x66, 0xE9], Some("iso-8859-1")), "café");
        assert_eq!(decode_charset("café".as_bytes(), None), "café");
        assert_eq!(decode_charset(b"plain", Some("x-unknown")), "plain");
    }

    #[test]
    fn test_encoded_word_base64() {
        assert_eq!(decode_encoded_words("=?utf-8?B?SMOpbGxv?="), "Héllo");
    }

    #[test]
    fn test_encoded_word_q_with_underscores() {
        assert_eq!(
            decode_encoded_words("=?UTF-8?Q?Your_code_is_=E2=9C=93?="),
            "Your code is ✓"
        );
    }

    #[test]
    fn test_multiple_encoded_words() {
        let subject = "=?utf-8?B?SGVsbG8g?= =?utf-8?Q?W=C3=B6rld?= and more";
        assert_eq!(decode_encoded_words(subject), "Hello Wörld and more");
    }

    #[test]
    fn test_unknown_encoding_passes_through() {
        let subject = "=?utf-8?X?abc?= tail";
        assert_eq!(decode_encoded_words(subject), subject);
    }

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(decode_encoded_words("Plain subject =? odd"), "Plain subject =? odd");
    }

    proptest! {
        #[test]
        fn quoted_printable_never_panics(input in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode_quoted_printable(&input);
        }

        #[test]
        fn encoded_words_never_panic(input in "\\PC{0,80}") {
            let _ = decode_encoded_words(&input);
        }

        #[test]
        fn base64_ignores_inserted_whitespace(data in proptest::collection::vec(any::<u8>(), 0..128), every in 1usize..16) {
            let encoded = LENIENT.encode(&data);
            let noisy: String = encoded
                .chars()
                .enumerate()
                .flat_map(|(i, c)| if i % every == 0 { vec!['\r', '\n', c] } else { vec![c] })
                .collect();
            prop_assert_eq!(decode_base64(&noisy).unwrap(), data);
        }
    }
}
