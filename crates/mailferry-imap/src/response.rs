//! Extraction of the few response shapes a polling session reads.
//!
//! Works on [`ResponseLine`]s produced by the framed reader. Only the text
//! outside literals is inspected, so message content can never be mistaken
//! for protocol data.

use crate::connection::ResponseLine;
use crate::{Error, Result};

/// Completion status of a tagged response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Command succeeded.
    Ok,
    /// Command failed.
    No,
    /// Command was rejected as malformed.
    Bad,
}

/// Tagged completion: status plus the human-readable text after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Completion status.
    pub status: Status,
    /// Remaining text (may include a bracketed response code).
    pub text: String,
}

/// Parses `<tag> OK|NO|BAD <text>`.
#[must_use]
pub fn parse_completion(line: &ResponseLine, tag: &str) -> Option<Completion> {
    if !line.is_tagged(tag) {
        return None;
    }
    let rest = String::from_utf8_lossy(&line.head()[tag.len() + 1..]).into_owned();
    let (word, text) = rest.split_once(' ').unwrap_or((rest.as_str(), ""));
    let status = match word.to_ascii_uppercase().as_str() {
        "OK" => Status::Ok,
        "NO" => Status::No,
        "BAD" => Status::Bad,
        _ => return None,
    };
    Some(Completion {
        status,
        text: text.trim().to_string(),
    })
}

/// Validates the server greeting.
///
/// `* OK` and `* PREAUTH` are accepted, `* BYE` means the server refused
/// the connection.
pub fn check_greeting(line: &ResponseLine) -> Result<()> {
    let text = String::from_utf8_lossy(line.head());
    let upper = text.to_ascii_uppercase();
    if upper.starts_with("* OK") || upper.starts_with("* PREAUTH") {
        Ok(())
    } else if upper.starts_with("* BYE") {
        Err(Error::Bye(text.get(5..).unwrap_or("").trim().to_string()))
    } else {
        Err(Error::Protocol(format!("unexpected greeting: {text}")))
    }
}

/// Finds the `* N EXISTS` count among untagged responses.
#[must_use]
pub fn parse_exists(lines: &[ResponseLine]) -> Option<u32> {
    lines.iter().rev().find_map(|line| {
        let text = std::str::from_utf8(line.head()).ok()?;
        let mut words = text.split_ascii_whitespace();
        if words.next()? != "*" {
            return None;
        }
        let count = words.next()?.parse().ok()?;
        words
            .next()
            .filter(|w| w.eq_ignore_ascii_case("EXISTS"))
            .map(|_| count)
    })
}

/// Collects the ids of every `* SEARCH <id …>` response.
#[must_use]
pub fn parse_search(lines: &[ResponseLine]) -> Vec<u32> {
    let mut ids = Vec::new();
    for line in lines {
        let Ok(text) = std::str::from_utf8(line.head()) else {
            continue;
        };
        let mut words = text.split_ascii_whitespace();
        if words.next() != Some("*")
            || !words.next().is_some_and(|w| w.eq_ignore_ascii_case("SEARCH"))
        {
            continue;
        }
        ids.extend(words.filter_map(|w| w.parse::<u32>().ok()));
    }
    ids
}

/// Returns the literal payload of the `* <seq> FETCH` response.
///
/// The payload is sliced by the declared octet count; nothing inside it is
/// interpreted.
#[must_use]
pub fn fetch_literal(lines: &[ResponseLine], seq: u32) -> Option<Vec<u8>> {
    let prefix = format!("* {seq} FETCH");
    lines
        .iter()
        .filter(|line| {
            line.head()
                .get(..prefix.len())
                .is_some_and(|p| p.eq_ignore_ascii_case(prefix.as_bytes()))
        })
        .find_map(|line| line.first_literal().map(<[u8]>::to_vec))
}
