//! Domain model and the poll request/response contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of messages examined per poll.
pub const DEFAULT_LIMIT: u32 = 10;

/// Largest accepted `limit`.
pub const MAX_LIMIT: u32 = 50;

/// Identifier of an owner record (a disposable address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub i64);

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a mailbox credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialSource {
    /// Mailbox configuration store.
    Db,
    /// Environment fallback.
    Env,
    /// Caller-supplied test connection.
    Test,
}

/// One retrievable mailbox endpoint, built fresh for each poll.
#[derive(Clone, PartialEq, Eq)]
pub struct MailboxCredential {
    /// Origin of the credential.
    pub source: CredentialSource,
    /// Configuration record id (stored endpoints only).
    pub mailbox_id: Option<String>,
    /// Display name.
    pub mailbox_name: Option<String>,
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Login name.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Time of the last recorded failure.
    pub last_error_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for MailboxCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxCredential")
            .field("source", &self.source)
            .field("mailbox_id", &self.mailbox_id)
            .field("mailbox_name", &self.mailbox_name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("last_error_at", &self.last_error_at)
            .finish_non_exhaustive()
    }
}

/// Stored mailbox endpoint as listed by the configuration store.
///
/// The password is not part of the record; it is looked up separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxRecord {
    /// Record id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Login name.
    pub username: String,
    /// Preferred endpoint flag.
    pub is_primary: bool,
    /// Higher is tried first.
    pub priority: i64,
    /// Time of the last recorded failure.
    pub last_error_at: Option<DateTime<Utc>>,
}

/// Which messages a poll examines.
///
/// Deserializes leniently: any name other than `unseen` reads as `latest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum PollMode {
    /// The most recent messages regardless of read state.
    #[default]
    Latest,
    /// The most recent unseen messages.
    Unseen,
}

impl PollMode {
    /// Parses a mode name; anything unknown means [`PollMode::Latest`].
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("unseen") {
            Self::Unseen
        } else {
            Self::Latest
        }
    }

    /// Returns the wire name of the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Latest => "latest",
            Self::Unseen => "unseen",
        }
    }
}

impl From<String> for PollMode {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

/// A poll invocation.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollRequest {
    /// Message selection mode.
    pub mode: PollMode,
    /// Maximum messages to examine (clamped to 1..=50).
    pub limit: Option<u32>,
    /// Endpoint to try first, even if cooling down.
    pub mailbox_id: Option<String>,
    /// Only check connectivity; no message is fetched or flagged.
    pub test_only: bool,
    /// Test connection host.
    pub host: Option<String>,
    /// Test connection port (default 993).
    pub port: Option<u16>,
    /// Test connection user.
    pub user: Option<String>,
    /// Test connection password.
    pub password: Option<String>,
}

impl PollRequest {
    /// Returns the limit clamped into `1..=50`, defaulting to 10.
    #[must_use]
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

impl std::fmt::Debug for PollRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollRequest")
            .field("mode", &self.mode)
            .field("limit", &self.limit)
            .field("mailbox_id", &self.mailbox_id)
            .field("test_only", &self.test_only)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// Per-run statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollStats {
    /// Mode used.
    pub mode: PollMode,
    /// Effective limit.
    pub limit: u32,
    /// Message count reported by SELECT.
    pub total_messages: u32,
    /// Number of unseen messages.
    pub unseen_messages: u32,
    /// Messages examined.
    pub processed: u32,
    /// Messages persisted.
    pub stored: u32,
    /// Messages that failed to process.
    pub failed: u32,
    /// Duplicates skipped.
    pub skipped: u32,
    /// Messages with no owning address.
    pub no_match: u32,
    /// When the mailbox was read.
    pub fetched_at: DateTime<Utc>,
}

impl PollStats {
    /// Creates empty counters for a run.
    #[must_use]
    pub const fn new(mode: PollMode, limit: u32, fetched_at: DateTime<Utc>) -> Self {
        Self {
            mode,
            limit,
            total_messages: 0,
            unseen_messages: 0,
            processed: 0,
            stored: 0,
            failed: 0,
            skipped: 0,
            no_match: 0,
            fetched_at,
        }
    }
}

/// The endpoint that served a successful poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxUsed {
    /// Credential origin.
    pub source: CredentialSource,
    /// Record id.
    pub mailbox_id: Option<String>,
    /// Display name.
    pub mailbox_name: Option<String>,
    /// Server hostname.
    pub host: String,
}

impl From<&MailboxCredential> for MailboxUsed {
    fn from(credential: &MailboxCredential) -> Self {
        Self {
            source: credential.source,
            mailbox_id: credential.mailbox_id.clone(),
            mailbox_name: credential.mailbox_name.clone(),
            host: credential.host.clone(),
        }
    }
}

/// An endpoint that was attempted and failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriedMailbox {
    /// Record id.
    pub mailbox_id: Option<String>,
    /// Display name.
    pub mailbox_name: Option<String>,
    /// Server hostname.
    pub host: String,
    /// User-facing failure description.
    pub error: String,
}

/// Result of a poll invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    /// Whether some endpoint completed a session.
    pub success: bool,
    /// Human-readable summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Counters of the successful session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<PollStats>,
    /// Endpoint that served the poll.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mailbox_used: Option<MailboxUsed>,
    /// Endpoints that failed before the result was produced.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tried: Vec<TriedMailbox>,
}

impl PollResponse {
    /// Creates a failed response with only an error message.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
            stats: None,
            mailbox_used: None,
            tried: Vec::new(),
        }
    }
}

/// Resolved owner of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressMatch {
    /// Owning record.
    pub owner_id: OwnerId,
    /// The recipient address that matched.
    pub matched_recipient: String,
}

/// A message decoded and ready for persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    /// First sender address, lower-cased.
    pub from_address: String,
    /// Decoded subject.
    pub subject: String,
    /// Plain-text body (at most 10,000 characters).
    pub text_body: String,
    /// HTML body (at most 50,000 characters).
    pub html_body: String,
    /// Date header, or the fetch time when it is missing or unparsable.
    pub received_at: DateTime<Utc>,
}

/// Result of a store insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Row written.
    Inserted,
    /// A row with the same dedup key already exists.
    Conflict,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_clamping() {
        let mut request = PollRequest::default();
        assert_eq!(request.effective_limit(), 10);
        request.limit = Some(0);
        assert_eq!(request.effective_limit(), 1);
        request.limit = Some(500);
        assert_eq!(request.effective_limit(), 50);
        request.limit = Some(25);
        assert_eq!(request.effective_limit(), 25);
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(PollMode::parse("unseen"), PollMode::Unseen);
        assert_eq!(PollMode::parse(" UNSEEN "), PollMode::Unseen);
        assert_eq!(PollMode::parse("latest"), PollMode::Latest);
        assert_eq!(PollMode::parse("everything"), PollMode::Latest);
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let request: PollRequest = serde_json::from_str(
            r#"{"mode":"unseen","limit":5,"mailboxId":"7","testOnly":true,"host":"h"}"#,
        )
        .unwrap();
        assert_eq!(request.mode, PollMode::Unseen);
        assert_eq!(request.effective_limit(), 5);
        assert_eq!(request.mailbox_id.as_deref(), Some("7"));
        assert!(request.test_only);
        assert_eq!(request.host.as_deref(), Some("h"));
        assert!(request.password.is_none());
    }

    #[test]
    fn test_request_with_unknown_mode_polls_latest() {
        let request: PollRequest =
            serde_json::from_str(r#"{"mode":"everything","limit":3}"#).unwrap();
        assert_eq!(request.mode, PollMode::Latest);
        assert_eq!(request.effective_limit(), 3);

        let request: PollRequest = serde_json::from_str(r#"{"mode":"UNSEEN"}"#).unwrap();
        assert_eq!(request.mode, PollMode::Unseen);
    }

    #[test]
    fn test_response_serializes_contract_fields() {
        let fetched_at = DateTime::parse_from_rfc3339("2026-01-24T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut stats = PollStats::new(PollMode::Latest, 10, fetched_at);
        stats.no_match = 2;
        let response = PollResponse {
            success: true,
            message: Some("ok".to_string()),
            error: None,
            stats: Some(stats),
            mailbox_used: Some(MailboxUsed {
                source: CredentialSource::Db,
                mailbox_id: Some("2".to_string()),
                mailbox_name: Some("Backup".to_string()),
                host: "imap.example.com".to_string(),
            }),
            tried: vec![],
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["stats"]["noMatch"], 2);
        assert_eq!(json["stats"]["mode"], "latest");
        assert_eq!(json["stats"]["fetchedAt"], "2026-01-24T10:00:00Z");
        assert_eq!(json["mailboxUsed"]["source"], "db");
        assert_eq!(json["mailboxUsed"]["mailboxId"], "2");
        assert!(json.get("error").is_none());
        assert!(json.get("tried").is_none());
    }

    #[test]
    fn test_debug_hides_password() {
        let credential = MailboxCredential {
            source: CredentialSource::Test,
            mailbox_id: None,
            mailbox_name: None,
            host: "h".to_string(),
            port: 993,
            username: "u".to_string(),
            password: "hunter2".to_string(),
            last_error_at: None,
        };
        assert!(!format!("{credential:?}").contains("hunter2"));
    }
}
