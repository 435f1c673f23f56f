//! One login-fetch-logout pass over a single mailbox.
//!
//! Per message: fetch the header block, resolve the owner, fetch the full
//! message only on a match, decode, dedup, persist, then flag `\Seen`.
//! Every outcome (stored, skipped, no match, failed) is flagged so the next
//! poll does not examine the message again. The flag is set only after the
//! outcome is known, so a dropped connection never hides an unhandled message.

use chrono::{DateTime, SubsecRound, Utc};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use mailferry_imap::Session;
use mailferry_mime::{Headers, extract_recipients, parse_body};

use crate::dedup::{DedupGate, IngestOutcome};
use crate::model::{DecodedMessage, MailboxCredential, PollMode, PollRequest, PollStats};
use crate::resolver::AddressResolver;
use crate::store::{AddressRegistry, MessageStore};
use crate::{Error, Result};

/// Stored when a message has no From address.
pub const UNKNOWN_SENDER: &str = "unknown";

/// Stored when a message has no Subject.
pub const NO_SUBJECT: &str = "(no subject)";

/// Outcome of one examined message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Persisted.
    Stored,
    /// Duplicate.
    Skipped,
    /// No owning address.
    NoMatch,
}

/// Owner resolution and dedup state shared by every session of one poll.
pub struct MessagePipeline<'a, R, M> {
    resolver: AddressResolver<'a, R>,
    gate: DedupGate<'a, M>,
}

impl<'a, R, M> MessagePipeline<'a, R, M>
where
    R: AddressRegistry,
    M: MessageStore,
{
    /// Creates the pipeline with a snapshot of the active domains.
    pub fn new(registry: &'a R, messages: &'a M, domains: Vec<String>) -> Self {
        Self {
            resolver: AddressResolver::new(registry, domains),
            gate: DedupGate::new(messages),
        }
    }
}

/// Picks the sequence numbers to examine, newest first.
///
/// `Latest` takes the last `limit` sequence numbers regardless of flags;
/// `Unseen` takes the highest `limit` ids from the unseen set.
#[must_use]
pub fn select_targets(mode: PollMode, limit: u32, total: u32, unseen: &[u32]) -> Vec<u32> {
    match mode {
        PollMode::Latest => {
            let first = total.saturating_sub(limit).saturating_add(1);
            (first..=total).rev().collect()
        }
        PollMode::Unseen => {
            let mut ids = unseen.to_vec();
            ids.sort_unstable_by(|a, b| b.cmp(a));
            ids.dedup();
            ids.truncate(limit as usize);
            ids
        }
    }
}

/// Parses an RFC 2822 Date header, tolerating a trailing `(comment)`.
#[must_use]
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let value = match value.rfind('(') {
        Some(open) if value.ends_with(')') => value[..open].trim_end(),
        _ => value,
    };
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Builds the stored form of a message from its headers and raw bytes.
#[must_use]
pub fn decode_message(headers: &Headers, raw: &[u8], fetched_at: DateTime<Utc>) -> DecodedMessage {
    let body = parse_body(raw).truncated();

    DecodedMessage {
        from_address: headers
            .from_address()
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
        subject: headers
            .subject()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| NO_SUBJECT.to_string()),
        text_body: body.text,
        html_body: body.html,
        received_at: headers
            .get("date")
            .and_then(parse_date)
            .unwrap_or_else(|| fetched_at.trunc_subsecs(0)),
    }
}

/// Runs a full pass and always logs out, even when the pass fails.
///
/// # Errors
///
/// Returns the first endpoint-level error (connection, authentication,
/// protocol). Per-message failures are counted in the stats instead.
pub async fn run_session<S, R, M>(
    mut session: Session<S>,
    credential: &MailboxCredential,
    request: &PollRequest,
    folder: &str,
    pipeline: &mut MessagePipeline<'_, R, M>,
) -> Result<PollStats>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AddressRegistry,
    M: MessageStore,
{
    let result = poll_mailbox(&mut session, credential, request, folder, pipeline).await;
    if let Err(e) = session.logout().await {
        debug!(host = %credential.host, error = %e, "LOGOUT failed");
    }
    result
}

/// Logs in, selects `folder` and processes the selected messages.
///
/// Test-only requests stop after SEARCH and change nothing on the server.
///
/// # Errors
///
/// Returns endpoint-level errors; see [`run_session`].
pub async fn poll_mailbox<S, R, M>(
    session: &mut Session<S>,
    credential: &MailboxCredential,
    request: &PollRequest,
    folder: &str,
    pipeline: &mut MessagePipeline<'_, R, M>,
) -> Result<PollStats>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AddressRegistry,
    M: MessageStore,
{
    let fetched_at = Utc::now();
    let limit = request.effective_limit();
    let mut stats = PollStats::new(request.mode, limit, fetched_at);

    session.login(&credential.username, &credential.password).await?;
    stats.total_messages = session.select(folder).await?;
    let unseen = session.search("UNSEEN").await?;
    stats.unseen_messages = u32::try_from(unseen.len()).unwrap_or(u32::MAX);

    if request.test_only {
        return Ok(stats);
    }

    let targets = select_targets(request.mode, limit, stats.total_messages, &unseen);
    debug!(host = %credential.host, count = targets.len(), "Processing messages");

    for seq in targets {
        stats.processed += 1;
        match process_message(session, seq, pipeline, fetched_at).await {
            Ok(MessageOutcome::Stored) => stats.stored += 1,
            Ok(MessageOutcome::Skipped) => stats.skipped += 1,
            Ok(MessageOutcome::NoMatch) => stats.no_match += 1,
            Err(e @ Error::Connection(_)) => return Err(e),
            Err(e) => {
                warn!(seq, error = %e, "Message processing failed");
                stats.failed += 1;
            }
        }

        if let Err(e) = session.store_seen(seq).await {
            if e.is_connection() {
                return Err(e.into());
            }
            warn!(seq, error = %e, "Failed to flag message as seen");
        }
    }

    Ok(stats)
}

async fn process_message<S, R, M>(
    session: &mut Session<S>,
    seq: u32,
    pipeline: &mut MessagePipeline<'_, R, M>,
    fetched_at: DateTime<Utc>,
) -> Result<MessageOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AddressRegistry,
    M: MessageStore,
{
    let header_block = session.fetch_header(seq).await.map_err(message_error)?;
    let raw_headers = String::from_utf8_lossy(&header_block);
    let headers = Headers::parse(&raw_headers);
    let recipients = extract_recipients(&headers, &raw_headers);

    let Some(owner) = pipeline.resolver.resolve(&recipients).await? else {
        debug!(seq, candidates = ?recipients, "No owner for message");
        return Ok(MessageOutcome::NoMatch);
    };

    let raw = session.fetch_body(seq).await.map_err(message_error)?;
    let message = decode_message(&headers, &raw, fetched_at);
    debug!(
        seq,
        owner = %owner.owner_id,
        recipient = %owner.matched_recipient,
        subject = %message.subject,
        "Decoded message"
    );

    match pipeline.gate.ingest(owner.owner_id, &message).await? {
        IngestOutcome::Stored => Ok(MessageOutcome::Stored),
        IngestOutcome::Skipped => Ok(MessageOutcome::Skipped),
    }
}

/// Keeps connection loss fatal; anything else only fails this message.
fn message_error(err: mailferry_imap::Error) -> Error {
    if err.is_connection() {
        Error::from(err)
    } else {
        Error::MessageProcessing(err.to_string())
    }
}
