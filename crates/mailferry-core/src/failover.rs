//! Tries candidate endpoints in order until one completes a session.
//!
//! Health is written back per endpoint: a failure stamps the error text and
//! time (which starts the cooldown), a success clears them.

use std::future::Future;

use chrono::Utc;
use tracing::{info, warn};

use mailferry_imap::{Config as ImapConfig, Session};

use crate::Result;
use crate::candidates::{no_candidates_error, resolve_candidates};
use crate::config::PollerConfig;
use crate::model::{
    CredentialSource, MailboxCredential, MailboxUsed, PollRequest, PollResponse, PollStats,
    TriedMailbox,
};
use crate::poller::{MessagePipeline, run_session};
use crate::store::{
    AddressRegistry, Database, DomainAllowList, MailboxConfigStore, MessageStore, SecretStore,
};

/// Longest error text written to an endpoint's health fields.
pub const MAX_ERROR_LEN: usize = 800;

/// Error reported when every candidate failed.
pub const ALL_FAILED: &str = "All mailboxes failed";

/// Caps error text at [`MAX_ERROR_LEN`] characters.
#[must_use]
pub fn truncate_error(message: &str) -> String {
    message.chars().take(MAX_ERROR_LEN).collect()
}

/// Runs one complete session against an endpoint.
pub trait SessionRunner {
    /// Connects, processes and logs out.
    fn run(
        &mut self,
        credential: &MailboxCredential,
        request: &PollRequest,
    ) -> impl Future<Output = Result<PollStats>>;
}

/// [`SessionRunner`] that talks to real IMAP servers.
///
/// The pipeline (resolver cache and dedup cache) is shared by every
/// endpoint tried during one poll.
pub struct ImapRunner<'a, R, M> {
    config: &'a PollerConfig,
    pipeline: MessagePipeline<'a, R, M>,
}

impl<'a, R, M> ImapRunner<'a, R, M>
where
    R: AddressRegistry,
    M: MessageStore,
{
    /// Creates a runner.
    pub const fn new(config: &'a PollerConfig, pipeline: MessagePipeline<'a, R, M>) -> Self {
        Self { config, pipeline }
    }
}

impl<R, M> SessionRunner for ImapRunner<'_, R, M>
where
    R: AddressRegistry,
    M: MessageStore,
{
    async fn run(
        &mut self,
        credential: &MailboxCredential,
        request: &PollRequest,
    ) -> Result<PollStats> {
        let imap_config = ImapConfig::builder(&credential.host)
            .port(credential.port)
            .connect_timeout(self.config.connect_timeout)
            .io_timeout(self.config.read_timeout)
            .build();

        let session = Session::connect(&imap_config).await?;
        run_session(
            session,
            credential,
            request,
            &self.config.folder,
            &mut self.pipeline,
        )
        .await
    }
}

/// Tries each candidate in order and returns the first success.
///
/// Health is only written for stored endpoints. Failed attempts are listed
/// in `tried` with their user-facing error text.
pub async fn run_failover<X, C>(
    candidates: &[MailboxCredential],
    request: &PollRequest,
    runner: &mut X,
    health: &C,
) -> PollResponse
where
    X: SessionRunner,
    C: MailboxConfigStore,
{
    let mut tried = Vec::new();
    let mut last_error = None;

    for credential in candidates {
        info!(
            host = %credential.host,
            mailbox_id = ?credential.mailbox_id,
            source = ?credential.source,
            "Polling mailbox"
        );

        match runner.run(credential, request).await {
            Ok(stats) => {
                record_success(health, credential).await;
                info!(
                    host = %credential.host,
                    processed = stats.processed,
                    stored = stats.stored,
                    skipped = stats.skipped,
                    no_match = stats.no_match,
                    failed = stats.failed,
                    "Mailbox poll complete"
                );
                return PollResponse {
                    success: true,
                    message: Some(summary(credential, request, &stats)),
                    error: None,
                    stats: Some(stats),
                    mailbox_used: Some(MailboxUsed::from(credential)),
                    tried,
                };
            }
            Err(e) => {
                warn!(host = %credential.host, error = %e, "Mailbox poll failed");
                record_error(health, credential, &e.to_string()).await;
                tried.push(TriedMailbox {
                    mailbox_id: credential.mailbox_id.clone(),
                    mailbox_name: credential.mailbox_name.clone(),
                    host: credential.host.clone(),
                    error: e.user_message(),
                });
                last_error = Some(e);
            }
        }
    }

    PollResponse {
        success: false,
        message: last_error.map(|e| e.user_message()),
        error: Some(ALL_FAILED.to_string()),
        stats: None,
        mailbox_used: None,
        tried,
    }
}

/// Runs a complete poll against the database and keyring.
///
/// Never fails: configuration and store problems become a failed response.
pub async fn run_poll<K: SecretStore>(
    request: &PollRequest,
    config: &PollerConfig,
    db: &Database,
    secrets: &K,
) -> PollResponse {
    let mailboxes = db.mailbox_store();
    let candidates =
        match resolve_candidates(request, config, &mailboxes, secrets, Utc::now()).await {
            Ok(candidates) if candidates.is_empty() => {
                return PollResponse::failure(no_candidates_error(request).user_message());
            }
            Ok(candidates) => candidates,
            Err(e) => return PollResponse::failure(e.user_message()),
        };

    let domains = match db.domain_list().active_domains().await {
        Ok(domains) => domains,
        Err(e) => return PollResponse::failure(e.user_message()),
    };

    let registry = db.address_registry();
    let messages = db.message_store();
    let mut runner = ImapRunner::new(config, MessagePipeline::new(&registry, &messages, domains));

    run_failover(&candidates, request, &mut runner, &mailboxes).await
}

async fn record_success<C: MailboxConfigStore>(health: &C, credential: &MailboxCredential) {
    let Some(id) = stored_id(credential) else {
        return;
    };
    if let Err(e) = health.update_success(id, Utc::now()).await {
        warn!(mailbox_id = %id, error = %e, "Failed to record mailbox success");
    }
}

async fn record_error<C: MailboxConfigStore>(
    health: &C,
    credential: &MailboxCredential,
    message: &str,
) {
    let Some(id) = stored_id(credential) else {
        return;
    };
    if let Err(e) = health
        .update_error(id, &truncate_error(message), Utc::now())
        .await
    {
        warn!(mailbox_id = %id, error = %e, "Failed to record mailbox error");
    }
}

fn stored_id(credential: &MailboxCredential) -> Option<&str> {
    match credential.source {
        CredentialSource::Db => credential.mailbox_id.as_deref(),
        CredentialSource::Env | CredentialSource::Test => None,
    }
}

fn summary(credential: &MailboxCredential, request: &PollRequest, stats: &PollStats) -> String {
    let name = credential
        .mailbox_name
        .as_deref()
        .unwrap_or(&credential.host);
    if request.test_only {
        format!(
            "Connection to {name} successful: {} messages, {} unseen",
            stats.total_messages, stats.unseen_messages
        )
    } else {
        format!(
            "Processed {} messages from {name}: {} stored, {} skipped, {} unmatched, {} failed",
            stats.processed, stats.stored, stats.skipped, stats.no_match, stats.failed
        )
    }
}
