//! Collaborator interfaces and their `SQLite` / keyring implementations.
//!
//! The poller only talks to these traits. Tests substitute in-memory
//! databases or hand-written fakes.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::Result;
use crate::model::{DecodedMessage, InsertOutcome, MailboxRecord, OwnerId};

mod secrets;
mod sqlite;

pub use secrets::{CredentialError, KeyringSecrets};
pub use sqlite::{
    Database, MailboxHealth, SqliteAddressRegistry, SqliteDomainList, SqliteMailboxStore,
    SqliteMessageStore,
};

/// Lookup of active disposable addresses.
pub trait AddressRegistry {
    /// Returns the owner of an active, unexpired address (case-insensitive).
    fn find_active_owner(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<Option<OwnerId>>> + Send;
}

/// Active domain suffixes accepted for incoming mail.
pub trait DomainAllowList {
    /// Returns the active domains, lower-cased.
    fn active_domains(&self) -> impl Future<Output = Result<Vec<String>>> + Send;
}

/// Persistence of received messages.
pub trait MessageStore {
    /// Returns true if a message with this dedup key is already stored.
    fn exists(
        &self,
        owner: OwnerId,
        from_address: &str,
        subject: &str,
        received_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Inserts a message; a unique-key violation is reported as a conflict.
    fn insert(
        &self,
        owner: OwnerId,
        message: &DecodedMessage,
    ) -> impl Future<Output = Result<InsertOutcome>> + Send;
}

/// Stored mailbox endpoints and their health fields.
pub trait MailboxConfigStore {
    /// Lists active IMAP-enabled endpoints, primary first, then by priority.
    fn list_active(&self) -> impl Future<Output = Result<Vec<MailboxRecord>>> + Send;

    /// Records a failure: sets the error text and its timestamp.
    fn update_error(
        &self,
        mailbox_id: &str,
        message: &str,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Records a successful pass: clears the error fields, stamps the poll time.
    fn update_success(
        &self,
        mailbox_id: &str,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Secure lookup of endpoint passwords.
pub trait SecretStore {
    /// Returns the password of a stored endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is missing or cannot be read.
    fn mailbox_password(&self, mailbox_id: &str) -> Result<String>;
}

/// Dedup key timestamps are stored at second precision.
pub(crate) fn timestamp_key(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
