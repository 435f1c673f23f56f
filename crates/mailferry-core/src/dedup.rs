//! Duplicate check and persistence of decoded messages.
//!
//! The dedup key is `(owner, from, subject, received_at)` at second
//! precision. Message-ID is deliberately not part of it, so two distinct
//! messages from the same sender with the same subject and timestamp
//! collide and the second one is skipped.

use std::collections::HashSet;

use tracing::debug;

use crate::Result;
use crate::model::{DecodedMessage, InsertOutcome, OwnerId};
use crate::store::{MessageStore, timestamp_key};

/// What happened to a message that reached the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Newly persisted.
    Stored,
    /// Already present (in this run or in the store).
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    owner: OwnerId,
    from_address: String,
    subject: String,
    received_at: String,
}

impl DedupKey {
    fn new(owner: OwnerId, message: &DecodedMessage) -> Self {
        Self {
            owner,
            from_address: message.from_address.clone(),
            subject: message.subject.clone(),
            received_at: timestamp_key(message.received_at),
        }
    }
}

/// Insert-or-skip gate in front of a [`MessageStore`].
///
/// Keys seen during this run are cached so repeated messages in one pass
/// cost no store round-trip.
pub struct DedupGate<'a, M> {
    store: &'a M,
    seen: HashSet<DedupKey>,
}

impl<'a, M: MessageStore> DedupGate<'a, M> {
    /// Creates a gate with an empty per-run cache.
    pub fn new(store: &'a M) -> Self {
        Self {
            store,
            seen: HashSet::new(),
        }
    }

    /// Persists the message unless an identical one already exists.
    ///
    /// A unique-key conflict on insert counts as a skip.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query or insert fails.
    pub async fn ingest(&mut self, owner: OwnerId, message: &DecodedMessage) -> Result<IngestOutcome> {
        let key = DedupKey::new(owner, message);
        if self.seen.contains(&key) {
            debug!(owner = %owner, subject = %message.subject, "Duplicate within this run");
            return Ok(IngestOutcome::Skipped);
        }

        let exists = self
            .store
            .exists(owner, &message.from_address, &message.subject, message.received_at)
            .await?;
        let outcome = if exists {
            IngestOutcome::Skipped
        } else {
            match self.store.insert(owner, message).await? {
                InsertOutcome::Inserted => IngestOutcome::Stored,
                InsertOutcome::Conflict => IngestOutcome::Skipped,
            }
        };

        self.seen.insert(key);
        Ok(outcome)
    }
}
