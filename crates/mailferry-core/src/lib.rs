//! # mailferry-core
//!
//! Retrieval and normalization engine for disposable addresses.
//!
//! A poll resolves the candidate mailbox endpoints, connects to the first
//! one that works, and for each selected message:
//! - resolves the owning disposable address from the recipient headers
//! - decodes the body into bounded plain-text and HTML forms
//! - persists it unless an identical message is already stored
//! - flags it `\Seen` on the server
//!
//! ```ignore
//! use mailferry_core::{Database, KeyringSecrets, PollRequest, PollerConfig, run_poll};
//!
//! let db = Database::new("mailferry.db").await?;
//! let response = run_poll(&PollRequest::default(), &PollerConfig::from_env(), &db, &KeyringSecrets).await;
//! println!("{}", serde_json::to_string(&response)?);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod candidates;
pub mod config;
pub mod dedup;
mod error;
pub mod failover;
pub mod model;
pub mod poller;
pub mod resolver;
pub mod store;

pub use candidates::{order_candidates, resolve_candidates};
pub use config::{FallbackMailbox, PollerConfig};
pub use error::{Error, Result};
pub use failover::{ImapRunner, SessionRunner, run_failover, run_poll};
pub use model::{
    CredentialSource, DecodedMessage, MailboxCredential, MailboxRecord, MailboxUsed, OwnerId,
    PollMode, PollRequest, PollResponse, PollStats, TriedMailbox,
};
pub use poller::{MessageOutcome, MessagePipeline, decode_message, run_session, select_targets};
pub use store::{CredentialError, Database, KeyringSecrets};
