//! Error types for the core library.

use thiserror::Error;

use crate::store::CredentialError;

/// Errors that can occur in core operations.
///
/// The first five variants are the failure categories a poll reports.
/// Endpoint-level categories (connection, authentication, protocol) trigger
/// failover; message-level failures are counted and the session continues.
#[derive(Debug, Error)]
pub enum Error {
    /// No usable endpoint, or an invalid request.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Server refused, unreachable, timed out or dropped the connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// LOGIN was rejected.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Unexpected server response (including a failed SELECT).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A single message could not be processed.
    #[error("Message processing error: {0}")]
    MessageProcessing(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Credential storage error.
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),
}

impl Error {
    /// Rewrites connection and authentication failures into plain language.
    ///
    /// Every other error passes through with its own text.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Connection(_) => {
                "Could not connect to the mail server. Check the host, port and network access."
                    .to_string()
            }
            Self::Authentication(_) => {
                "The mail server rejected the login. Check the username and password.".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Returns true for errors that end the session with the current endpoint.
    #[must_use]
    pub const fn is_endpoint_failure(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Authentication(_) | Self::Protocol(_)
        )
    }
}

impl From<mailferry_imap::Error> for Error {
    fn from(err: mailferry_imap::Error) -> Self {
        use mailferry_imap::Error as Imap;

        if err.is_connection() {
            return Self::Connection(err.to_string());
        }
        match &err {
            Imap::Auth(_) => Self::Authentication(err.to_string()),
            _ => Self::Protocol(err.to_string()),
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
