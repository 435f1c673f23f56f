//! Endpoint passwords in the system keyring.
//!
//! Provides secure storage for mailbox passwords using the platform's
//! native credential storage:
//! - Linux: Secret Service (GNOME Keyring, `KWallet`)
//! - macOS: Keychain
//! - Windows: Credential Manager

use keyring::Entry;
use tracing::debug;

use super::SecretStore;
use crate::Result;

/// Service name used for keyring entries.
const SERVICE_NAME: &str = "mailferry";

/// Error type for credential operations.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Failed to access keyring.
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    /// No secret stored for the endpoint.
    #[error("No password stored for mailbox {0}")]
    Missing(String),
}

/// Generates the keyring entry key for an endpoint.
fn credential_key(mailbox_id: &str) -> String {
    format!("mailbox_{mailbox_id}")
}

/// Keyring-backed [`SecretStore`].
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyringSecrets;

impl KeyringSecrets {
    /// Stores an endpoint password in the system keyring.
    ///
    /// # Errors
    ///
    /// Returns an error if the keyring operation fails.
    pub fn store(&self, mailbox_id: &str, password: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, &credential_key(mailbox_id))
            .map_err(CredentialError::from)?;
        entry.set_password(password).map_err(CredentialError::from)?;
        debug!(mailbox_id, "Stored mailbox password");
        Ok(())
    }
}

impl SecretStore for KeyringSecrets {
    fn mailbox_password(&self, mailbox_id: &str) -> Result<String> {
        let entry = Entry::new(SERVICE_NAME, &credential_key(mailbox_id))
            .map_err(CredentialError::from)?;
        match entry.get_password() {
            Ok(password) => Ok(password),
            Err(keyring::Error::NoEntry) => {
                debug!(mailbox_id, "No mailbox password found");
                Err(CredentialError::Missing(mailbox_id.to_string()).into())
            }
            Err(e) => Err(CredentialError::from(e).into()),
        }
    }
}
