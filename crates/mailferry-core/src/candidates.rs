//! Builds the ordered list of endpoints a poll will try.

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use crate::config::{DEFAULT_IMAP_PORT, PollerConfig};
use crate::failover::truncate_error;
use crate::model::{CredentialSource, MailboxCredential, PollRequest};
use crate::store::{MailboxConfigStore, SecretStore};
use crate::{Error, Result};

/// Builds the single candidate of a test-only request.
///
/// Returns `None` when host, user or password is missing or blank.
#[must_use]
pub fn test_candidate(request: &PollRequest) -> Option<MailboxCredential> {
    let field = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    Some(MailboxCredential {
        source: CredentialSource::Test,
        mailbox_id: None,
        mailbox_name: None,
        host: field(&request.host)?,
        port: request.port.unwrap_or(DEFAULT_IMAP_PORT),
        username: field(&request.user)?,
        // Passwords are used verbatim.
        password: request.password.clone().filter(|p| !p.is_empty())?,
        last_error_at: None,
    })
}

/// Orders stored endpoints for automatic selection.
///
/// Endpoints that failed within `cooldown` of `now` are dropped unless they
/// are the requested one, and the requested endpoint moves to the front.
/// Everything else keeps its incoming (priority) order.
#[must_use]
pub fn order_candidates(
    available: &[MailboxCredential],
    requested: Option<&str>,
    cooldown: TimeDelta,
    now: DateTime<Utc>,
) -> Vec<MailboxCredential> {
    let is_requested =
        |c: &MailboxCredential| requested.is_some() && c.mailbox_id.as_deref() == requested;
    let cooling_down = |c: &MailboxCredential| {
        c.last_error_at
            .is_some_and(|failed_at| now.signed_duration_since(failed_at) < cooldown)
    };

    let front = available.iter().filter(|c| is_requested(c));
    let rest = available
        .iter()
        .filter(|c| !is_requested(c) && !cooling_down(c));

    front.chain(rest).cloned().collect()
}

/// Resolves the candidates for a request.
///
/// Test-only requests yield exactly one candidate (or none when fields are
/// missing). Otherwise stored endpoints are loaded, their passwords looked
/// up and the result ordered by [`order_candidates`]. An endpoint whose
/// password cannot be read is error-stamped and left out. If nothing
/// remains the environment fallback is used.
///
/// # Errors
///
/// Returns an error if the configuration store cannot be read.
pub async fn resolve_candidates<C, K>(
    request: &PollRequest,
    config: &PollerConfig,
    store: &C,
    secrets: &K,
    now: DateTime<Utc>,
) -> Result<Vec<MailboxCredential>>
where
    C: MailboxConfigStore,
    K: SecretStore,
{
    if request.test_only {
        return Ok(test_candidate(request).into_iter().collect());
    }

    let mut available = Vec::new();
    for record in store.list_active().await? {
        match secrets.mailbox_password(&record.id) {
            Ok(password) => available.push(MailboxCredential {
                source: CredentialSource::Db,
                mailbox_id: Some(record.id),
                mailbox_name: Some(record.name),
                host: record.host,
                port: record.port,
                username: record.username,
                password,
                last_error_at: record.last_error_at,
            }),
            Err(e) => {
                warn!(mailbox_id = %record.id, error = %e, "Skipping mailbox without a usable password");
                let message = truncate_error(&e.to_string());
                if let Err(write_err) = store.update_error(&record.id, &message, now).await {
                    warn!(mailbox_id = %record.id, error = %write_err, "Failed to record mailbox error");
                }
            }
        }
    }

    let ordered = order_candidates(
        &available,
        request.mailbox_id.as_deref(),
        config.cooldown,
        now,
    );
    debug!(
        available = available.len(),
        selected = ordered.len(),
        "Resolved stored mailboxes"
    );
    if !ordered.is_empty() {
        return Ok(ordered);
    }

    Ok(config
        .fallback
        .as_ref()
        .map(|fallback| MailboxCredential {
            source: CredentialSource::Env,
            mailbox_id: None,
            mailbox_name: fallback.name.clone(),
            host: fallback.host.clone(),
            port: fallback.port,
            username: fallback.username.clone(),
            password: fallback.password.clone(),
            last_error_at: None,
        })
        .into_iter()
        .collect())
}

/// Error reported when resolution produced no candidate.
#[must_use]
pub fn no_candidates_error(request: &PollRequest) -> Error {
    if request.test_only {
        Error::Configuration("host, user and password are required".to_string())
    } else {
        Error::Configuration("no mailbox is configured for polling".to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::FallbackMailbox;
    use crate::model::MailboxRecord;
    use crate::store::CredentialError;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn credential(id: &str, last_error_at: Option<DateTime<Utc>>) -> MailboxCredential {
        MailboxCredential {
            source: CredentialSource::Db,
            mailbox_id: Some(id.to_string()),
            mailbox_name: Some(format!("Mailbox {id}")),
            host: format!("imap{id}.example.com"),
            port: 993,
            username: format!("user{id}"),
            password: "secret".to_string(),
            last_error_at,
        }
    }

    fn ids(list: &[MailboxCredential]) -> Vec<&str> {
        list.iter().filter_map(|c| c.mailbox_id.as_deref()).collect()
    }

    struct FakeStore {
        records: Vec<MailboxRecord>,
        errors: Mutex<Vec<(String, String)>>,
    }

    impl MailboxConfigStore for FakeStore {
        async fn list_active(&self) -> Result<Vec<MailboxRecord>> {
            Ok(self.records.clone())
        }

        async fn update_error(&self, id: &str, message: &str, _at: DateTime<Utc>) -> Result<()> {
            self.errors
                .lock()
                .unwrap()
                .push((id.to_string(), message.to_string()));
            Ok(())
        }

        async fn update_success(&self, _id: &str, _at: DateTime<Utc>) -> Result<()> {
            Ok(())
        }
    }

    struct FakeSecrets;

    impl SecretStore for FakeSecrets {
        fn mailbox_password(&self, mailbox_id: &str) -> Result<String> {
            if mailbox_id == "locked" {
                Err(CredentialError::Missing(mailbox_id.to_string()).into())
            } else {
                Ok(format!("pw-{mailbox_id}"))
            }
        }
    }

    fn record(id: &str) -> MailboxRecord {
        MailboxRecord {
            id: id.to_string(),
            name: id.to_uppercase(),
            host: format!("{id}.example.com"),
            port: 993,
            username: id.to_string(),
            is_primary: false,
            priority: 0,
            last_error_at: None,
        }
    }

    #[test]
    fn test_cooldown_excludes_recent_failures_only() {
        let available = vec![
            credential("recent", Some(now() - TimeDelta::minutes(5))),
            credential("old", Some(now() - TimeDelta::minutes(20))),
            credential("healthy", None),
        ];

        let ordered = order_candidates(&available, None, TimeDelta::minutes(15), now());
        assert_eq!(ids(&ordered), vec!["old", "healthy"]);
    }

    #[test]
    fn test_requested_mailbox_moves_to_front_even_in_cooldown() {
        let available = vec![
            credential("1", None),
            credential("2", Some(now() - TimeDelta::minutes(1))),
            credential("3", None),
        ];

        let ordered = order_candidates(&available, Some("2"), TimeDelta::minutes(15), now());
        assert_eq!(ids(&ordered), vec!["2", "1", "3"]);
        // The input is untouched.
        assert_eq!(ids(&available), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_unknown_requested_mailbox_keeps_order() {
        let available = vec![credential("1", None), credential("2", None)];
        let ordered = order_candidates(&available, Some("9"), TimeDelta::minutes(15), now());
        assert_eq!(ids(&ordered), vec!["1", "2"]);
    }

    #[test]
    fn test_test_candidate_requires_fields() {
        let mut request = PollRequest {
            test_only: true,
            host: Some("imap.example.com".to_string()),
            user: Some("me".to_string()),
            password: Some("pw".to_string()),
            ..PollRequest::default()
        };
        let candidate = test_candidate(&request).unwrap();
        assert_eq!(candidate.source, CredentialSource::Test);
        assert_eq!(candidate.port, 993);

        request.host = Some("   ".to_string());
        assert!(test_candidate(&request).is_none());
    }

    #[tokio::test]
    async fn test_resolve_skips_unreadable_secret_and_records_error() {
        let store = FakeStore {
            records: vec![record("locked"), record("open")],
            errors: Mutex::new(Vec::new()),
        };
        let config = PollerConfig::default();

        let candidates =
            resolve_candidates(&PollRequest::default(), &config, &store, &FakeSecrets, now())
                .await
                .unwrap();
        assert_eq!(ids(&candidates), vec!["open"]);
        assert_eq!(candidates[0].password, "pw-open");

        let errors = store.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "locked");
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_environment() {
        let store = FakeStore {
            records: vec![],
            errors: Mutex::new(Vec::new()),
        };
        let config = PollerConfig {
            fallback: Some(FallbackMailbox {
                name: Some("Env".to_string()),
                host: "env.example.com".to_string(),
                port: 993,
                username: "env".to_string(),
                password: "pw".to_string(),
            }),
            ..PollerConfig::default()
        };

        let candidates =
            resolve_candidates(&PollRequest::default(), &config, &store, &FakeSecrets, now())
                .await
                .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].source, CredentialSource::Env);
        assert_eq!(candidates[0].host, "env.example.com");
    }

    #[tokio::test]
    async fn test_resolve_test_only_ignores_store() {
        let store = FakeStore {
            records: vec![record("open")],
            errors: Mutex::new(Vec::new()),
        };
        let request = PollRequest {
            test_only: true,
            host: Some("t.example.com".to_string()),
            user: Some("u".to_string()),
            ..PollRequest::default()
        };

        let candidates =
            resolve_candidates(&request, &PollerConfig::default(), &store, &FakeSecrets, now())
                .await
                .unwrap();
        assert!(candidates.is_empty());
        assert!(matches!(no_candidates_error(&request), Error::Configuration(m) if m.contains("required")));
    }
}
