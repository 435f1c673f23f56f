//! Poller configuration.

use std::time::Duration;

use chrono::TimeDelta;

/// Minutes after a recorded failure during which an endpoint is skipped.
pub const DEFAULT_COOLDOWN_MINUTES: i64 = 15;

/// Default IMAP port (implicit TLS).
pub const DEFAULT_IMAP_PORT: u16 = 993;

/// Mailbox endpoint configured through the environment.
///
/// Used only when no stored endpoint is available.
#[derive(Clone)]
pub struct FallbackMailbox {
    /// Display name.
    pub name: Option<String>,
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Login name.
    pub username: String,
    /// Login password.
    pub password: String,
}

impl std::fmt::Debug for FallbackMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackMailbox")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Settings for one poll invocation.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Failure cooldown for automatic endpoint selection.
    pub cooldown: TimeDelta,
    /// TCP connect plus TLS handshake limit.
    pub connect_timeout: Duration,
    /// Limit for each server response read.
    pub read_timeout: Duration,
    /// Folder selected on every endpoint.
    pub folder: String,
    /// Environment endpoint, if configured.
    pub fallback: Option<FallbackMailbox>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            cooldown: TimeDelta::minutes(DEFAULT_COOLDOWN_MINUTES),
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            folder: "INBOX".to_string(),
            fallback: None,
        }
    }
}

impl PollerConfig {
    /// Reads the configuration from process environment variables.
    ///
    /// - `IMAP_HOST`, `IMAP_PORT` (default 993), `IMAP_USER`,
    ///   `IMAP_PASSWORD`, `IMAP_MAILBOX_NAME`: the fallback endpoint, present
    ///   only when host, user and password are all set
    /// - `MAILFERRY_CONNECT_TIMEOUT_SECS`, `MAILFERRY_READ_TIMEOUT_SECS`
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    ///
    /// Unparsable numbers fall back to their defaults.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let seconds = |key: &str| {
            non_empty(key)
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|&secs| secs > 0)
                .map(Duration::from_secs)
        };

        let defaults = Self::default();
        let fallback = match (
            non_empty("IMAP_HOST"),
            non_empty("IMAP_USER"),
            non_empty("IMAP_PASSWORD"),
        ) {
            (Some(host), Some(username), Some(password)) => Some(FallbackMailbox {
                name: non_empty("IMAP_MAILBOX_NAME"),
                host,
                port: non_empty("IMAP_PORT")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_IMAP_PORT),
                username,
                password,
            }),
            _ => None,
        };

        Self {
            connect_timeout: seconds("MAILFERRY_CONNECT_TIMEOUT_SECS")
                .unwrap_or(defaults.connect_timeout),
            read_timeout: seconds("MAILFERRY_READ_TIMEOUT_SECS").unwrap_or(defaults.read_timeout),
            fallback,
            ..defaults
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PollerConfig::from_lookup(lookup(&[]));
        assert_eq!(config.cooldown, TimeDelta::minutes(15));
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.read_timeout, Duration::from_secs(60));
        assert_eq!(config.folder, "INBOX");
        assert!(config.fallback.is_none());
    }

    #[test]
    fn test_fallback_requires_host_user_and_password() {
        let partial = PollerConfig::from_lookup(lookup(&[
            ("IMAP_HOST", "imap.example.com"),
            ("IMAP_USER", "catchall@example.com"),
            ("IMAP_PASSWORD", "  "),
        ]));
        assert!(partial.fallback.is_none());

        let full = PollerConfig::from_lookup(lookup(&[
            ("IMAP_HOST", "imap.example.com"),
            ("IMAP_USER", "catchall@example.com"),
            ("IMAP_PASSWORD", "secret"),
            ("IMAP_MAILBOX_NAME", "Catch-all"),
        ]));
        let fallback = full.fallback.unwrap();
        assert_eq!(fallback.port, 993);
        assert_eq!(fallback.name.as_deref(), Some("Catch-all"));
        assert!(!format!("{fallback:?}").contains("secret"));
    }

    #[test]
    fn test_timeouts_and_port_overrides() {
        let config = PollerConfig::from_lookup(lookup(&[
            ("IMAP_HOST", "mail.internal"),
            ("IMAP_PORT", "143"),
            ("IMAP_USER", "u"),
            ("IMAP_PASSWORD", "p"),
            ("MAILFERRY_CONNECT_TIMEOUT_SECS", "5"),
            ("MAILFERRY_READ_TIMEOUT_SECS", "not-a-number"),
        ]));
        assert_eq!(config.fallback.unwrap().port, 143);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.read_timeout, Duration::from_secs(60));
    }
}
