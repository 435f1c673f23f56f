//! `SQLite` implementations of the collaborator traits.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::debug;

use super::{AddressRegistry, DomainAllowList, MailboxConfigStore, MessageStore, timestamp_key};
use crate::Result;
use crate::model::{DecodedMessage, InsertOutcome, MailboxRecord, OwnerId};

/// Shared connection pool holding every table the poller reads or writes.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database with the given path.
    ///
    /// Creates the database and tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let db = Self { pool };
        db.initialize().await?;
        Ok(db)
    }

    /// Create an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.initialize().await?;
        Ok(db)
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS temp_emails (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL UNIQUE COLLATE NOCASE,
                is_active INTEGER NOT NULL DEFAULT 1,
                expires_at TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS domains (
                domain TEXT PRIMARY KEY COLLATE NOCASE,
                is_active INTEGER NOT NULL DEFAULT 1
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        // The unique key is the dedup key.
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS received_emails (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                temp_email_id INTEGER NOT NULL,
                from_address TEXT NOT NULL,
                subject TEXT NOT NULL,
                text_body TEXT NOT NULL DEFAULT '',
                html_body TEXT NOT NULL DEFAULT '',
                received_at TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(temp_email_id, from_address, subject, received_at)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS mailboxes (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                host TEXT NOT NULL,
                port INTEGER NOT NULL DEFAULT 993,
                username TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                imap_enabled INTEGER NOT NULL DEFAULT 1,
                is_primary INTEGER NOT NULL DEFAULT 0,
                priority INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                last_error_at TEXT,
                last_polled_at TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Address registry over `temp_emails`.
    #[must_use]
    pub fn address_registry(&self) -> SqliteAddressRegistry {
        SqliteAddressRegistry {
            pool: self.pool.clone(),
        }
    }

    /// Domain allow-list over `domains`.
    #[must_use]
    pub fn domain_list(&self) -> SqliteDomainList {
        SqliteDomainList {
            pool: self.pool.clone(),
        }
    }

    /// Message store over `received_emails`.
    #[must_use]
    pub fn message_store(&self) -> SqliteMessageStore {
        SqliteMessageStore {
            pool: self.pool.clone(),
        }
    }

    /// Mailbox configuration over `mailboxes`.
    #[must_use]
    pub fn mailbox_store(&self) -> SqliteMailboxStore {
        SqliteMailboxStore {
            pool: self.pool.clone(),
        }
    }
}

/// Registry of disposable addresses.
#[derive(Debug, Clone)]
pub struct SqliteAddressRegistry {
    pool: SqlitePool,
}

impl SqliteAddressRegistry {
    /// Registers an active address and returns its owner id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn register(
        &self,
        address: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<OwnerId> {
        let result = sqlx::query("INSERT INTO temp_emails (address, expires_at) VALUES (?, ?)")
            .bind(address.trim().to_lowercase())
            .bind(expires_at.map(timestamp_key))
            .execute(&self.pool)
            .await?;

        Ok(OwnerId(result.last_insert_rowid()))
    }

    /// Deactivates an address.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn deactivate(&self, owner: OwnerId) -> Result<()> {
        sqlx::query("UPDATE temp_emails SET is_active = 0 WHERE id = ?")
            .bind(owner.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl AddressRegistry for SqliteAddressRegistry {
    async fn find_active_owner(&self, address: &str) -> Result<Option<OwnerId>> {
        let row = sqlx::query(
            r"
            SELECT id FROM temp_emails
            WHERE address = ? AND is_active = 1
              AND (expires_at IS NULL OR expires_at > ?)
            ",
        )
        .bind(address.trim().to_lowercase())
        .bind(timestamp_key(Utc::now()))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| OwnerId(row.get::<i64, _>("id"))))
    }
}

/// Allow-list of receiving domains.
#[derive(Debug, Clone)]
pub struct SqliteDomainList {
    pool: SqlitePool,
}

impl SqliteDomainList {
    /// Adds (or re-activates) a domain.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn add(&self, domain: &str, is_active: bool) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO domains (domain, is_active) VALUES (?, ?)
            ON CONFLICT(domain) DO UPDATE SET is_active = excluded.is_active
            ",
        )
        .bind(domain.trim().to_lowercase())
        .bind(is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

impl DomainAllowList for SqliteDomainList {
    async fn active_domains(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT domain FROM domains WHERE is_active = 1 ORDER BY domain")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("domain").to_lowercase())
            .collect())
    }
}

/// Store of received messages.
#[derive(Debug, Clone)]
pub struct SqliteMessageStore {
    pool: SqlitePool,
}

impl SqliteMessageStore {
    /// Counts the messages stored for an owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn count_for(&self, owner: OwnerId) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM received_emails WHERE temp_email_id = ?")
            .bind(owner.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n"))
    }
}

impl MessageStore for SqliteMessageStore {
    async fn exists(
        &self,
        owner: OwnerId,
        from_address: &str,
        subject: &str,
        received_at: DateTime<Utc>,
    ) -> Result<bool> {
        let row = sqlx::query(
            r"
            SELECT 1 FROM received_emails
            WHERE temp_email_id = ? AND from_address = ? AND subject = ? AND received_at = ?
            LIMIT 1
            ",
        )
        .bind(owner.0)
        .bind(from_address)
        .bind(subject)
        .bind(timestamp_key(received_at))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    async fn insert(&self, owner: OwnerId, message: &DecodedMessage) -> Result<InsertOutcome> {
        let result = sqlx::query(
            r"
            INSERT INTO received_emails
                (temp_email_id, from_address, subject, text_body, html_body, received_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(owner.0)
        .bind(&message.from_address)
        .bind(&message.subject)
        .bind(&message.text_body)
        .bind(&message.html_body)
        .bind(timestamp_key(message.received_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                debug!(owner = %owner, "Insert hit the dedup key");
                Ok(InsertOutcome::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Health fields written back after each pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxHealth {
    /// Last failure text, truncated.
    pub last_error: Option<String>,
    /// Last successful pass (RFC 3339).
    pub last_polled_at: Option<String>,
}

/// Configuration of stored mailbox endpoints.
#[derive(Debug, Clone)]
pub struct SqliteMailboxStore {
    pool: SqlitePool,
}

impl SqliteMailboxStore {
    /// Inserts or replaces an endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn upsert(&self, record: &MailboxRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO mailboxes
                (id, name, host, port, username, is_primary, priority, last_error_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                host = excluded.host,
                port = excluded.port,
                username = excluded.username,
                is_primary = excluded.is_primary,
                priority = excluded.priority,
                last_error_at = excluded.last_error_at
            ",
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.host)
        .bind(i64::from(record.port))
        .bind(&record.username)
        .bind(record.is_primary)
        .bind(record.priority)
        .bind(record.last_error_at.map(timestamp_key))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns the health fields of an endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn health(&self, mailbox_id: &str) -> Result<Option<MailboxHealth>> {
        let row = sqlx::query("SELECT last_error, last_polled_at FROM mailboxes WHERE id = ?")
            .bind(mailbox_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| MailboxHealth {
            last_error: row.get("last_error"),
            last_polled_at: row.get("last_polled_at"),
        }))
    }
}

impl MailboxConfigStore for SqliteMailboxStore {
    async fn list_active(&self) -> Result<Vec<MailboxRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, name, host, port, username, is_primary, priority, last_error_at
            FROM mailboxes
            WHERE is_active = 1 AND imap_enabled = 1
            ORDER BY is_primary DESC, priority DESC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_mailbox).collect()
    }

    async fn update_error(&self, mailbox_id: &str, message: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE mailboxes SET last_error = ?, last_error_at = ? WHERE id = ?")
            .bind(message)
            .bind(timestamp_key(at))
            .bind(mailbox_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_success(&self, mailbox_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r"
            UPDATE mailboxes
            SET last_error = NULL, last_error_at = NULL, last_polled_at = ?
            WHERE id = ?
            ",
        )
        .bind(timestamp_key(at))
        .bind(mailbox_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Maps a mailbox row. A port outside `u16` is a column decode error.
fn row_to_mailbox(row: &sqlx::sqlite::SqliteRow) -> Result<MailboxRecord> {
    let port = u16::try_from(row.get::<i64, _>("port")).map_err(|e| {
        sqlx::Error::ColumnDecode {
            index: "port".to_string(),
            source: Box::new(e),
        }
    })?;
    let last_error_at = row
        .get::<Option<String>, _>("last_error_at")
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Ok(MailboxRecord {
        id: row.get("id"),
        name: row.get("name"),
        host: row.get("host"),
        port,
        username: row.get("username"),
        is_primary: row.get::<i64, _>("is_primary") != 0,
        priority: row.get("priority"),
        last_error_at,
    })
}
