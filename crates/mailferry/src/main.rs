//! `mailferry` - retrieves mail for disposable addresses.
//!
//! Runs one poll over the configured IMAP mailboxes and prints the result
//! as JSON on stdout. Logs go to stderr.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod cli;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, TimeDelta, Utc};
use clap::Parser;
use serde_json::{Value, json};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mailferry_core::{Database, KeyringSecrets, MailboxRecord, PollerConfig, run_poll};

use cli::{Cli, Commands, MailboxArgs, PollArgs};

const DEFAULT_FILTER: &str = "mailferry=info,mailferry_core=info,mailferry_imap=info";
const VERBOSE_FILTER: &str = "mailferry=debug,mailferry_core=debug,mailferry_imap=debug";

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let path = database_path(cli.database.clone())?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let db = Database::new(&path.to_string_lossy())
        .await
        .with_context(|| format!("Failed to open database {}", path.display()))?;

    let (output, success) = match &cli.command {
        None => poll(&db, &cli.poll).await?,
        Some(Commands::Poll(args)) => poll(&db, args).await?,
        Some(Commands::AddMailbox(args)) => (add_mailbox(&db, args).await?, true),
        Some(Commands::AddAddress {
            address,
            expires_in,
        }) => {
            let expires_at = expires_in
                .map(|hours| expiry_after(Utc::now(), hours))
                .transpose()?;
            let owner = db.address_registry().register(address, expires_at).await?;
            (json!({ "success": true, "ownerId": owner.0 }), true)
        }
        Some(Commands::AddDomain { domain, inactive }) => {
            db.domain_list().add(domain, !inactive).await?;
            (json!({ "success": true }), true)
        }
        Some(Commands::Health { id }) => match db.mailbox_store().health(id).await? {
            Some(health) => (json!({ "success": true, "health": health }), true),
            None => (
                json!({ "success": false, "error": format!("Unknown mailbox: {id}") }),
                false,
            ),
        },
    };

    let text = if cli.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{text}");

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn init_tracing(verbose: bool) {
    let default = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Expiry time `hours` after `now`, rejecting values chrono cannot represent.
fn expiry_after(now: DateTime<Utc>, hours: i64) -> Result<DateTime<Utc>> {
    TimeDelta::try_hours(hours)
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| anyhow!("--expires-in {hours} is out of range"))
}

/// Explicit path, or `mailferry/mailferry.db` in the platform data directory.
fn database_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    let data_dir = dirs::data_dir().context("No data directory on this platform; pass --database")?;
    Ok(data_dir.join("mailferry").join("mailferry.db"))
}

async fn poll(db: &Database, args: &PollArgs) -> Result<(Value, bool)> {
    let request = args.to_request();
    let config = PollerConfig::from_env();
    info!(
        mode = request.mode.as_str(),
        limit = request.effective_limit(),
        test_only = request.test_only,
        "Starting poll"
    );

    let response = run_poll(&request, &config, db, &KeyringSecrets).await;
    Ok((serde_json::to_value(&response)?, response.success))
}

async fn add_mailbox(db: &Database, args: &MailboxArgs) -> Result<Value> {
    KeyringSecrets
        .store(&args.id, &args.password)
        .context("Failed to save the mailbox password in the keyring")?;

    let record = MailboxRecord {
        id: args.id.clone(),
        name: args.name.clone().unwrap_or_else(|| args.id.clone()),
        host: args.host.clone(),
        port: args.port,
        username: args.user.clone(),
        is_primary: args.primary,
        priority: args.priority,
        last_error_at: None,
    };
    db.mailbox_store().upsert(&record).await?;
    info!(mailbox_id = %record.id, host = %record.host, "Stored mailbox");

    Ok(json!({ "success": true, "mailboxId": record.id }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_after_adds_hours() {
        let now = DateTime::parse_from_rfc3339("2026-01-24T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let expiry = expiry_after(now, 48).unwrap();
        assert_eq!(expiry.to_rfc3339(), "2026-01-26T10:00:00+00:00");
    }

    #[test]
    fn test_expiry_after_rejects_huge_values() {
        let err = expiry_after(Utc::now(), i64::MAX).unwrap_err();
        assert!(err.to_string().contains("out of range"));

        let err = expiry_after(Utc::now(), 2_000_000_000_000).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }
}
