//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use mailferry_core::{PollMode, PollRequest};

/// Retrieve mail for disposable addresses from IMAP mailboxes.
///
/// Without a subcommand, runs one poll and prints the JSON result.
#[derive(Parser, Debug)]
#[command(name = "mailferry", version, about)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub poll: PollArgs,

    /// SQLite database file
    #[arg(long, env = "MAILFERRY_DATABASE", global = true, value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one poll (the default)
    Poll(PollArgs),
    /// Add or update a stored mailbox and save its password in the keyring
    AddMailbox(MailboxArgs),
    /// Register a disposable address
    AddAddress {
        /// Address to register
        address: String,
        /// Expire the address after this many hours
        #[arg(long, value_name = "HOURS")]
        expires_in: Option<i64>,
    },
    /// Add a receiving domain to the allow-list
    AddDomain {
        /// Domain name, e.g. temp.example.com
        domain: String,
        /// Store the domain as inactive
        #[arg(long)]
        inactive: bool,
    },
    /// Show the health fields of a stored mailbox
    Health {
        /// Mailbox id
        id: String,
    },
}

#[derive(Args, Debug)]
pub struct PollArgs {
    /// Which messages to examine: latest or unseen
    #[arg(long, default_value = "latest")]
    pub mode: String,

    /// Number of messages to examine (1-50)
    #[arg(long)]
    pub limit: Option<u32>,

    /// Stored mailbox to try first
    #[arg(long, value_name = "ID")]
    pub mailbox_id: Option<String>,

    /// Only check that the mailbox can be opened
    #[arg(long)]
    pub test_only: bool,

    /// Test connection host
    #[arg(long, requires = "test_only")]
    pub host: Option<String>,

    /// Test connection port
    #[arg(long, requires = "test_only")]
    pub port: Option<u16>,

    /// Test connection user
    #[arg(long, requires = "test_only")]
    pub user: Option<String>,

    /// Test connection password
    #[arg(long, env = "MAILFERRY_TEST_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

impl PollArgs {
    /// Builds the poll request.
    pub fn to_request(&self) -> PollRequest {
        PollRequest {
            mode: PollMode::parse(&self.mode),
            limit: self.limit,
            mailbox_id: self.mailbox_id.clone(),
            test_only: self.test_only,
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }
}

#[derive(Args, Debug)]
pub struct MailboxArgs {
    /// Record id
    pub id: String,

    /// Server hostname
    #[arg(long)]
    pub host: String,

    /// Server port
    #[arg(long, default_value_t = 993)]
    pub port: u16,

    /// Login name
    #[arg(long)]
    pub user: String,

    /// Login password, saved in the system keyring
    #[arg(long, env = "MAILFERRY_MAILBOX_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Display name (defaults to the id)
    #[arg(long)]
    pub name: Option<String>,

    /// Try this mailbox before all others
    #[arg(long)]
    pub primary: bool,

    /// Higher priorities are tried first
    #[arg(long, default_value_t = 0)]
    pub priority: i64,
}
