//! # mailferry-imap
//!
//! A small async IMAP client for short polling sessions: connect, LOGIN,
//! SELECT, SEARCH, FETCH, STORE, LOGOUT.
//!
//! ## Features
//!
//! - **Implicit TLS via rustls** on port 993, plain TCP elsewhere
//! - **Exact literal handling**: `{N}` payloads are consumed by octet count,
//!   so message bodies that contain tag-like text never end a response early
//! - **Timeouts** on connect and on every response read
//! - **Runtime session state** so LOGOUT works as a cleanup step from any state
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailferry_imap::{Config, Session};
//!
//! #[tokio::main]
//! async fn main() -> mailferry_imap::Result<()> {
//!     let config = Config::builder("imap.example.com").port(993).build();
//!     let mut session = Session::connect(&config).await?;
//!
//!     session.login("user@example.com", "password").await?;
//!     let exists = session.select("INBOX").await?;
//!     let unseen = session.search("UNSEEN").await?;
//!     println!("{exists} messages, {} unseen", unseen.len());
//!
//!     if exists > 0 {
//!         let header = session.fetch_header(exists).await?;
//!         println!("{}", String::from_utf8_lossy(&header));
//!     }
//!
//!     session.logout().await
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod response;
mod session;

pub use command::{Command, FetchSection, StoreAction, TagGenerator};
pub use connection::{Config, ConfigBuilder, FramedStream, ImapStream, ResponseLine, Security};
pub use error::{Error, Result};
pub use session::{Session, SessionState};
