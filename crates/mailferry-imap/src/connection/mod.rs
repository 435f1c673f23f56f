//! IMAP connection management.
//!
//! This module provides connection handling for IMAP servers, including:
//! - Configuration (host, port, timeouts)
//! - TLS/plaintext stream abstraction
//! - Framed I/O with exact literal consumption

mod config;
mod framed;
mod stream;

pub use config::{Config, ConfigBuilder, IMPLICIT_TLS_PORT, Security};
pub use framed::{FramedStream, ResponseAccumulator, ResponseLine};
pub use stream::{ImapStream, connect, create_tls_connector};
