//! # mailferry-mime
//!
//! Lenient MIME decoding for inbound mail.
//!
//! ## Features
//!
//! - **Encoding/Decoding**: Base64 and Quoted-Printable that tolerate line
//!   noise, RFC 2047 encoded-words, charset conversion
//! - **Headers**: unfolding, decoded subjects, recipient candidate extraction
//! - **Bodies**: recursive multipart walk over byte ranges, first text/plain
//!   and text/html part, text/HTML synthesis and storage truncation
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailferry_mime::{Headers, extract_recipients, parse_body};
//!
//! let raw_headers = "To: user@temp.example\r\nSubject: =?utf-8?B?SGk=?=\r\n";
//! let headers = Headers::parse(raw_headers);
//! assert_eq!(headers.subject().as_deref(), Some("Hi"));
//! assert_eq!(extract_recipients(&headers, raw_headers), ["user@temp.example"]);
//!
//! let body = parse_body(b"Content-Type: text/plain\r\n\r\nHello").truncated();
//! assert_eq!(body.text, "Hello");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod body;
mod content_type;
mod error;
mod header;

pub mod encoding;
pub mod html;

pub use body::{BodyParts, MAX_HTML_CHARS, MAX_TEXT_CHARS, TransferEncoding, parse_body};
pub use content_type::ContentType;
pub use error::{Error, Result};
pub use header::{Headers, RECIPIENT_HEADERS, extract_addresses, extract_recipients};
