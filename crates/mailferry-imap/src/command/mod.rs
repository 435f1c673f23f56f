//! IMAP command builder.
//!
//! Only the commands a polling session needs: LOGIN, SELECT, SEARCH, FETCH,
//! STORE and LOGOUT.

mod serialize;
mod tag_generator;

pub use tag_generator::TagGenerator;

use serialize::write_astring;

/// Message section requested by FETCH.
///
/// Both variants use `BODY.PEEK` so fetching never sets `\Seen` on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSection {
    /// `BODY.PEEK[HEADER]`: the header block only.
    Header,
    /// `BODY.PEEK[]`: the full raw message.
    Full,
}

impl FetchSection {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Header => "BODY.PEEK[HEADER]",
            Self::Full => "BODY.PEEK[]",
        }
    }
}

/// Flag change requested by STORE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreAction {
    /// `+FLAGS (\Seen)`.
    MarkSeen,
}

/// IMAP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// LOGIN command.
    Login {
        /// Username.
        username: String,
        /// Password.
        password: String,
    },
    /// SELECT command.
    Select {
        /// Mailbox to select.
        mailbox: String,
    },
    /// SEARCH command with a raw criteria string (e.g. `UNSEEN`).
    Search {
        /// Search criteria.
        criteria: String,
    },
    /// FETCH of one message section by sequence number.
    Fetch {
        /// Message sequence number.
        seq: u32,
        /// Section to fetch.
        section: FetchSection,
    },
    /// STORE on one message by sequence number.
    Store {
        /// Message sequence number.
        seq: u32,
        /// Flag change.
        action: StoreAction,
    },
    /// LOGOUT command.
    Logout,
}

impl Command {
    /// Returns the command name, for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Login { .. } => "LOGIN",
            Self::Select { .. } => "SELECT",
            Self::Search { .. } => "SEARCH",
            Self::Fetch { .. } => "FETCH",
            Self::Store { .. } => "STORE",
            Self::Logout => "LOGOUT",
        }
    }

    /// Serializes the command with the given tag, CRLF-terminated.
    #[must_use]
    pub fn serialize(&self, tag: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(tag.as_bytes());
        buf.push(b' ');

        match self {
            Self::Login { username, password } => {
                buf.extend_from_slice(b"LOGIN ");
                write_astring(&mut buf, username);
                buf.push(b' ');
                write_astring(&mut buf, password);
            }
            Self::Select { mailbox } => {
                buf.extend_from_slice(b"SELECT ");
                write_astring(&mut buf, mailbox);
            }
            Self::Search { criteria } => {
                buf.extend_from_slice(b"SEARCH ");
                buf.extend_from_slice(criteria.as_bytes());
            }
            Self::Fetch { seq, section } => {
                buf.extend_from_slice(format!("FETCH {seq} {}", section.as_str()).as_bytes());
            }
            Self::Store { seq, action } => match action {
                StoreAction::MarkSeen => {
                    buf.extend_from_slice(format!("STORE {seq} +FLAGS (\\Seen)").as_bytes());
                }
            },
            Self::Logout => buf.extend_from_slice(b"LOGOUT"),
        }

        buf.extend_from_slice(b"\r\n");
        buf
    }

    /// Serializes for logging, with the password masked.
    #[must_use]
    pub fn redacted(&self, tag: &str) -> String {
        match self {
            Self::Login { username, .. } => format!("{tag} LOGIN {username} ****"),
            _ => String::from_utf8_lossy(&self.serialize(tag))
                .trim_end()
                .to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_login_quotes_password() {
        let cmd = Command::Login {
            username: "user@example.com".to_string(),
            password: "p@ss word".to_string(),
        };
        assert_eq!(
            cmd.serialize("A0001"),
            b"A0001 LOGIN user@example.com \"p@ss word\"\r\n"
        );
        assert_eq!(cmd.redacted("A0001"), "A0001 LOGIN user@example.com ****");
    }

    #[test]
    fn test_serialize_select_search() {
        let select = Command::Select {
            mailbox: "INBOX".to_string(),
        };
        assert_eq!(select.serialize("A0002"), b"A0002 SELECT INBOX\r\n");

        let search = Command::Search {
            criteria: "UNSEEN".to_string(),
        };
        assert_eq!(search.serialize("A0003"), b"A0003 SEARCH UNSEEN\r\n");
    }

    #[test]
    fn test_serialize_fetch_and_store() {
        let header = Command::Fetch {
            seq: 42,
            section: FetchSection::Header,
        };
        assert_eq!(header.serialize("A0004"), b"A0004 FETCH 42 BODY.PEEK[HEADER]\r\n");

        let full = Command::Fetch {
            seq: 42,
            section: FetchSection::Full,
        };
        assert_eq!(full.serialize("A0005"), b"A0005 FETCH 42 BODY.PEEK[]\r\n");

        let store = Command::Store {
            seq: 42,
            action: StoreAction::MarkSeen,
        };
        assert_eq!(store.serialize("A0006"), b"A0006 STORE 42 +FLAGS (\\Seen)\r\n");
        assert_eq!(store.redacted("A0006"), "A0006 STORE 42 +FLAGS (\\Seen)");
    }

    #[test]
    fn test_serialize_logout() {
        assert_eq!(Command::Logout.serialize("A0007"), b"A0007 LOGOUT\r\n");
    }
}
