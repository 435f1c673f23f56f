//! One login-to-logout IMAP session.
//!
//! The session tracks the protocol state at runtime rather than in the type,
//! so [`Session::logout`] can be called from any state as the cleanup step of
//! a poll, including after a failed LOGIN or SELECT.

#![allow(clippy::missing_errors_doc)]

use tokio::io::{AsyncRead, AsyncWrite};

use crate::command::{Command, FetchSection, StoreAction, TagGenerator};
use crate::connection::{Config, FramedStream, ImapStream, ResponseAccumulator, ResponseLine, connect};
use crate::response::{self, Completion, Status};
use crate::{Error, Result};

/// Protocol state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Greeting received, not logged in yet.
    NotAuthenticated,
    /// LOGIN succeeded.
    Authenticated,
    /// A mailbox is selected.
    Selected,
    /// LOGOUT sent (or the connection is unusable).
    Logout,
}

/// An IMAP session over any async stream.
pub struct Session<S> {
    stream: FramedStream<S>,
    tags: TagGenerator,
    state: SessionState,
}

impl Session<ImapStream> {
    /// Connects as described by `config` and reads the greeting.
    ///
    /// Every later response read is bounded by `config.io_timeout`.
    pub async fn connect(config: &Config) -> Result<Self> {
        let stream = connect(config).await?;
        let framed = FramedStream::new(stream).with_read_timeout(config.io_timeout);
        Self::from_framed(framed).await
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a session from a connected stream and reads the greeting.
    pub async fn from_stream(stream: S) -> Result<Self> {
        Self::from_framed(FramedStream::new(stream)).await
    }

    /// Creates a session from a framed stream and reads the greeting.
    pub async fn from_framed(mut stream: FramedStream<S>) -> Result<Self> {
        let greeting = stream.read_response().await?;
        response::check_greeting(&greeting)?;
        tracing::debug!(greeting = %String::from_utf8_lossy(greeting.head()), "IMAP greeting");

        Ok(Self {
            stream,
            tags: TagGenerator::default(),
            state: SessionState::NotAuthenticated,
        })
    }

    /// Returns the current protocol state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Sends one command and reads every response up to its tagged completion.
    ///
    /// Untagged responses are returned without the completion line, which is
    /// parsed into a [`Completion`]. The caller decides what a NO or BAD means.
    pub async fn execute(&mut self, command: &Command) -> Result<(Vec<ResponseLine>, Completion)> {
        let tag = self.tags.next_tag();
        tracing::debug!(command = %command.redacted(&tag), "IMAP send");

        self.stream.write_command(&command.serialize(&tag)).await?;
        let mut responses = ResponseAccumulator::new(tag.as_str())
            .read_until_tagged(&mut self.stream)
            .await?;

        let completion = responses
            .pop()
            .and_then(|line| response::parse_completion(&line, &tag))
            .ok_or_else(|| {
                Error::Protocol(format!("malformed completion for {}", command.name()))
            })?;
        tracing::debug!(tag = %tag, status = ?completion.status, "IMAP completion");

        Ok((responses, completion))
    }

    /// Authenticates with LOGIN.
    ///
    /// Any completion other than OK is reported as [`Error::Auth`].
    pub async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        self.require(&[SessionState::NotAuthenticated], "LOGIN")?;
        let command = Command::Login {
            username: username.to_string(),
            password: password.to_string(),
        };
        let (_, completion) = self.execute(&command).await?;
        if completion.status != Status::Ok {
            return Err(Error::Auth(completion.text));
        }
        self.state = SessionState::Authenticated;
        Ok(())
    }

    /// Selects a mailbox and returns its message count from `* N EXISTS`.
    ///
    /// Any completion other than OK is reported as [`Error::Select`]. A
    /// server that omits EXISTS is treated as an empty mailbox.
    pub async fn select(&mut self, mailbox: &str) -> Result<u32> {
        self.require(&[SessionState::Authenticated, SessionState::Selected], "SELECT")?;
        let command = Command::Select {
            mailbox: mailbox.to_string(),
        };
        let (responses, completion) = self.execute(&command).await?;
        if completion.status != Status::Ok {
            return Err(Error::Select(completion.text));
        }
        self.state = SessionState::Selected;

        let exists = response::parse_exists(&responses).unwrap_or_else(|| {
            tracing::warn!(mailbox, "SELECT response carried no EXISTS count");
            0
        });
        Ok(exists)
    }

    /// Runs SEARCH with raw criteria and returns the matching sequence numbers.
    pub async fn search(&mut self, criteria: &str) -> Result<Vec<u32>> {
        self.require(&[SessionState::Selected], "SEARCH")?;
        let command = Command::Search {
            criteria: criteria.to_string(),
        };
        let (responses, completion) = self.execute(&command).await?;
        check_ok(completion)?;
        Ok(response::parse_search(&responses))
    }

    /// Fetches the header block of one message without setting `\Seen`.
    pub async fn fetch_header(&mut self, seq: u32) -> Result<Vec<u8>> {
        self.fetch(seq, FetchSection::Header).await
    }

    /// Fetches the full raw message without setting `\Seen`.
    ///
    /// The returned bytes are exactly the octets of the server's literal.
    pub async fn fetch_body(&mut self, seq: u32) -> Result<Vec<u8>> {
        self.fetch(seq, FetchSection::Full).await
    }

    async fn fetch(&mut self, seq: u32, section: FetchSection) -> Result<Vec<u8>> {
        self.require(&[SessionState::Selected], "FETCH")?;
        let (responses, completion) = self.execute(&Command::Fetch { seq, section }).await?;
        check_ok(completion)?;
        response::fetch_literal(&responses, seq)
            .ok_or_else(|| Error::Protocol(format!("FETCH {seq} returned no literal")))
    }

    /// Adds `\Seen` to one message.
    pub async fn store_seen(&mut self, seq: u32) -> Result<()> {
        self.require(&[SessionState::Selected], "STORE")?;
        let command = Command::Store {
            seq,
            action: StoreAction::MarkSeen,
        };
        let (_, completion) = self.execute(&command).await?;
        check_ok(completion)
    }

    /// Sends LOGOUT and closes the stream.
    ///
    /// Safe to call in any state and more than once. The stream is shut down
    /// even if LOGOUT itself fails.
    pub async fn logout(&mut self) -> Result<()> {
        if self.state == SessionState::Logout {
            return Ok(());
        }
        self.state = SessionState::Logout;

        // The server answers with `* BYE` before the tagged OK.
        let result = self.execute(&Command::Logout).await.map(|_| ());
        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!(error = %e, "stream shutdown after LOGOUT failed");
        }
        result
    }

    /// Returns a reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }

    fn require(&self, allowed: &[SessionState], command: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "{command} not allowed in state {:?}",
                self.state
            )))
        }
    }
}

fn check_ok(completion: Completion) -> Result<()> {
    match completion.status {
        Status::Ok => Ok(()),
        Status::No => Err(Error::No(completion.text)),
        Status::Bad => Err(Error::Bad(completion.text)),
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_greeting_bye_rejected() {
        let mock = Builder::new().read(b"* BYE server full\r\n").build();
        let result = Session::from_stream(mock).await;
        assert!(matches!(result, Err(Error::Bye(_))));
    }

    #[tokio::test]
    async fn test_login_no_is_auth_error() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0001 LOGIN user wrong\r\n")
            .read(b"A0001 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n")
            .build();
        let mut session = Session::from_stream(mock).await.unwrap();

        let err = session.login("user", "wrong").await.unwrap_err();
        assert!(matches!(err, Error::Auth(text) if text.contains("Invalid credentials")));
        assert_eq!(session.state(), SessionState::NotAuthenticated);
    }

    #[tokio::test]
    async fn test_commands_require_state() {
        let mock = Builder::new().read(b"* OK ready\r\n").build();
        let mut session = Session::from_stream(mock).await.unwrap();

        assert!(matches!(
            session.search("UNSEEN").await,
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            session.select("INBOX").await,
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_select_failure() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0001 LOGIN user pass\r\n")
            .read(b"A0001 OK logged in\r\n")
            .write(b"A0002 SELECT INBOX\r\n")
            .read(b"A0002 NO Mailbox doesn't exist\r\n")
            .build();
        let mut session = Session::from_stream(mock).await.unwrap();
        session.login("user", "pass").await.unwrap();

        let err = session.select("INBOX").await.unwrap_err();
        assert!(matches!(err, Error::Select(_)));
        assert_eq!(session.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn test_logout_from_any_state_is_idempotent() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0001 LOGOUT\r\n")
            .read(b"* BYE logging out\r\nA0001 OK LOGOUT completed\r\n")
            .build();
        let mut session = Session::from_stream(mock).await.unwrap();

        session.logout().await.unwrap();
        assert_eq!(session.state(), SessionState::Logout);
        session.logout().await.unwrap();
    }
}
