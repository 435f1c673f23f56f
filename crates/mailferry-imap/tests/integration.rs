//! Integration tests for the IMAP session.
//!
//! These tests use a mock stream to simulate IMAP server responses
//! without requiring a real server connection.

#![allow(clippy::unwrap_used)]

use std::io::{self, Cursor};
use std::pin::Pin;
use std::task::{Context, Poll};

use proptest::prelude::*;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use mailferry_imap::{Error, Session, SessionState};

/// Mock stream that returns predefined responses.
struct MockStream {
    /// Responses to return (in order).
    responses: Cursor<Vec<u8>>,
    /// Captured commands sent by the client.
    sent: Vec<u8>,
}

impl MockStream {
    fn new(responses: &[u8]) -> Self {
        Self {
            responses: Cursor::new(responses.to_vec()),
            sent: Vec::new(),
        }
    }

    fn sent_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.sent)
            .split("\r\n")
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let data = self.responses.get_ref();
        let pos = self.responses.position() as usize;

        if pos >= data.len() {
            return Poll::Ready(Ok(()));
        }

        let remaining = &data[pos..];
        let to_read = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..to_read]);
        self.responses.set_position((pos + to_read) as u64);

        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.sent.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn fetch_response(seq: u32, section: &str, payload: &[u8], tag: &str) -> Vec<u8> {
    let mut out = format!("* {seq} FETCH ({section} {{{}}}\r\n", payload.len()).into_bytes();
    out.extend_from_slice(payload);
    out.extend_from_slice(b")\r\n");
    out.extend_from_slice(format!("{tag} OK FETCH completed\r\n").as_bytes());
    out
}

#[tokio::test]
async fn test_full_poll_cycle() {
    let header = b"From: a@b.test\r\nTo: box@temp.test\r\nSubject: hi\r\n\r\n";
    let body = b"From: a@b.test\r\nSubject: hi\r\n\r\nhello\r\n";

    let mut script = Vec::new();
    script.extend_from_slice(b"* OK [CAPABILITY IMAP4rev1] ready\r\n");
    script.extend_from_slice(b"A0001 OK LOGIN completed\r\n");
    script.extend_from_slice(b"* FLAGS (\\Seen)\r\n* 3 EXISTS\r\n* 0 RECENT\r\nA0002 OK [READ-WRITE] SELECT completed\r\n");
    script.extend_from_slice(b"* SEARCH 2 3\r\nA0003 OK SEARCH completed\r\n");
    script.extend_from_slice(&fetch_response(3, "BODY[HEADER]", header, "A0004"));
    script.extend_from_slice(&fetch_response(3, "BODY[]", body, "A0005"));
    script.extend_from_slice(b"* 3 FETCH (FLAGS (\\Seen))\r\nA0006 OK STORE completed\r\n");
    script.extend_from_slice(b"* BYE bye\r\nA0007 OK LOGOUT completed\r\n");

    let mut session = Session::from_stream(MockStream::new(&script)).await.unwrap();
    session.login("box@temp.test", "secret").await.unwrap();
    assert_eq!(session.state(), SessionState::Authenticated);

    assert_eq!(session.select("INBOX").await.unwrap(), 3);
    assert_eq!(session.state(), SessionState::Selected);
    assert_eq!(session.search("UNSEEN").await.unwrap(), vec![2, 3]);

    assert_eq!(session.fetch_header(3).await.unwrap(), header.to_vec());
    assert_eq!(session.fetch_body(3).await.unwrap(), body.to_vec());
    session.store_seen(3).await.unwrap();
    session.logout().await.unwrap();

    assert_eq!(
        session.get_ref().sent_lines(),
        vec![
            "A0001 LOGIN box@temp.test secret",
            "A0002 SELECT INBOX",
            "A0003 SEARCH UNSEEN",
            "A0004 FETCH 3 BODY.PEEK[HEADER]",
            "A0005 FETCH 3 BODY.PEEK[]",
            "A0006 STORE 3 +FLAGS (\\Seen)",
            "A0007 LOGOUT",
        ]
    );
}

#[tokio::test]
async fn test_body_containing_completion_text_is_extracted_in_full() {
    // The body holds what looks like the completion for its own FETCH tag.
    let body = b"Subject: trap\r\n\r\nfirst line\r\nA0003 OK FETCH completed\r\nlast line\r\n";

    let mut script = Vec::new();
    script.extend_from_slice(b"* OK ready\r\n");
    script.extend_from_slice(b"A0001 OK LOGIN completed\r\n");
    script.extend_from_slice(b"* 1 EXISTS\r\nA0002 OK SELECT completed\r\n");
    script.extend_from_slice(&fetch_response(1, "BODY[]", body, "A0003"));

    let mut session = Session::from_stream(MockStream::new(&script)).await.unwrap();
    session.login("u", "p").await.unwrap();
    session.select("INBOX").await.unwrap();

    let fetched = session.fetch_body(1).await.unwrap();
    assert_eq!(fetched, body.to_vec());
    assert!(String::from_utf8_lossy(&fetched).ends_with("last line\r\n"));
}

#[tokio::test]
async fn test_fetch_without_literal_is_protocol_error() {
    let mut script = Vec::new();
    script.extend_from_slice(b"* OK ready\r\n");
    script.extend_from_slice(b"A0001 OK LOGIN completed\r\n");
    script.extend_from_slice(b"* 1 EXISTS\r\nA0002 OK SELECT completed\r\n");
    script.extend_from_slice(b"* 1 FETCH (BODY[] NIL)\r\nA0003 OK FETCH completed\r\n");

    let mut session = Session::from_stream(MockStream::new(&script)).await.unwrap();
    session.login("u", "p").await.unwrap();
    session.select("INBOX").await.unwrap();

    assert!(matches!(session.fetch_body(1).await, Err(Error::Protocol(_))));
}

#[tokio::test]
async fn test_connection_dropped_mid_command() {
    let script = b"* OK ready\r\nA0001 OK LOGIN completed\r\n* 1 EXI";

    let mut session = Session::from_stream(MockStream::new(script)).await.unwrap();
    session.login("u", "p").await.unwrap();

    let err = session.select("INBOX").await.unwrap_err();
    assert!(err.is_connection());
}

#[tokio::test]
async fn test_logout_after_failed_login_still_sends_logout() {
    let script = b"* OK ready\r\nA0001 NO bad credentials\r\n* BYE\r\nA0002 OK bye\r\n";

    let mut session = Session::from_stream(MockStream::new(script)).await.unwrap();
    assert!(matches!(
        session.login("u", "wrong").await,
        Err(Error::Auth(_))
    ));
    session.logout().await.unwrap();

    let sent = session.get_ref().sent_lines();
    assert_eq!(sent.last().map(String::as_str), Some("A0002 LOGOUT"));
}

proptest! {
    #[test]
    fn prop_fetch_returns_exact_literal(payload in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let mut script = Vec::new();
        script.extend_from_slice(b"* OK ready\r\nA0001 OK\r\n* 1 EXISTS\r\nA0002 OK\r\n");
        script.extend_from_slice(&fetch_response(1, "BODY[]", &payload, "A0003"));

        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let fetched = runtime.block_on(async {
            let mut session = Session::from_stream(MockStream::new(&script)).await.unwrap();
            session.login("u", "p").await.unwrap();
            session.select("INBOX").await.unwrap();
            session.fetch_body(1).await.unwrap()
        });
        prop_assert_eq!(fetched, payload);
    }
}
