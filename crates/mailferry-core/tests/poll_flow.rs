//! End-to-end poll passes over a scripted IMAP server and an in-memory store.

#![allow(clippy::unwrap_used)]

use std::io::{self, Cursor};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use mailferry_core::{
    CredentialSource, Database, Error, MailboxCredential, MessagePipeline, OwnerId, PollMode,
    PollRequest, decode_message, run_session,
};
use mailferry_imap::Session;
use mailferry_mime::Headers;

/// Scripted server; commands written by the client are captured in `sent`.
struct ScriptedServer {
    responses: Cursor<Vec<u8>>,
    sent: Arc<Mutex<Vec<u8>>>,
}

impl AsyncRead for ScriptedServer {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let pos = self.responses.position() as usize;
        let data = self.responses.get_ref();
        if pos >= data.len() {
            return Poll::Ready(Ok(()));
        }

        let to_read = (data.len() - pos).min(buf.remaining());
        buf.put_slice(&data[pos..pos + to_read]);
        self.responses.set_position((pos + to_read) as u64);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for ScriptedServer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.sent.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

async fn session(script: &[u8]) -> (Session<ScriptedServer>, Arc<Mutex<Vec<u8>>>) {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let server = ScriptedServer {
        responses: Cursor::new(script.to_vec()),
        sent: Arc::clone(&sent),
    };
    (Session::from_stream(server).await.unwrap(), sent)
}

fn sent_lines(sent: &Mutex<Vec<u8>>) -> Vec<String> {
    String::from_utf8_lossy(&sent.lock().unwrap())
        .split("\r\n")
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn fetch(seq: u32, section: &str, payload: &[u8], tag: &str) -> Vec<u8> {
    let mut out = format!("* {seq} FETCH ({section} {{{}}}\r\n", payload.len()).into_bytes();
    out.extend_from_slice(payload);
    out.extend_from_slice(b")\r\n");
    out.extend_from_slice(format!("{tag} OK FETCH completed\r\n").as_bytes());
    out
}

fn credential() -> MailboxCredential {
    MailboxCredential {
        source: CredentialSource::Test,
        mailbox_id: None,
        mailbox_name: None,
        host: "imap.example.com".to_string(),
        port: 993,
        username: "catchall@example.com".to_string(),
        password: "secret".to_string(),
        last_error_at: None,
    }
}

const MATCH_HEADER: &[u8] = b"From: Shop <noreply@shop.example>\r\n\
To: Box@Temp.Example\r\n\
Subject: Your code\r\n\
Date: Sat, 24 Jan 2026 10:00:00 +0000\r\n\r\n";

const MATCH_MESSAGE: &[u8] = b"From: Shop <noreply@shop.example>\r\n\
To: Box@Temp.Example\r\n\
Subject: Your code\r\n\
Date: Sat, 24 Jan 2026 10:00:00 +0000\r\n\
Content-Type: text/plain; charset=utf-8\r\n\r\n\
Your code is 1234\r\n";

const STRANGER_HEADER: &[u8] = b"From: someone@else.example\r\n\
To: nobody@temp.example\r\n\
Subject: Hello\r\n\r\n";

/// Two messages: #2 belongs to a registered address, #1 to nobody.
fn two_message_script() -> Vec<u8> {
    let mut script = Vec::new();
    script.extend_from_slice(b"* OK ready\r\n");
    script.extend_from_slice(b"A0001 OK LOGIN completed\r\n");
    script.extend_from_slice(b"* 2 EXISTS\r\nA0002 OK [READ-WRITE] SELECT completed\r\n");
    script.extend_from_slice(b"* SEARCH 1 2\r\nA0003 OK SEARCH completed\r\n");
    script.extend_from_slice(&fetch(2, "BODY[HEADER]", MATCH_HEADER, "A0004"));
    script.extend_from_slice(&fetch(2, "BODY[]", MATCH_MESSAGE, "A0005"));
    script.extend_from_slice(b"A0006 OK STORE completed\r\n");
    script.extend_from_slice(&fetch(1, "BODY[HEADER]", STRANGER_HEADER, "A0007"));
    script.extend_from_slice(b"A0008 OK STORE completed\r\n");
    script.extend_from_slice(b"* BYE logging out\r\nA0009 OK LOGOUT completed\r\n");
    script
}

async fn database() -> (Database, OwnerId) {
    let db = Database::in_memory().await.unwrap();
    db.domain_list().add("temp.example", true).await.unwrap();
    let owner = db
        .address_registry()
        .register("box@temp.example", None)
        .await
        .unwrap();
    (db, owner)
}

#[tokio::test]
async fn test_repeated_polls_store_each_message_once() {
    let (db, owner) = database().await;
    let registry = db.address_registry();
    let messages = db.message_store();
    let request = PollRequest::default();

    let (first, sent) = session(&two_message_script()).await;
    let mut pipeline = MessagePipeline::new(&registry, &messages, vec!["temp.example".into()]);
    let stats = run_session(first, &credential(), &request, "INBOX", &mut pipeline)
        .await
        .unwrap();

    assert_eq!(stats.total_messages, 2);
    assert_eq!(stats.unseen_messages, 2);
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.stored, 1);
    assert_eq!(stats.no_match, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(
        sent_lines(&sent),
        vec![
            "A0001 LOGIN catchall@example.com secret",
            "A0002 SELECT INBOX",
            "A0003 SEARCH UNSEEN",
            "A0004 FETCH 2 BODY.PEEK[HEADER]",
            "A0005 FETCH 2 BODY.PEEK[]",
            "A0006 STORE 2 +FLAGS (\\Seen)",
            "A0007 FETCH 1 BODY.PEEK[HEADER]",
            "A0008 STORE 1 +FLAGS (\\Seen)",
            "A0009 LOGOUT",
        ]
    );

    // A later poll sees the same messages again.
    let (second, _) = session(&two_message_script()).await;
    let mut pipeline = MessagePipeline::new(&registry, &messages, vec!["temp.example".into()]);
    let stats = run_session(second, &credential(), &request, "INBOX", &mut pipeline)
        .await
        .unwrap();

    assert_eq!(stats.stored, 0);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.no_match, 1);
    assert_eq!(messages.count_for(owner).await.unwrap(), 1);
}

#[tokio::test]
async fn test_failed_message_is_counted_and_flagged() {
    let (db, owner) = database().await;
    let registry = db.address_registry();
    let messages = db.message_store();

    let mut script = Vec::new();
    script.extend_from_slice(b"* OK ready\r\nA0001 OK LOGIN completed\r\n");
    script.extend_from_slice(b"* 1 EXISTS\r\nA0002 OK SELECT completed\r\n");
    script.extend_from_slice(b"* SEARCH 1\r\nA0003 OK SEARCH completed\r\n");
    script.extend_from_slice(&fetch(1, "BODY[HEADER]", MATCH_HEADER, "A0004"));
    script.extend_from_slice(b"A0005 NO message expunged\r\n");
    script.extend_from_slice(b"A0006 OK STORE completed\r\n");
    script.extend_from_slice(b"* BYE\r\nA0007 OK LOGOUT completed\r\n");

    let (session, sent) = session(&script).await;
    let mut pipeline = MessagePipeline::new(&registry, &messages, vec!["temp.example".into()]);
    let stats = run_session(session, &credential(), &PollRequest::default(), "INBOX", &mut pipeline)
        .await
        .unwrap();

    assert_eq!(stats.processed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.stored, 0);
    let sent = sent_lines(&sent);
    assert_eq!(sent[5], "A0006 STORE 1 +FLAGS (\\Seen)");
    assert_eq!(sent[6], "A0007 LOGOUT");
    assert_eq!(messages.count_for(owner).await.unwrap(), 0);
}

#[tokio::test]
async fn test_test_only_stops_after_search() {
    let (db, _) = database().await;
    let registry = db.address_registry();
    let messages = db.message_store();

    let mut script = Vec::new();
    script.extend_from_slice(b"* OK ready\r\nA0001 OK LOGIN completed\r\n");
    script.extend_from_slice(b"* 7 EXISTS\r\nA0002 OK SELECT completed\r\n");
    script.extend_from_slice(b"* SEARCH 6 7\r\nA0003 OK SEARCH completed\r\n");
    script.extend_from_slice(b"* BYE\r\nA0004 OK LOGOUT completed\r\n");

    let request = PollRequest {
        mode: PollMode::Unseen,
        test_only: true,
        ..PollRequest::default()
    };
    let (session, sent) = session(&script).await;
    let mut pipeline = MessagePipeline::new(&registry, &messages, Vec::new());
    let stats = run_session(session, &credential(), &request, "INBOX", &mut pipeline)
        .await
        .unwrap();

    assert_eq!(stats.total_messages, 7);
    assert_eq!(stats.unseen_messages, 2);
    assert_eq!(stats.processed, 0);
    assert_eq!(
        sent_lines(&sent).last().map(String::as_str),
        Some("A0004 LOGOUT")
    );
    assert!(!sent_lines(&sent).iter().any(|l| l.contains("FETCH")));
}

#[tokio::test]
async fn test_rejected_login_is_an_authentication_error_and_logs_out() {
    let (db, _) = database().await;
    let registry = db.address_registry();
    let messages = db.message_store();

    let script = b"* OK ready\r\nA0001 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n* BYE\r\nA0002 OK LOGOUT completed\r\n";
    let (session, sent) = session(script).await;
    let mut pipeline = MessagePipeline::new(&registry, &messages, Vec::new());
    let err = run_session(session, &credential(), &PollRequest::default(), "INBOX", &mut pipeline)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Authentication(_)));
    assert!(err.is_endpoint_failure());
    assert_eq!(
        sent_lines(&sent).last().map(String::as_str),
        Some("A0002 LOGOUT")
    );
}

#[tokio::test]
async fn test_connection_lost_mid_pass_aborts_the_session() {
    let (db, _) = database().await;
    let registry = db.address_registry();
    let messages = db.message_store();

    let mut script = Vec::new();
    script.extend_from_slice(b"* OK ready\r\nA0001 OK LOGIN completed\r\n");
    script.extend_from_slice(b"* 1 EXISTS\r\nA0002 OK SELECT completed\r\n");
    script.extend_from_slice(b"* SEARCH\r\nA0003 OK SEARCH completed\r\n");
    script.extend_from_slice(b"* 1 FETCH (BODY[HEADER] {200}\r\nTo: box@te");

    let (session, _) = session(&script).await;
    let mut pipeline = MessagePipeline::new(&registry, &messages, Vec::new());
    let err = run_session(session, &credential(), &PollRequest::default(), "INBOX", &mut pipeline)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Connection(_)));
}

#[test]
fn test_multipart_message_is_decoded_for_storage() {
    let raw = concat!(
        "From: =?ISO-8859-1?Q?Andr=E9?= <Andre@Example.COM>\r\n",
        "Subject: =?UTF-8?B?Q2Fmw6k=?= menu\r\n",
        "Date: Mon, 2 Feb 2026 08:30:00 +0200 (EET)\r\n",
        "Content-Type: multipart/alternative; boundary=\"b1\"\r\n",
        "\r\n",
        "--b1\r\n",
        "Content-Type: text/plain; charset=iso-8859-1\r\n",
        "Content-Transfer-Encoding: quoted-printable\r\n",
        "\r\n",
        "Caf=E9 au lait=\r\n",
        " today\r\n",
        "--b1\r\n",
        "Content-Type: text/html; charset=utf-8\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "\r\n",
        "PHA+Q2Fmw6k8L3A+\r\n",
        "--b1--\r\n",
    );
    let header_end = raw.find("\r\n\r\n").unwrap() + 4;
    let headers = Headers::parse(&raw[..header_end]);

    let message = decode_message(&headers, raw.as_bytes(), Utc::now());

    assert_eq!(message.from_address, "andre@example.com");
    assert_eq!(message.subject, "Café menu");
    assert_eq!(message.text_body, "Café au lait today");
    assert_eq!(message.html_body, "<p>Café</p>");
    assert_eq!(
        message.received_at,
        DateTime::parse_from_rfc3339("2026-02-02T06:30:00Z")
            .unwrap()
            .with_timezone(&Utc)
    );
}
