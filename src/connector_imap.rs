//! IMAP-backed mail connector.
//!
//! Talks to a real mailbox over IMAP with TLS. Incremental sync uses the
//! mailbox UIDVALIDITY plus the highest UID seen so far as the cursor
//! (`"{uidvalidity}:{last_uid}"`); when the server rotates UIDVALIDITY the
//! UID space is invalid and the connector starts over from UID 1.
//!
//! The `imap` client is blocking, so every session operation runs inside
//! `tokio::task::spawn_blocking` with the session moved in and out of the
//! closure. On a mid-stream fetch failure the messages parsed so far are
//! returned with a cursor positioned after the last good UID.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use parking_lot::Mutex;
use std::net::TcpStream;
use tracing::{debug, warn};

use crate::connector::{FetchBatch, MailConnector};
use crate::error::{EngineError, Result};
use crate::models::{ConnectorKind, MailboxConfig, RawMessage};

type ImapSession = imap::Session<native_tls::TlsStream<TcpStream>>;

/// UIDs fetched per round trip.
const FETCH_CHUNK: usize = 20;

pub struct ImapConnector {
    config: MailboxConfig,
    // Mutex only to make the session `Sync`; access is always through
    // `&mut self`, so `get_mut` never contends.
    session: Mutex<Option<ImapSession>>,
}

impl ImapConnector {
    pub fn new(config: MailboxConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    fn mailbox(&self) -> String {
        self.config
            .mailbox
            .clone()
            .unwrap_or_else(|| "INBOX".to_string())
    }
}

#[async_trait]
impl MailConnector for ImapConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Imap
    }

    async fn connect(&mut self) -> Result<()> {
        if self.session.get_mut().is_some() {
            return Ok(());
        }

        let config = self.config.clone();
        let session = tokio::task::spawn_blocking(move || -> Result<ImapSession> {
            let host = config
                .host
                .clone()
                .ok_or_else(|| EngineError::Auth("imap host is required".to_string()))?;
            let port = config.port.unwrap_or(993);

            let tls = native_tls::TlsConnector::builder()
                .build()
                .map_err(|e| EngineError::Auth(format!("tls setup failed: {}", e)))?;

            let client = imap::connect((host.as_str(), port), host.as_str(), &tls)
                .map_err(|e| EngineError::Auth(format!("connection to {} failed: {}", host, e)))?;

            client
                .login(&config.username, &config.password)
                .map_err(|(e, _)| EngineError::Auth(format!("login failed: {}", e)))
        })
        .await
        .map_err(|e| EngineError::Auth(format!("connect task failed: {}", e)))??;

        debug!(username = %self.config.username, "imap session established");
        *self.session.get_mut() = Some(session);
        Ok(())
    }

    async fn fetch_new(
        &mut self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<FetchBatch> {
        let session = self
            .session
            .get_mut()
            .take()
            .ok_or_else(|| EngineError::Fetch("not connected".to_string()))?;

        let mailbox = self.mailbox();
        let cursor = cursor.map(|c| c.to_string());

        let result = tokio::task::spawn_blocking(move || {
            fetch_blocking(session, &mailbox, cursor.as_deref(), limit)
        })
        .await
        .map_err(|e| EngineError::Fetch(format!("fetch task failed: {}", e)))?;

        match result {
            Ok((session, batch)) => {
                *self.session.get_mut() = Some(session);
                Ok(batch)
            }
            // Session is gone; the next connect() re-establishes it.
            Err(e) => Err(e),
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut session) = self.session.get_mut().take() {
            let _ = tokio::task::spawn_blocking(move || session.logout()).await;
        }
    }
}

fn fetch_blocking(
    mut session: ImapSession,
    mailbox: &str,
    cursor: Option<&str>,
    limit: usize,
) -> Result<(ImapSession, FetchBatch)> {
    let selected = session
        .select(mailbox)
        .map_err(|e| EngineError::Fetch(format!("select {} failed: {}", mailbox, e)))?;

    let uid_validity = selected.uid_validity.unwrap_or(0);
    let last_uid = parse_cursor(cursor, uid_validity);

    let uid_set: Vec<u32> = session
        .uid_search(format!("UID {}:*", last_uid.saturating_add(1)))
        .map_err(|e| EngineError::Fetch(format!("uid search failed: {}", e)))?
        .into_iter()
        // "UID n:*" always matches the newest message even when its UID < n.
        .filter(|uid| *uid > last_uid)
        .collect();

    let mut uids = uid_set;
    uids.sort_unstable();
    uids.truncate(limit);

    if uids.is_empty() {
        return Ok((
            session,
            FetchBatch {
                messages: Vec::new(),
                cursor: format_cursor(uid_validity, last_uid),
            },
        ));
    }

    let parser = MessageParser::default();
    let mut messages = Vec::new();
    let mut max_fetched_uid = last_uid;
    let mut mid_stream_error: Option<String> = None;

    for chunk in uids.chunks(FETCH_CHUNK) {
        let set = chunk
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let fetches = match session.uid_fetch(&set, "(RFC822 UID)") {
            Ok(f) => f,
            Err(e) => {
                // Keep what was fetched; the cursor stops at the last good UID.
                mid_stream_error = Some(e.to_string());
                break;
            }
        };

        for fetch in fetches.iter() {
            let uid = match fetch.uid {
                Some(uid) => uid,
                None => continue,
            };
            let raw = match fetch.body() {
                Some(raw) => raw,
                None => continue,
            };

            match parse_rfc822(&parser, uid_validity, uid, raw) {
                Some(msg) => messages.push(msg),
                None => warn!(uid, "skipping unparseable message"),
            }
            if uid > max_fetched_uid {
                max_fetched_uid = uid;
            }
        }
    }

    if let Some(err) = mid_stream_error {
        if messages.is_empty() {
            return Err(EngineError::Fetch(err));
        }
        warn!(error = %err, fetched = messages.len(), "partial fetch, resuming next sync");
    }

    Ok((
        session,
        FetchBatch {
            messages,
            cursor: format_cursor(uid_validity, max_fetched_uid),
        },
    ))
}

fn parse_cursor(cursor: Option<&str>, current_uid_validity: u32) -> u32 {
    let Some(cursor) = cursor else { return 0 };
    let Some((validity, uid)) = cursor.split_once(':') else {
        return 0;
    };
    // A UIDVALIDITY change invalidates every stored UID.
    if validity.parse::<u32>().ok() != Some(current_uid_validity) {
        return 0;
    }
    uid.parse().unwrap_or(0)
}

fn format_cursor(uid_validity: u32, last_uid: u32) -> String {
    format!("{}:{}", uid_validity, last_uid)
}

fn parse_rfc822(
    parser: &MessageParser,
    uid_validity: u32,
    uid: u32,
    raw: &[u8],
) -> Option<RawMessage> {
    let message = parser.parse(raw)?;

    let subject = message
        .subject()
        .unwrap_or("(no subject)")
        .to_string();

    let sender = message
        .from()
        .and_then(|a| a.first())
        .map(format_addr)
        .unwrap_or_else(|| "unknown".to_string());

    let recipients = message
        .to()
        .and_then(|a| a.first())
        .map(format_addr)
        .into_iter()
        .collect();

    let date = message
        .date()
        .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(Utc::now);

    let body = message
        .body_text(0)
        .map(|b| b.to_string())
        .unwrap_or_default();

    Some(RawMessage {
        provider_id: format!("uid{}-{}", uid_validity, uid),
        subject,
        sender,
        recipients,
        date,
        body,
        labels: Vec::new(),
    })
}

fn format_addr(addr: &mail_parser::Addr) -> String {
    match (&addr.name, &addr.address) {
        (Some(name), Some(address)) => format!("{} <{}>", name, address),
        (None, Some(address)) => address.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_roundtrip() {
        let cursor = format_cursor(12345, 678);
        assert_eq!(parse_cursor(Some(&cursor), 12345), 678);
    }

    #[test]
    fn test_uid_validity_change_resets_cursor() {
        let cursor = format_cursor(12345, 678);
        assert_eq!(parse_cursor(Some(&cursor), 99999), 0);
    }

    #[test]
    fn test_missing_or_malformed_cursor_starts_fresh() {
        assert_eq!(parse_cursor(None, 1), 0);
        assert_eq!(parse_cursor(Some("garbage"), 1), 0);
        assert_eq!(parse_cursor(Some("1:notanumber"), 1), 0);
    }

    #[test]
    fn test_parse_rfc822_extracts_fields() {
        let raw = b"From: Sarah Jones <sarah@example.com>\r\n\
                    To: you@example.com\r\n\
                    Subject: Party invite\r\n\
                    Date: Mon, 12 Aug 2024 10:00:00 +0000\r\n\
                    \r\n\
                    You're invited to the party on Saturday!\r\n";

        let parser = MessageParser::default();
        let msg = parse_rfc822(&parser, 7, 42, raw).unwrap();
        assert_eq!(msg.provider_id, "uid7-42");
        assert_eq!(msg.subject, "Party invite");
        assert!(msg.sender.contains("sarah@example.com"));
        assert!(msg.body.contains("Saturday"));
    }
}
