//! In-memory demo connector with sample messages.
//!
//! Serves a small fixed mailbox so the whole pipeline — connect, sync,
//! embed, index, chat — can be exercised without real credentials. The
//! cursor is a plain offset into the sample list, which also makes the
//! incremental-fetch contract easy to verify in tests.
//!
//! The reserved password `"invalid"` fails authentication, so the
//! auth-failure path (`connecting → error`) stays reachable in demos
//! and tests.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::info;

use crate::connector::{FetchBatch, MailConnector};
use crate::error::{EngineError, Result};
use crate::models::{ConnectorKind, MailboxConfig, RawMessage};

/// Password that makes [`DemoConnector::connect`] fail with an auth error.
pub const DEMO_BAD_PASSWORD: &str = "invalid";

pub struct DemoConnector {
    config: MailboxConfig,
    connected: bool,
}

impl DemoConnector {
    pub fn new(config: MailboxConfig) -> Self {
        Self {
            config,
            connected: false,
        }
    }

    fn sample_messages(&self) -> Vec<RawMessage> {
        let now = Utc::now();
        let recipient = self.config.username.clone();
        vec![
            RawMessage {
                provider_id: "demo-0001".to_string(),
                subject: "Emma's Birthday Party Invitation".to_string(),
                sender: "sarah.jones@gmail.com".to_string(),
                recipients: vec![recipient.clone()],
                date: now - Duration::days(2),
                body: "Hi! You're invited to Emma's 8th birthday party this Saturday at 2pm \
                       at Riverside Park. Please bring a gift - she loves unicorns! Let me \
                       know if you can make it. Sarah"
                    .to_string(),
                labels: vec!["Important".to_string()],
            },
            RawMessage {
                provider_id: "demo-0002".to_string(),
                subject: "Football Practice - This Weekend".to_string(),
                sender: "coach.mike@sportsclub.com".to_string(),
                recipients: vec![recipient.clone()],
                date: now - Duration::days(1),
                body: "Reminder: Football practice is this Sunday at 10am at the sports \
                       center. Please bring football boots, water bottle, and team kit. \
                       We'll have warm-ups starting at 9:45am. Coach Mike"
                    .to_string(),
                labels: vec!["Sports".to_string()],
            },
            RawMessage {
                provider_id: "demo-0003".to_string(),
                subject: "School Newsletter - Summer Term".to_string(),
                sender: "office@hillsideprimary.sch.uk".to_string(),
                recipients: vec![recipient],
                date: now - Duration::hours(6),
                body: "Dear parents, the summer fair takes place on Friday 20th June from \
                       3:30pm on the school field. Volunteers for the cake stall are still \
                       needed - please reply to this email if you can help."
                    .to_string(),
                labels: vec![],
            },
        ]
    }
}

#[async_trait]
impl MailConnector for DemoConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Demo
    }

    async fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Ok(());
        }
        if self.config.username.trim().is_empty() {
            return Err(EngineError::Auth("username must not be empty".to_string()));
        }
        if self.config.password == DEMO_BAD_PASSWORD {
            return Err(EngineError::Auth(format!(
                "login rejected for {}",
                self.config.username
            )));
        }
        // Simulated handshake latency keeps status transitions observable.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        self.connected = true;
        info!(username = %self.config.username, "demo connector connected");
        Ok(())
    }

    async fn fetch_new(
        &mut self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<FetchBatch> {
        if !self.connected {
            return Err(EngineError::Fetch("not connected".to_string()));
        }

        let offset: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let all = self.sample_messages();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let messages: Vec<RawMessage> = all.into_iter().skip(offset).take(limit).collect();
        let cursor = (offset + messages.len()).to_string();

        Ok(FetchBatch { messages, cursor })
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_config(password: &str) -> MailboxConfig {
        MailboxConfig {
            username: "a@b.com".to_string(),
            password: password.to_string(),
            host: None,
            port: None,
            mailbox: None,
        }
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let mut c = DemoConnector::new(demo_config("ok"));
        c.connect().await.unwrap();
        c.connect().await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_password_is_auth_error() {
        let mut c = DemoConnector::new(demo_config(DEMO_BAD_PASSWORD));
        let err = c.connect().await.unwrap_err();
        assert!(matches!(err, EngineError::Auth(_)));
    }

    #[tokio::test]
    async fn test_fetch_requires_connection() {
        let mut c = DemoConnector::new(demo_config("ok"));
        let err = c.fetch_new(None, 10).await.unwrap_err();
        assert!(matches!(err, EngineError::Fetch(_)));
    }

    #[tokio::test]
    async fn test_cursor_advances_past_fetched_messages() {
        let mut c = DemoConnector::new(demo_config("ok"));
        c.connect().await.unwrap();

        let first = c.fetch_new(None, 100).await.unwrap();
        assert_eq!(first.messages.len(), 3);
        assert_eq!(first.cursor, "3");

        let second = c.fetch_new(Some(&first.cursor), 100).await.unwrap();
        assert!(second.messages.is_empty());
        assert_eq!(second.cursor, "3");
    }

    #[tokio::test]
    async fn test_limit_paginates() {
        let mut c = DemoConnector::new(demo_config("ok"));
        c.connect().await.unwrap();

        let first = c.fetch_new(None, 2).await.unwrap();
        assert_eq!(first.messages.len(), 2);

        let rest = c.fetch_new(Some(&first.cursor), 2).await.unwrap();
        assert_eq!(rest.messages.len(), 1);
        assert_eq!(rest.messages[0].provider_id, "demo-0003");
    }
}
