//! The mail connector capability.
//!
//! A [`MailConnector`] adapts one external mail account — authenticate,
//! fetch new messages, disconnect. Provider-specific pagination, rate
//! limiting, and wire formats stay inside the implementation; the sync
//! orchestrator only sees [`RawMessage`]s and an opaque cursor.
//!
//! Implementations:
//! - [`ImapConnector`](crate::connector_imap::ImapConnector) — real
//!   mailboxes over IMAP/TLS, incremental by UIDVALIDITY/UID.
//! - [`DemoConnector`](crate::connector_demo::DemoConnector) — in-memory
//!   sample messages for demos and tests.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ConnectorKind, RawMessage};

/// Result of one fetch pass: the new messages plus the advanced cursor.
///
/// The cursor covers exactly the messages returned. On a mid-stream
/// provider failure the connector returns what it fetched with a cursor
/// positioned after the last good message, so the next sync resumes
/// without refetching or losing mail.
#[derive(Debug, Clone)]
pub struct FetchBatch {
    pub messages: Vec<RawMessage>,
    pub cursor: String,
}

/// Capability set for one external mail source.
#[async_trait]
pub trait MailConnector: Send + Sync {
    /// Provider variant, used for the connector listing.
    fn kind(&self) -> ConnectorKind;

    /// Establish and verify credentials. Idempotent: calling while already
    /// connected is a no-op success.
    async fn connect(&mut self) -> Result<()>;

    /// Fetch messages not yet covered by `cursor`, up to `limit`.
    ///
    /// Every returned [`RawMessage`] carries a `provider_id` stable across
    /// resyncs, from which the pipeline derives the document id.
    async fn fetch_new(
        &mut self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<FetchBatch>;

    /// Release any held session resources. Always succeeds.
    async fn disconnect(&mut self);
}
