//! Core data models used throughout mailseek.
//!
//! These types represent the connectors, raw mail, indexed documents, and
//! chat exchanges that flow through the sync and retrieval pipeline. All
//! wire shapes (everything the HTTP layer serializes) live here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider variant backing a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorKind {
    /// Real mailbox over IMAP (TLS).
    Imap,
    /// In-memory demo provider with sample messages.
    Demo,
}

impl ConnectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorKind::Imap => "imap",
            ConnectorKind::Demo => "demo",
        }
    }
}

/// Lifecycle state of a connector.
///
/// Transitions are owned by the registry: `disconnected → connecting →
/// connected → syncing → connected`, with `error` reachable from
/// `connecting` or `syncing` and `error → connecting` on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorStatus {
    Disconnected,
    Connecting,
    Connected,
    Syncing,
    Error,
}

/// Credential/connection bundle for one mail account.
///
/// The password is redacted from `Debug` and never serialized back out;
/// connector listings return [`ConnectorInfo`], which carries no config.
#[derive(Clone, Deserialize)]
pub struct MailboxConfig {
    pub username: String,
    pub password: String,
    /// IMAP server host. Required for `imap` connectors, ignored by `demo`.
    #[serde(default)]
    pub host: Option<String>,
    /// IMAP port, defaults to 993 (SSL).
    #[serde(default)]
    pub port: Option<u16>,
    /// Mailbox to sync, defaults to INBOX.
    #[serde(default)]
    pub mailbox: Option<String>,
}

impl std::fmt::Debug for MailboxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("mailbox", &self.mailbox)
            .finish()
    }
}

/// Request body for `POST /connectors/`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateConnector {
    #[serde(rename = "type")]
    pub kind: ConnectorKind,
    pub name: String,
    pub config: MailboxConfig,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Public view of a connector, as returned by `GET /connectors/`.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ConnectorKind,
    pub name: String,
    pub status: ConnectorStatus,
    pub last_sync: Option<DateTime<Utc>>,
    pub message_count: u64,
    pub error_message: Option<String>,
}

/// A message as fetched from a provider, before embedding.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Provider-native message id; combined with the connector id it
    /// yields the stable document id.
    pub provider_id: String,
    pub subject: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub date: DateTime<Utc>,
    pub body: String,
    pub labels: Vec<String>,
}

/// An embedded, indexed email. Never mutated after creation; a resync
/// overwrites by identical id.
#[derive(Debug, Clone)]
pub struct EmailDocument {
    pub id: String,
    pub connector_id: String,
    pub subject: String,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
    pub body: String,
    pub embedding: Vec<f32>,
}

/// Snapshot of a connector's sync session, as returned by
/// `GET /connectors/{id}/sync-status`.
///
/// `progress` is monotonically non-decreasing within a session and reaches
/// exactly 100 only on successful completion.
#[derive(Debug, Clone, Serialize)]
pub struct SyncSnapshot {
    pub is_syncing: bool,
    pub progress: u8,
    pub status_message: String,
    pub messages_processed: u64,
    pub total_messages: u64,
    pub last_sync: Option<DateTime<Utc>>,
    /// Wall-clock duration of the last completed sync, in seconds.
    pub sync_duration: f64,
}

impl Default for SyncSnapshot {
    fn default() -> Self {
        Self {
            is_syncing: false,
            progress: 0,
            status_message: "Ready".to_string(),
            messages_processed: 0,
            total_messages: 0,
            last_sync: None,
            sync_duration: 0.0,
        }
    }
}

/// Request body for `POST /chat/`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// Document metadata attached to a chat source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceMetadata {
    pub subject: String,
    pub sender: String,
}

/// One retrieved document backing a chat answer.
#[derive(Debug, Clone, Serialize)]
pub struct SourceAttribution {
    pub metadata: SourceMetadata,
    /// Content snippet, truncated for display.
    pub content: String,
    pub score: f32,
}

/// Response body for `POST /chat/`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub response: String,
    /// Retrieved sources, similarity score descending.
    pub sources: Vec<SourceAttribution>,
    pub processing_time: f64,
}
