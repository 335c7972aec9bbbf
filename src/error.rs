//! Engine error taxonomy.
//!
//! Every fallible engine operation returns [`EngineError`]. The HTTP layer
//! maps each variant to a status code and a `{"detail": ...}` body; sync
//! failures are additionally captured into the connector's `error_message`
//! rather than raised to the caller of `sync`, which has already returned.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad or unverifiable credentials. Drives the connector to `error`.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Transient network/provider failure while fetching messages.
    /// Retried on the next sync attempt via the cursor, never inline.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Embedding computation failed. Per-item failures inside a batch are
    /// logged and skipped; this variant surfaces only when the whole
    /// operation (e.g. embedding a chat query) cannot proceed.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The vector index is unreachable. Distinct from "no results".
    #[error("vector index unavailable: {0}")]
    Index(#[from] sqlx::Error),

    /// Sync requested while a session is already active. Rejected, not queued.
    #[error("{0}")]
    Conflict(String),

    /// Unknown connector id.
    #[error("{0}")]
    NotFound(String),

    /// Validation failure or an operation invalid in the current state.
    #[error("{0}")]
    Invalid(String),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
