//! Connector registry and sync orchestrator.
//!
//! The [`ConnectorRegistry`] owns every connector and is the only place
//! that mutates connector state. It drives the lifecycle state machine
//!
//! ```text
//! disconnected → connecting → connected → syncing → connected
//!                    │                        │
//!                    └────────→ error ←───────┘
//!                                 │
//!                                 └──→ connecting (retry)
//! ```
//!
//! and runs each sync as a spawned tokio task: pull messages from the
//! connector, embed them through the [`EmbeddingPipeline`], upsert into
//! the [`VectorIndex`], and publish progress snapshots for polling
//! readers.
//!
//! Invariants enforced here:
//! - at most one sync session per connector, guaranteed by a
//!   check-and-set on the `connected → syncing` transition under the
//!   registry write lock;
//! - session progress is monotonically non-decreasing and reaches exactly
//!   100 only on successful completion;
//! - snapshot reads only ever observe committed state (every update
//!   happens under the write lock, never field-by-field);
//! - deleting a connector cancels an in-flight sync cooperatively, awaits
//!   the task, then cascades document deletion — no orphans.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::connector::MailConnector;
use crate::connector_demo::DemoConnector;
use crate::connector_imap::ImapConnector;
use crate::error::{EngineError, Result};
use crate::index::VectorIndex;
use crate::models::{
    ConnectorInfo, ConnectorKind, ConnectorStatus, CreateConnector, SyncSnapshot,
};
use crate::pipeline::EmbeddingPipeline;

/// Messages embedded+indexed between progress updates and cancel checks.
const SYNC_STRIDE: usize = 10;

type SharedConnector = Arc<Mutex<Box<dyn MailConnector>>>;

struct ConnectorEntry {
    kind: ConnectorKind,
    name: String,
    status: ConnectorStatus,
    message_count: u64,
    error_message: Option<String>,
    cursor: Option<String>,
    connector: SharedConnector,
    session: SyncSnapshot,
    cancel: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl ConnectorEntry {
    fn info(&self, id: &str) -> ConnectorInfo {
        ConnectorInfo {
            id: id.to_string(),
            kind: self.kind,
            name: self.name.clone(),
            status: self.status,
            last_sync: self.session.last_sync,
            message_count: self.message_count,
            error_message: self.error_message.clone(),
        }
    }
}

pub struct ConnectorRegistry {
    entries: RwLock<HashMap<String, ConnectorEntry>>,
    index: VectorIndex,
    pipeline: EmbeddingPipeline,
    fetch_limit: usize,
}

impl ConnectorRegistry {
    pub fn new(index: VectorIndex, pipeline: EmbeddingPipeline, fetch_limit: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            index,
            pipeline,
            fetch_limit: fetch_limit.max(1),
        }
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Register a new connector. Starts in `disconnected`.
    pub fn create(&self, req: CreateConnector) -> Result<ConnectorInfo> {
        if req.name.trim().is_empty() {
            return Err(EngineError::Invalid("name must not be empty".to_string()));
        }
        if req.config.username.trim().is_empty() {
            return Err(EngineError::Invalid(
                "config.username must not be empty".to_string(),
            ));
        }
        if req.kind == ConnectorKind::Imap && req.config.host.is_none() {
            return Err(EngineError::Invalid(
                "config.host is required for imap connectors".to_string(),
            ));
        }

        let connector: Box<dyn MailConnector> = match req.kind {
            ConnectorKind::Imap => Box::new(ImapConnector::new(req.config.clone())),
            ConnectorKind::Demo => Box::new(DemoConnector::new(req.config.clone())),
        };

        let id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let entry = ConnectorEntry {
            kind: req.kind,
            name: req.name,
            status: ConnectorStatus::Disconnected,
            message_count: 0,
            error_message: None,
            cursor: None,
            connector: Arc::new(Mutex::new(connector)),
            session: SyncSnapshot::default(),
            cancel: Arc::new(AtomicBool::new(false)),
            task: None,
        };

        let info = entry.info(&id);
        self.entries.write().insert(id.clone(), entry);
        info!(connector_id = %id, kind = info.kind.as_str(), "created connector");
        Ok(info)
    }

    /// List all connectors, name then id order for stable output.
    pub fn list(&self) -> Vec<ConnectorInfo> {
        let entries = self.entries.read();
        let mut infos: Vec<ConnectorInfo> = entries.iter().map(|(id, e)| e.info(id)).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        infos
    }

    pub fn get(&self, id: &str) -> Result<ConnectorInfo> {
        let entries = self.entries.read();
        entries
            .get(id)
            .map(|e| e.info(id))
            .ok_or_else(|| EngineError::NotFound(format!("connector not found: {}", id)))
    }

    /// Latest committed sync session snapshot.
    pub fn sync_status(&self, id: &str) -> Result<SyncSnapshot> {
        let entries = self.entries.read();
        entries
            .get(id)
            .map(|e| e.session.clone())
            .ok_or_else(|| EngineError::NotFound(format!("connector not found: {}", id)))
    }

    /// `(total, connected)` counts for the stats aggregator.
    pub fn connector_counts(&self) -> (u64, u64) {
        let entries = self.entries.read();
        let total = entries.len() as u64;
        let connected = entries
            .values()
            .filter(|e| e.status == ConnectorStatus::Connected)
            .count() as u64;
        (total, connected)
    }

    /// Establish the connector's session. Valid from `disconnected` or
    /// `error` (retry); a no-op success when already `connected`.
    pub async fn connect(&self, id: &str) -> Result<ConnectorInfo> {
        let connector = {
            let mut entries = self.entries.write();
            let entry = entries
                .get_mut(id)
                .ok_or_else(|| EngineError::NotFound(format!("connector not found: {}", id)))?;

            match entry.status {
                ConnectorStatus::Connected => return Ok(entry.info(id)),
                ConnectorStatus::Connecting | ConnectorStatus::Syncing => {
                    return Err(EngineError::Conflict(
                        "connector is busy; try again later".to_string(),
                    ));
                }
                ConnectorStatus::Disconnected | ConnectorStatus::Error => {}
            }

            entry.status = ConnectorStatus::Connecting;
            entry.error_message = None;
            entry.session.status_message = "Connecting...".to_string();
            Arc::clone(&entry.connector)
        };

        let result = connector.lock().await.connect().await;

        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(format!("connector not found: {}", id)))?;

        match result {
            Ok(()) => {
                entry.status = ConnectorStatus::Connected;
                entry.session.status_message = "Connected".to_string();
                info!(connector_id = %id, "connector connected");
                Ok(entry.info(id))
            }
            Err(e) => {
                entry.status = ConnectorStatus::Error;
                entry.error_message = Some(e.to_string());
                entry.session.status_message = format!("Connection failed: {}", e);
                warn!(connector_id = %id, error = %e, "connector failed to connect");
                Err(e)
            }
        }
    }

    /// Start a sync task for the connector and return immediately.
    ///
    /// The `connected → syncing` transition, the session creation, and the
    /// task spawn are a single critical section under the write lock, so
    /// two racing sync requests can never both start a session, and a
    /// racing `delete` always finds the task handle to await (`tokio::spawn`
    /// never blocks, so spawning under the guard is fine).
    pub fn spawn_sync(self: Arc<Self>, id: &str) -> Result<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(format!("connector not found: {}", id)))?;

        if entry.session.is_syncing {
            return Err(EngineError::Conflict(
                "sync already in progress".to_string(),
            ));
        }
        if entry.status != ConnectorStatus::Connected {
            return Err(EngineError::Invalid(
                "connector is not connected".to_string(),
            ));
        }

        entry.status = ConnectorStatus::Syncing;
        entry.cancel = Arc::new(AtomicBool::new(false));
        entry.session = SyncSnapshot {
            is_syncing: true,
            progress: 0,
            status_message: "Starting sync...".to_string(),
            messages_processed: 0,
            total_messages: 0,
            last_sync: entry.session.last_sync,
            sync_duration: 0.0,
        };

        let connector = Arc::clone(&entry.connector);
        let cancel = Arc::clone(&entry.cancel);
        let cursor = entry.cursor.clone();
        let registry = Arc::clone(&self);
        let task_id = id.to_string();
        entry.task = Some(tokio::spawn(async move {
            registry.run_sync(task_id, connector, cancel, cursor).await;
        }));

        Ok(())
    }

    /// Remove a connector: cancel any in-flight sync cooperatively, await
    /// the task, disconnect, drop the record, and cascade index deletion.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let (connector, task) = {
            let mut entries = self.entries.write();
            let entry = entries
                .get_mut(id)
                .ok_or_else(|| EngineError::NotFound(format!("connector not found: {}", id)))?;

            entry.cancel.store(true, Ordering::SeqCst);
            (Arc::clone(&entry.connector), entry.task.take())
        };

        // Cooperative: wait for the sync task to acknowledge the flag and
        // settle the index before the connector record disappears.
        if let Some(task) = task {
            let _ = task.await;
        }

        connector.lock().await.disconnect().await;
        self.entries.write().remove(id);

        let deleted = self.index.delete_by_connector(id).await?;
        info!(connector_id = %id, documents_deleted = deleted, "connector deleted");
        Ok(())
    }

    // ============ Sync task ============

    async fn run_sync(
        &self,
        id: String,
        connector: SharedConnector,
        cancel: Arc<AtomicBool>,
        cursor: Option<String>,
    ) {
        let started = Instant::now();
        let outcome = self.sync_inner(&id, &connector, &cancel, cursor).await;
        let duration = started.elapsed().as_secs_f64();

        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(&id) else {
            // Deleted out from under us; the delete path already awaited.
            return;
        };

        entry.session.is_syncing = false;
        entry.session.sync_duration = duration;

        match outcome {
            Ok(SyncOutcome::Cancelled) => {
                entry.status = ConnectorStatus::Connected;
                entry.session.status_message = "Sync cancelled".to_string();
                info!(connector_id = %id, "sync cancelled");
            }
            Ok(SyncOutcome::Done { processed, failed }) => {
                entry.status = ConnectorStatus::Connected;
                entry.message_count += processed;
                entry.session.progress = 100;
                entry.session.messages_processed = processed;
                entry.session.last_sync = Some(Utc::now());
                entry.session.status_message = if processed == 0 && failed == 0 {
                    "Sync complete - no new messages found".to_string()
                } else if failed == 0 {
                    format!("Sync complete! Indexed {} new emails.", processed)
                } else {
                    format!(
                        "Sync complete! Indexed {} new emails, {} skipped (will retry).",
                        processed, failed
                    )
                };
                info!(connector_id = %id, processed, failed, duration, "sync complete");
            }
            Err(e) => {
                // Documents already upserted stay; the cursor was committed
                // as far as the fetch got, so the next sync resumes there.
                entry.status = ConnectorStatus::Error;
                entry.error_message = Some(e.to_string());
                entry.session.status_message = format!("Sync failed: {}", e);
                error!(connector_id = %id, error = %e, "sync failed");
            }
        }
    }

    async fn sync_inner(
        &self,
        id: &str,
        connector: &SharedConnector,
        cancel: &AtomicBool,
        cursor: Option<String>,
    ) -> Result<SyncOutcome> {
        self.advance_session(id, 5, "Preparing sync...".to_string());

        if cancel.load(Ordering::SeqCst) {
            return Ok(SyncOutcome::Cancelled);
        }

        self.advance_session(id, 10, "Fetching new messages...".to_string());
        let batch = connector
            .lock()
            .await
            .fetch_new(cursor.as_deref(), self.fetch_limit)
            .await?;

        // Commit the cursor before embedding: the messages are in hand, and
        // a later failure must not refetch them forever.
        if let Some(entry) = self.entries.write().get_mut(id) {
            entry.cursor = Some(batch.cursor.clone());
            entry.session.total_messages = batch.messages.len() as u64;
        }

        let total = batch.messages.len();
        if total == 0 {
            return Ok(SyncOutcome::Done {
                processed: 0,
                failed: 0,
            });
        }

        let model = self.pipeline.provider().model_name().to_string();
        let mut processed = 0u64;
        let mut failed = 0u64;
        let mut attempted = 0usize;

        for chunk in batch.messages.chunks(SYNC_STRIDE) {
            if cancel.load(Ordering::SeqCst) {
                return Ok(SyncOutcome::Cancelled);
            }

            let outcome = self.pipeline.embed_batch(id, chunk).await?;
            for doc in &outcome.documents {
                self.index.upsert(doc, &model).await?;
            }

            processed += outcome.documents.len() as u64;
            failed += outcome.failed;
            attempted += chunk.len();

            // 10..=95 by attempted count; 100 is reserved for completion.
            let progress = 10 + (attempted * 85 / total) as u8;
            self.advance_session(
                id,
                progress,
                format!("Embedding and indexing {} of {} messages...", attempted, total),
            );
            if let Some(entry) = self.entries.write().get_mut(id) {
                entry.session.messages_processed = processed;
            }
        }

        Ok(SyncOutcome::Done { processed, failed })
    }

    /// Advance the session, never letting progress move backwards.
    fn advance_session(&self, id: &str, progress: u8, message: String) {
        if let Some(entry) = self.entries.write().get_mut(id) {
            entry.session.progress = entry.session.progress.max(progress);
            entry.session.status_message = message;
        }
    }
}

enum SyncOutcome {
    Done { processed: u64, failed: u64 },
    Cancelled,
}
