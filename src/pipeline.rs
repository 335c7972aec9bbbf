//! Embedding pipeline: raw messages in, indexed-ready documents out.
//!
//! Converts [`RawMessage`]s into [`EmailDocument`]s with stable ids and
//! embeddings. Deterministic given identical input and model version:
//! bodies are truncated at a fixed char budget (on a char boundary) before
//! embedding, and the document id is a SHA-256 over the connector id and
//! the provider-native message id, so a resync of the same message always
//! produces the same id and vector.
//!
//! A failure on one item never aborts the batch: if a whole-batch embed
//! call fails, items are retried one at a time and individual failures are
//! logged, counted, and left for the next sync (the cursor only advances
//! past fully fetched messages).

use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::warn;

use crate::embedding::EmbeddingProvider;
use crate::error::{EngineError, Result};
use crate::models::{EmailDocument, RawMessage};

/// Outcome of embedding one batch of messages.
pub struct BatchOutcome {
    pub documents: Vec<EmailDocument>,
    /// Items that failed to embed and were skipped.
    pub failed: u64,
}

pub struct EmbeddingPipeline {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    body_char_budget: usize,
}

impl EmbeddingPipeline {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
        body_char_budget: usize,
    ) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            body_char_budget,
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Embed a slice of messages for one connector.
    ///
    /// Returns `Err` only when nothing at all could be embedded (e.g. the
    /// provider is disabled or entirely unreachable); partial failures are
    /// reported through [`BatchOutcome::failed`].
    pub async fn embed_batch(
        &self,
        connector_id: &str,
        messages: &[RawMessage],
    ) -> Result<BatchOutcome> {
        let mut documents = Vec::with_capacity(messages.len());
        let mut failed = 0u64;
        let mut batch_error: Option<EngineError> = None;

        for chunk in messages.chunks(self.batch_size) {
            let texts: Vec<String> = chunk
                .iter()
                .map(|m| self.embedding_text(m))
                .collect();

            match self.provider.embed(&texts).await {
                Ok(vectors) if vectors.len() == chunk.len() => {
                    for (message, vector) in chunk.iter().zip(vectors) {
                        documents.push(self.to_document(connector_id, message, vector));
                    }
                }
                Ok(_) => {
                    warn!(
                        connector_id,
                        "embedding batch returned wrong cardinality, retrying per item"
                    );
                    self.embed_singly(connector_id, chunk, &mut documents, &mut failed)
                        .await;
                }
                Err(e) => {
                    warn!(connector_id, error = %e, "embedding batch failed, retrying per item");
                    batch_error = Some(e);
                    self.embed_singly(connector_id, chunk, &mut documents, &mut failed)
                        .await;
                }
            }
        }

        if documents.is_empty() && failed > 0 {
            // Nothing embeddable at all: surface the underlying cause.
            return Err(batch_error.unwrap_or_else(|| {
                EngineError::Embedding("every item in the batch failed to embed".to_string())
            }));
        }

        Ok(BatchOutcome { documents, failed })
    }

    async fn embed_singly(
        &self,
        connector_id: &str,
        chunk: &[RawMessage],
        documents: &mut Vec<EmailDocument>,
        failed: &mut u64,
    ) {
        for message in chunk {
            let text = vec![self.embedding_text(message)];
            match self.provider.embed(&text).await {
                Ok(mut vectors) if !vectors.is_empty() => {
                    documents.push(self.to_document(connector_id, message, vectors.remove(0)));
                }
                Ok(_) | Err(_) => {
                    warn!(
                        connector_id,
                        provider_id = %message.provider_id,
                        "skipping message that failed to embed"
                    );
                    *failed += 1;
                }
            }
        }
    }

    /// The text actually embedded: subject and sender are folded in so
    /// "who/what" queries land even when the body is terse.
    fn embedding_text(&self, message: &RawMessage) -> String {
        format!(
            "Subject: {}\n\nFrom: {}\n\nContent: {}",
            message.subject,
            message.sender,
            truncate_chars(&message.body, self.body_char_budget)
        )
    }

    fn to_document(
        &self,
        connector_id: &str,
        message: &RawMessage,
        embedding: Vec<f32>,
    ) -> EmailDocument {
        EmailDocument {
            id: document_id(connector_id, &message.provider_id),
            connector_id: connector_id.to_string(),
            subject: message.subject.clone(),
            sender: message.sender.clone(),
            timestamp: message.date,
            body: truncate_chars(&message.body, self.body_char_budget).to_string(),
            embedding,
        }
    }
}

/// Stable document id: identical across resyncs of the same message.
pub fn document_id(connector_id: &str, provider_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(connector_id.as_bytes());
    hasher.update(b"\x00");
    hasher.update(provider_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Truncate to at most `budget` chars on a char boundary.
pub fn truncate_chars(text: &str, budget: usize) -> &str {
    match text.char_indices().nth(budget) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashProvider;
    use async_trait::async_trait;
    use chrono::Utc;

    /// Provider that refuses any text containing a marker string.
    struct RejectingProvider {
        inner: HashProvider,
        marker: &'static str,
    }

    #[async_trait]
    impl EmbeddingProvider for RejectingProvider {
        fn model_name(&self) -> &str {
            "rejecting-v1"
        }

        fn dims(&self) -> usize {
            self.inner.dims()
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.iter().any(|t| t.contains(self.marker)) {
                return Err(EngineError::Embedding("marked text rejected".to_string()));
            }
            self.inner.embed(texts).await
        }
    }

    fn message(provider_id: &str, body: &str) -> RawMessage {
        RawMessage {
            provider_id: provider_id.to_string(),
            subject: "Subject".to_string(),
            sender: "sender@example.com".to_string(),
            recipients: vec!["you@example.com".to_string()],
            date: Utc::now(),
            body: body.to_string(),
            labels: vec![],
        }
    }

    fn pipeline() -> EmbeddingPipeline {
        EmbeddingPipeline::new(Arc::new(HashProvider::new(64)), 2, 100)
    }

    #[test]
    fn test_document_id_stable_and_scoped() {
        let a = document_id("conn1", "msg1");
        let b = document_id("conn1", "msg1");
        let c = document_id("conn2", "msg1");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        // Multi-byte chars must not be split mid-sequence.
        assert_eq!(truncate_chars("héllo wörld", 4), "héll");
    }

    #[tokio::test]
    async fn test_embed_batch_produces_one_document_per_message() {
        let p = pipeline();
        let messages = vec![
            message("m1", "first body"),
            message("m2", "second body"),
            message("m3", "third body"),
        ];
        let outcome = p.embed_batch("conn1", &messages).await.unwrap();
        assert_eq!(outcome.documents.len(), 3);
        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.documents[0].id, document_id("conn1", "m1"));
    }

    #[tokio::test]
    async fn test_embed_batch_deterministic_across_runs() {
        let p = pipeline();
        let messages = vec![message("m1", "the same body text every time")];
        let a = p.embed_batch("conn1", &messages).await.unwrap();
        let b = p.embed_batch("conn1", &messages).await.unwrap();
        assert_eq!(a.documents[0].id, b.documents[0].id);
        assert_eq!(a.documents[0].embedding, b.documents[0].embedding);
    }

    #[tokio::test]
    async fn test_oversized_body_truncated_consistently() {
        let p = pipeline();
        let long_body = "word ".repeat(1000);
        let messages = vec![message("m1", &long_body)];
        let a = p.embed_batch("conn1", &messages).await.unwrap();
        let b = p.embed_batch("conn1", &messages).await.unwrap();
        assert_eq!(a.documents[0].body.chars().count(), 100);
        assert_eq!(a.documents[0].embedding, b.documents[0].embedding);
    }

    #[tokio::test]
    async fn test_failed_item_skipped_without_aborting_batch() {
        let provider = Arc::new(RejectingProvider {
            inner: HashProvider::new(64),
            marker: "corrupt",
        });
        let p = EmbeddingPipeline::new(provider, 8, 100);
        let messages = vec![
            message("m1", "a perfectly ordinary body"),
            message("m2", "this body is corrupt beyond repair"),
            message("m3", "another ordinary body"),
        ];

        let outcome = p.embed_batch("conn1", &messages).await.unwrap();
        assert_eq!(outcome.documents.len(), 2);
        assert_eq!(outcome.failed, 1);
        assert!(!outcome
            .documents
            .iter()
            .any(|d| d.id == document_id("conn1", "m2")));
    }

    #[tokio::test]
    async fn test_disabled_provider_fails_whole_batch() {
        let p = EmbeddingPipeline::new(Arc::new(crate::embedding::DisabledProvider), 2, 100);
        let messages = vec![message("m1", "body")];
        let result = p.embed_batch("conn1", &messages).await;
        assert!(matches!(result, Err(EngineError::Embedding(_))));
    }
}
