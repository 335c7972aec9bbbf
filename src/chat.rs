//! Retrieval and grounded chat.
//!
//! The [`ChatEngine`] embeds the user's message, pulls the closest indexed
//! emails from the [`VectorIndex`], and composes an answer that cites
//! them. Answer text generation sits behind the [`AnswerComposer`] trait;
//! the default [`ExtractiveComposer`] builds answers directly from the
//! retrieved documents with no external model call.
//!
//! Chat always responds: when the embedding provider or the index fails
//! mid-request, the reply degrades to an apology with empty sources
//! instead of surfacing a 5xx. Only an empty message is rejected outright.

use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{EngineError, Result};
use crate::index::VectorIndex;
use crate::models::{ChatReply, EmailDocument, SourceAttribution, SourceMetadata};
use crate::pipeline::truncate_chars;

/// Turns retrieved documents into answer text.
pub trait AnswerComposer: Send + Sync {
    /// `hits` is non-empty and ordered by score descending.
    fn compose(&self, message: &str, hits: &[(EmailDocument, f32)]) -> String;
}

/// Default composer: quotes the best-matching emails verbatim.
pub struct ExtractiveComposer {
    max_quoted: usize,
    snippet_chars: usize,
}

impl ExtractiveComposer {
    pub fn new(snippet_chars: usize) -> Self {
        Self {
            max_quoted: 3,
            snippet_chars,
        }
    }
}

impl AnswerComposer for ExtractiveComposer {
    fn compose(&self, _message: &str, hits: &[(EmailDocument, f32)]) -> String {
        let mut answer = format!(
            "I found {} relevant email{} in your mailbox:\n",
            hits.len(),
            if hits.len() == 1 { "" } else { "s" }
        );
        for (doc, _score) in hits.iter().take(self.max_quoted) {
            let snippet = truncate_chars(doc.body.trim(), self.snippet_chars);
            answer.push_str(&format!(
                "\n- \"{}\" from {} ({}): {}",
                doc.subject,
                doc.sender,
                doc.timestamp.format("%Y-%m-%d"),
                snippet
            ));
        }
        answer
    }
}

pub struct ChatEngine {
    provider: Arc<dyn EmbeddingProvider>,
    index: VectorIndex,
    config: RetrievalConfig,
    composer: Box<dyn AnswerComposer>,
}

impl ChatEngine {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        index: VectorIndex,
        config: RetrievalConfig,
    ) -> Self {
        let composer = Box::new(ExtractiveComposer::new(config.max_snippet_chars));
        Self {
            provider,
            index,
            config,
            composer,
        }
    }

    pub fn with_composer(mut self, composer: Box<dyn AnswerComposer>) -> Self {
        self.composer = composer;
        self
    }

    /// Answer a chat message, grounded in indexed email.
    ///
    /// Fails only on an empty message; retrieval errors degrade the answer
    /// rather than failing the request.
    pub async fn chat(&self, message: &str) -> Result<ChatReply> {
        let message = message.trim();
        if message.is_empty() {
            return Err(EngineError::Invalid(
                "message must not be empty".to_string(),
            ));
        }

        let started = Instant::now();
        let reply = match self.retrieve(message).await {
            Ok(hits) if hits.is_empty() => ChatReply {
                response: "I couldn't find anything in your indexed email matching that. \
                           Try connecting a mail account and running a sync first, or \
                           rephrase your question."
                    .to_string(),
                sources: Vec::new(),
                processing_time: 0.0,
            },
            Ok(hits) => {
                let response = self.composer.compose(message, &hits);
                let sources = hits
                    .iter()
                    .map(|(doc, score)| self.attribution(doc, *score))
                    .collect();
                ChatReply {
                    response,
                    sources,
                    processing_time: 0.0,
                }
            }
            Err(e) => {
                warn!(error = %e, "retrieval failed, returning degraded answer");
                ChatReply {
                    response: "I'm having trouble searching your email right now. \
                               Please try again in a moment."
                        .to_string(),
                    sources: Vec::new(),
                    processing_time: 0.0,
                }
            }
        };

        Ok(ChatReply {
            processing_time: started.elapsed().as_secs_f64(),
            ..reply
        })
    }

    /// Raw semantic search over the index, without answer composition.
    pub async fn search(&self, query: &str) -> Result<Vec<SourceAttribution>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(EngineError::Invalid("query must not be empty".to_string()));
        }
        let hits = self.retrieve(query).await?;
        Ok(hits
            .iter()
            .map(|(doc, score)| self.attribution(doc, *score))
            .collect())
    }

    async fn retrieve(&self, text: &str) -> Result<Vec<(EmailDocument, f32)>> {
        let query = vec![text.to_string()];
        let mut vectors = self.provider.embed(&query).await?;
        if vectors.is_empty() {
            return Err(EngineError::Embedding(
                "provider returned no vector for the query".to_string(),
            ));
        }
        self.index
            .query(
                &vectors.remove(0),
                self.provider.model_name(),
                self.config.top_k,
                self.config.min_score,
            )
            .await
    }

    fn attribution(&self, doc: &EmailDocument, score: f32) -> SourceAttribution {
        SourceAttribution {
            metadata: SourceMetadata {
                subject: doc.subject.clone(),
                sender: doc.sender.clone(),
            },
            content: truncate_chars(&doc.body, self.config.max_snippet_chars).to_string(),
            score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{DisabledProvider, HashProvider};
    use crate::migrate;
    use crate::models::RawMessage;
    use crate::pipeline::EmbeddingPipeline;
    use chrono::Utc;
    use sqlx::SqlitePool;

    async fn seeded_engine() -> ChatEngine {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        let index = VectorIndex::new(pool);

        let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashProvider::new(128));
        let pipeline = EmbeddingPipeline::new(Arc::clone(&provider), 8, 2000);

        let messages = vec![
            RawMessage {
                provider_id: "m1".to_string(),
                subject: "Birthday party on Saturday".to_string(),
                sender: "alice@example.com".to_string(),
                recipients: vec![],
                date: Utc::now(),
                body: "You're invited to Emma's birthday party this Saturday at 2pm. \
                       Bring a present and your dancing shoes!"
                    .to_string(),
                labels: vec![],
            },
            RawMessage {
                provider_id: "m2".to_string(),
                subject: "Quarterly budget review".to_string(),
                sender: "finance@example.com".to_string(),
                recipients: vec![],
                date: Utc::now(),
                body: "The quarterly budget review meeting is scheduled for Monday. \
                       Please prepare your department spending reports."
                    .to_string(),
                labels: vec![],
            },
        ];
        let outcome = pipeline.embed_batch("c1", &messages).await.unwrap();
        for doc in &outcome.documents {
            index.upsert(doc, provider.model_name()).await.unwrap();
        }

        let config = RetrievalConfig {
            top_k: 5,
            min_score: 0.01,
            max_snippet_chars: 50,
        };
        ChatEngine::new(provider, index, config)
    }

    #[tokio::test]
    async fn test_chat_returns_grounded_sources() {
        let engine = seeded_engine().await;
        let reply = engine.chat("when is the birthday party?").await.unwrap();
        assert!(!reply.sources.is_empty());
        assert_eq!(reply.sources[0].metadata.subject, "Birthday party on Saturday");
        assert!(reply.response.contains("Birthday party"));
        assert!(reply.processing_time >= 0.0);
    }

    #[tokio::test]
    async fn test_chat_sources_score_descending() {
        let engine = seeded_engine().await;
        let reply = engine.chat("birthday party invitation").await.unwrap();
        for pair in reply.sources.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_chat_snippets_truncated() {
        let engine = seeded_engine().await;
        let reply = engine.chat("budget review meeting").await.unwrap();
        for source in &reply.sources {
            assert!(source.content.chars().count() <= 50);
        }
    }

    #[tokio::test]
    async fn test_chat_rejects_empty_message() {
        let engine = seeded_engine().await;
        let err = engine.chat("   ").await.unwrap_err();
        assert!(matches!(err, EngineError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_chat_no_grounding_gives_empty_sources() {
        let engine = seeded_engine().await;
        // High threshold leaves nothing above min_score.
        let engine = ChatEngine::new(
            Arc::clone(&engine.provider),
            engine.index.clone(),
            RetrievalConfig {
                top_k: 5,
                min_score: 0.99,
                max_snippet_chars: 50,
            },
        );
        let reply = engine.chat("something entirely unrelated").await.unwrap();
        assert!(reply.sources.is_empty());
        assert!(reply.response.contains("couldn't find"));
    }

    #[tokio::test]
    async fn test_chat_degrades_when_provider_fails() {
        let engine = seeded_engine().await;
        let engine = ChatEngine::new(
            Arc::new(DisabledProvider),
            engine.index.clone(),
            RetrievalConfig::default(),
        );
        let reply = engine.chat("anything").await.unwrap();
        assert!(reply.sources.is_empty());
        assert!(reply.response.contains("trouble"));
    }

    #[tokio::test]
    async fn test_search_returns_raw_hits() {
        let engine = seeded_engine().await;
        let hits = engine.search("budget review").await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].metadata.sender, "finance@example.com");
    }

    #[tokio::test]
    async fn test_search_propagates_provider_error() {
        let engine = seeded_engine().await;
        let engine = ChatEngine::new(
            Arc::new(DisabledProvider),
            engine.index.clone(),
            RetrievalConfig::default(),
        );
        let result = engine.search("anything").await;
        assert!(matches!(result, Err(EngineError::Embedding(_))));
    }
}
