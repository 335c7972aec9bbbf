//! SQLite-backed vector index.
//!
//! Stores [`EmailDocument`]s with their embeddings as little-endian f32
//! BLOBs and answers nearest-neighbor queries by brute-force cosine scan
//! (fine at mailbox scale). Upserts are keyed by document id so a resync
//! replaces rather than duplicates. Every row records the embedding model
//! that produced its vector; queries against a different model are
//! rejected instead of silently returning garbage similarities.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{EngineError, Result};
use crate::models::EmailDocument;

#[derive(Clone)]
pub struct VectorIndex {
    pool: SqlitePool,
}

impl VectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or overwrite a document, keyed by id.
    pub async fn upsert(&self, doc: &EmailDocument, model: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO email_documents
                (id, connector_id, subject, sender, timestamp, body, embedding, model)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                connector_id = excluded.connector_id,
                subject = excluded.subject,
                sender = excluded.sender,
                timestamp = excluded.timestamp,
                body = excluded.body,
                embedding = excluded.embedding,
                model = excluded.model
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.connector_id)
        .bind(&doc.subject)
        .bind(&doc.sender)
        .bind(doc.timestamp.timestamp())
        .bind(&doc.body)
        .bind(vec_to_blob(&doc.embedding))
        .bind(model)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Nearest-neighbor query: at most `top_k` documents with cosine score
    /// >= `min_score`, ordered score descending, ties broken by most
    /// recent timestamp.
    pub async fn query(
        &self,
        vector: &[f32],
        model: &str,
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<(EmailDocument, f32)>> {
        let foreign: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM email_documents WHERE model != ?")
            .bind(model)
            .fetch_one(&self.pool)
            .await?;
        if foreign > 0 {
            return Err(EngineError::Embedding(format!(
                "index contains {} documents embedded with a different model; \
                 re-sync before querying with '{}'",
                foreign, model
            )));
        }

        let rows = sqlx::query(
            "SELECT id, connector_id, subject, sender, timestamp, body, embedding \
             FROM email_documents WHERE model = ?",
        )
        .bind(model)
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<(EmailDocument, f32)> = Vec::new();

        for row in rows {
            let embedding = blob_to_vec(row.get::<Vec<u8>, _>("embedding").as_slice());
            let score = cosine_similarity(vector, &embedding);
            if score < min_score {
                continue;
            }

            let ts: i64 = row.get("timestamp");
            scored.push((
                EmailDocument {
                    id: row.get("id"),
                    connector_id: row.get("connector_id"),
                    subject: row.get("subject"),
                    sender: row.get("sender"),
                    timestamp: DateTime::<Utc>::from_timestamp(ts, 0).unwrap_or_else(Utc::now),
                    body: row.get("body"),
                    embedding,
                },
                score,
            ));
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.0.timestamp.cmp(&a.0.timestamp))
                .then(a.0.id.cmp(&b.0.id))
        });
        scored.truncate(top_k);

        Ok(scored)
    }

    /// Remove every document owned by a connector. Returns rows deleted.
    pub async fn delete_by_connector(&self, connector_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM email_documents WHERE connector_id = ?")
            .bind(connector_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM email_documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    pub async fn count_by_connector(&self, connector_id: &str) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM email_documents WHERE connector_id = ?")
                .bind(connector_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use chrono::TimeZone;

    async fn test_index() -> VectorIndex {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        VectorIndex::new(pool)
    }

    fn doc(id: &str, connector_id: &str, ts: i64, embedding: Vec<f32>) -> EmailDocument {
        EmailDocument {
            id: id.to_string(),
            connector_id: connector_id.to_string(),
            subject: format!("subject {}", id),
            sender: "sender@example.com".to_string(),
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
            body: "body".to_string(),
            embedding,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_not_duplicates() {
        let index = test_index().await;
        let d = doc("d1", "c1", 1000, vec![1.0, 0.0]);
        index.upsert(&d, "m").await.unwrap();
        index.upsert(&d, "m").await.unwrap();
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_query_orders_by_score_desc() {
        let index = test_index().await;
        index
            .upsert(&doc("far", "c1", 1000, vec![0.1, 1.0]), "m")
            .await
            .unwrap();
        index
            .upsert(&doc("near", "c1", 1000, vec![1.0, 0.05]), "m")
            .await
            .unwrap();

        let hits = index.query(&[1.0, 0.0], "m", 10, 0.0).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.id, "near");
        assert!(hits[0].1 > hits[1].1);
    }

    #[tokio::test]
    async fn test_query_min_score_filters() {
        let index = test_index().await;
        index
            .upsert(&doc("orthogonal", "c1", 1000, vec![0.0, 1.0]), "m")
            .await
            .unwrap();

        let hits = index.query(&[1.0, 0.0], "m", 10, 0.5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_query_ties_broken_by_recency() {
        let index = test_index().await;
        index
            .upsert(&doc("old", "c1", 1000, vec![1.0, 0.0]), "m")
            .await
            .unwrap();
        index
            .upsert(&doc("new", "c1", 2000, vec![1.0, 0.0]), "m")
            .await
            .unwrap();

        let hits = index.query(&[1.0, 0.0], "m", 10, 0.0).await.unwrap();
        assert_eq!(hits[0].0.id, "new");
        assert_eq!(hits[1].0.id, "old");
    }

    #[tokio::test]
    async fn test_query_rejects_model_mismatch() {
        let index = test_index().await;
        index
            .upsert(&doc("d1", "c1", 1000, vec![1.0, 0.0]), "model-a")
            .await
            .unwrap();

        let result = index.query(&[1.0, 0.0], "model-b", 10, 0.0).await;
        assert!(matches!(result, Err(EngineError::Embedding(_))));
    }

    #[tokio::test]
    async fn test_delete_by_connector_cascades_without_orphans() {
        let index = test_index().await;
        index
            .upsert(&doc("a1", "conn-a", 1000, vec![1.0, 0.0]), "m")
            .await
            .unwrap();
        index
            .upsert(&doc("a2", "conn-a", 1000, vec![0.0, 1.0]), "m")
            .await
            .unwrap();
        index
            .upsert(&doc("b1", "conn-b", 1000, vec![1.0, 1.0]), "m")
            .await
            .unwrap();

        let deleted = index.delete_by_connector("conn-a").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(index.count_by_connector("conn-a").await.unwrap(), 0);
        assert_eq!(index.count_by_connector("conn-b").await.unwrap(), 1);
    }
}
