use anyhow::Result;
use sqlx::SqlitePool;

/// Create the vector index schema. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS email_documents (
            id TEXT PRIMARY KEY,
            connector_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            sender TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            body TEXT NOT NULL,
            embedding BLOB NOT NULL,
            model TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_email_documents_connector \
         ON email_documents(connector_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_email_documents_timestamp \
         ON email_documents(timestamp DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
