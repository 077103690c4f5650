use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Create documents table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            source_file TEXT NOT NULL,
            row_index INTEGER NOT NULL,
            columns_json TEXT NOT NULL DEFAULT '[]',
            content TEXT NOT NULL,
            embedding BLOB,
            ingested_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create ingestion ledger
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_ledger (
            file_name TEXT PRIMARY KEY,
            ingested_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create FTS5 virtual table over document content
    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='documents_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        create_fts_table(pool).await?;
    }

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_source_file ON documents(source_file)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the derived full-text index table. Also used by the corruption
/// rebuild path, which drops and recreates it wholesale.
pub async fn create_fts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE VIRTUAL TABLE documents_fts USING fts5(
            doc_id UNINDEXED,
            content
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
